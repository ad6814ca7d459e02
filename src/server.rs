use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::flow_table::FlowTable;
use crate::registry::SfuRegistry;
use crate::socket::listen_udp;

/// Builds every long-lived piece of the balancer and drives it until shutdown is requested.
/// Mirrors `turn::server::Server::new` + `main.rs`'s ctrl-c wait in spirit: construction is
/// fallible and synchronous, running is a single `await` that returns once every background task
/// has wound down.
pub struct Server {
    token: CancellationToken,
    ingest: tokio::task::JoinHandle<()>,
    debug: Option<tokio::task::JoinHandle<()>>,
}

impl Server {
    pub async fn start(config: Config) -> Result<Self> {
        let listen_addr = config
            .listen
            .parse()
            .map_err(|_| crate::error::Error::ErrResolve)?;
        let listen_sock = Arc::new(listen_udp(listen_addr)?);
        log::info!("sfu-lb: listening on {}", listen_sock.local_addr()?);

        let table = FlowTable::new();
        let registry = Arc::new(SfuRegistry::new(&config.sfu_list));
        let token = CancellationToken::new();

        let ingest = tokio::spawn(crate::ingest::run(
            Arc::clone(&listen_sock),
            table.clone(),
            Arc::clone(&registry),
            config.mobility.clone(),
            token.child_token(),
        ));

        let debug = if !config.debug.is_empty() {
            match config.debug.parse() {
                Ok(debug_addr) => {
                    let table = table.clone();
                    let registry = Arc::clone(&registry);
                    let sfu_list = config.sfu_list.clone();
                    Some(tokio::spawn(crate::debug::serve(
                        debug_addr,
                        table,
                        registry,
                        sfu_list,
                    )))
                }
                Err(_) => {
                    log::error!("sfu-lb: debug addr {} is not a valid socket address, skipping diagnostic endpoint", config.debug);
                    None
                }
            }
        } else {
            None
        };

        Ok(Server {
            token,
            ingest,
            debug,
        })
    }

    /// Waits for Ctrl-C (and, on unix, SIGTERM), then cancels every background task and waits for
    /// the ingest loop to finish. The diagnostic endpoint, if any, is aborted directly: it has no
    /// per-flow state to drain.
    pub async fn run_until_shutdown(self) {
        wait_for_shutdown_signal().await;
        log::info!("sfu-lb: shutdown requested, draining...");

        self.token.cancel();
        let _ = self.ingest.await;
        if let Some(debug) = self.debug {
            debug.abort();
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            log::error!("sfu-lb: fail to install SIGTERM handler, error: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
