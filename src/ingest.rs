#[cfg(test)]
mod ingest_test;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::config::Mobility;
use crate::flow::{Flow, PendingFlow, MAX_DATAGRAM_SIZE};
use crate::flow_table::FlowTable;
use crate::registry::SfuRegistry;
use crate::socket::is_transient;

const LISTEN_READ_DEADLINE: Duration = Duration::from_secs(2);

/// The single demultiplexing task: reads datagrams off the shared listening socket, resolves
/// (or creates) the flow for each client endpoint, applies the mobility policy, and forwards the
/// datagram. Runs until `token` is cancelled or the listening socket hits a fatal error.
pub async fn run(
    listen_sock: Arc<UdpSocket>,
    table: FlowTable,
    registry: Arc<SfuRegistry>,
    mobility: Mobility,
    token: CancellationToken,
) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (n, client_addr) = tokio::select! {
            _ = token.cancelled() => break,
            res = tokio::time::timeout(LISTEN_READ_DEADLINE, listen_sock.recv_from(&mut buf)) => {
                match res {
                    Err(_elapsed) => continue,
                    Ok(Err(e)) => {
                        if is_transient(&e) {
                            continue;
                        }
                        log::error!("sfu-lb: fail to read, error: {e}");
                        break;
                    }
                    Ok(Ok((0, _))) => continue,
                    Ok(Ok(pair)) => pair,
                }
            }
        };

        let key = client_addr.to_string();

        let mut flow = match table.load(&key).await {
            Some(flow) => flow,
            None => {
                let pending =
                    PendingFlow::create(&token, Arc::clone(&listen_sock), client_addr, key.clone());
                match pending.initialize_least_loaded(&registry, &table).await {
                    Ok(flow) => flow,
                    Err(e) => {
                        // REDESIGN FLAG (spec.md §7/§9): the original escalates this to ingest-loop
                        // termination. This rewrite demotes it to a per-flow failure: drop the
                        // packet and let the next one from this client retry flow creation.
                        log::error!(
                            "sfu-lb: fail to initialize flow for {key}, error: {e}; dropping packet"
                        );
                        continue;
                    }
                }
            }
        };

        if mobility.enable {
            if let Some(successor) = apply_mobility(
                &flow,
                &mobility,
                &listen_sock,
                client_addr,
                &key,
                &registry,
                &table,
                &token,
            )
            .await
            {
                flow = successor;
            }
        }

        if flow.send_to_dst(&buf[..n]).await.is_err() {
            table.delete_if_current(&key, &flow).await;
        }
    }
}

/// Runs the mobility check for one packet on an already-resolved `flow`. Returns `Some(successor)`
/// if a rebind happened and the caller should use the successor for the rest of this iteration.
#[allow(clippy::too_many_arguments)]
async fn apply_mobility(
    flow: &Arc<Flow>,
    mobility: &Mobility,
    listen_sock: &Arc<UdpSocket>,
    client_addr: std::net::SocketAddr,
    key: &str,
    registry: &Arc<SfuRegistry>,
    table: &FlowTable,
    token: &CancellationToken,
) -> Option<Arc<Flow>> {
    if flow.age() <= Duration::from_secs(mobility.interval_s) {
        return None;
    }

    match mobility.mode {
        1 => {
            // Rebind to the same SFU on a fresh downstream socket.
            let dst = flow.dst_addr().to_string();
            let pending =
                PendingFlow::create(token, Arc::clone(listen_sock), client_addr, key.to_string());
            match pending.initialize_with(&dst, table).await {
                Ok(successor) => Some(successor),
                Err(e) => {
                    log::error!("sfu-lb: mobility rebind (mode 1) failed for {key}, error: {e}");
                    None
                }
            }
        }
        2 => {
            let current_dst = flow.dst_addr().to_string();
            let Some(new_sfu) = registry.pick_any(&current_dst).await else {
                log::error!(
                    "sfu-lb: mobility rebind (mode 2) requires another sfu; staying on current for {key}"
                );
                return None;
            };

            // Explicitly delete the predecessor before installing the successor: last-writer-wins
            // `store` would make this redundant, but the spec calls out the explicit delete as
            // part of mode 2's protocol (it runs between the registry bump and the dial, unlike
            // mode 1 where the table simply gets overwritten).
            table.delete_if_current(key, flow).await;

            let pending =
                PendingFlow::create(token, Arc::clone(listen_sock), client_addr, key.to_string());
            match pending.initialize_with(&new_sfu, table).await {
                Ok(successor) => Some(successor),
                Err(e) => {
                    log::error!("sfu-lb: mobility rebind (mode 2) failed for {key}, error: {e}");
                    None
                }
            }
        }
        _ => None,
    }
}
