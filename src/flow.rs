
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::flow_table::FlowTable;
use crate::registry::SfuRegistry;
use crate::socket::{dial_udp, is_transient};

/// Largest datagram this balancer relays in either direction; matches the original's 2000-byte
/// receive buffer.
pub const MAX_DATAGRAM_SIZE: usize = 2000;

const DST_READ_DEADLINE: Duration = Duration::from_secs(2);
const WATCHDOG_PERIOD: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active = 0,
    Closing = 1,
    Closed = 2,
}

/// A flow under construction: its client-facing half is known, its SFU-facing half is not yet
/// dialed. Mirrors the two-step `newSLBConnection` + `initialize()` protocol from the original,
/// expressed as a consuming builder rather than a partially-initialized struct.
pub struct PendingFlow {
    key: String,
    listen_sock: Arc<UdpSocket>,
    client_addr: SocketAddr,
    first_pkt_millis: i64,
    token: CancellationToken,
}

impl PendingFlow {
    /// Constructs an uninitialized flow with timestamps set to "now" and a cancellation token
    /// derived from `parent_token`. Does not touch the flow table or start any workers.
    pub fn create(
        parent_token: &CancellationToken,
        listen_sock: Arc<UdpSocket>,
        client_addr: SocketAddr,
        key: String,
    ) -> Self {
        PendingFlow {
            key,
            listen_sock,
            client_addr,
            first_pkt_millis: now_millis(),
            token: parent_token.child_token(),
        }
    }

    /// Selects the least-loaded SFU, dials it, registers the flow, and starts its workers.
    pub async fn initialize_least_loaded(
        self,
        registry: &SfuRegistry,
        table: &FlowTable,
    ) -> Result<Arc<Flow>> {
        let sfu = registry
            .select_least_loaded()
            .await
            .ok_or(Error::ErrNoAlternateSfu)?;
        self.initialize_with(&sfu, table).await
    }

    /// Dials the caller-chosen `sfu_addr`, registers the flow, and starts its workers. Used
    /// directly by mobility (the SFU has already been selected and its refcount bumped by the
    /// caller).
    pub async fn initialize_with(self, sfu_addr: &str, table: &FlowTable) -> Result<Arc<Flow>> {
        let dst_sock = dial_udp(sfu_addr).await?;
        log::info!("sfu-lb: flow {} transfer to {}", self.key, sfu_addr);

        let flow = Arc::new(Flow {
            key: self.key.clone(),
            listen_sock: self.listen_sock,
            client_addr: self.client_addr,
            dst_sock,
            dst_addr: sfu_addr.to_string(),
            first_pkt_millis: self.first_pkt_millis,
            last_pkt_millis: AtomicI64::new(now_millis()),
            token: self.token,
            state: AtomicU8::new(State::Active as u8),
            table: table.clone(),
            workers: AsyncMutex::new(None),
        });

        table.store(self.key, flow.clone()).await;
        flow.clone().spawn_workers();

        Ok(flow)
    }
}

struct WorkerHandles {
    reader: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

/// One active client flow: a dialed SFU socket, the client's observed source address on the
/// shared listening socket, and the bookkeeping needed to time it out or rebind it.
pub struct Flow {
    key: String,
    listen_sock: Arc<UdpSocket>,
    client_addr: SocketAddr,
    dst_sock: UdpSocket,
    dst_addr: String,
    first_pkt_millis: i64,
    last_pkt_millis: AtomicI64,
    token: CancellationToken,
    state: AtomicU8,
    table: FlowTable,
    workers: AsyncMutex<Option<WorkerHandles>>,
}

impl Flow {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dst_addr(&self) -> &str {
        &self.dst_addr
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Age of this flow generation: `now - firstPkt`. The mobility check in the ingest loop
    /// compares this against `mobility.interval_s`; because a mobility successor starts with a
    /// fresh `first_pkt_millis`, only one rebind fires per generation.
    pub fn age(&self) -> Duration {
        Duration::from_millis((now_millis() - self.first_pkt_millis).max(0) as u64)
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_pkt_millis.load(Ordering::Acquire);
        Duration::from_millis((now_millis() - last).max(0) as u64)
    }

    fn touch(&self) {
        self.last_pkt_millis.store(now_millis(), Ordering::Release);
    }

    /// Writes `bytes` to the SFU socket, updating `lastPkt`. Short writes are logged, not treated
    /// as errors — a UDP write-length mismatch is a diagnostic, not a protocol failure.
    pub async fn send_to_dst(&self, bytes: &[u8]) -> Result<()> {
        self.touch();
        let n = self.dst_sock.send(bytes).await.map_err(|_| Error::ErrSend)?;
        if n != bytes.len() {
            log::error!(
                "sfu-lb: flow {} short write to dst, len = {n}, buf len = {}",
                self.key,
                bytes.len()
            );
        }
        Ok(())
    }

    fn spawn_workers(self: Arc<Self>) {
        let reader = tokio::spawn(Arc::clone(&self).run_reader());
        let watchdog = tokio::spawn(Arc::clone(&self).run_watchdog());

        // Workers are spawned just after construction, before any other task can observe `self`,
        // so this lock is never contended.
        if let Ok(mut slot) = self.workers.try_lock() {
            *slot = Some(WorkerHandles { reader, watchdog });
        }
    }

    async fn run_reader(self: Arc<Self>) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                res = tokio::time::timeout(DST_READ_DEADLINE, self.dst_sock.recv(&mut buf)) => {
                    match res {
                        // Deadline expired: not an error, just go around and check cancellation again.
                        Err(_elapsed) => continue,
                        Ok(Err(e)) => {
                            if is_transient(&e) {
                                continue;
                            }
                            log::error!("sfu-lb: flow {} fails to read from dst, error: {e}", self.key);
                            break;
                        }
                        Ok(Ok(0)) => continue,
                        Ok(Ok(n)) => {
                            self.touch();
                            match self.listen_sock.send_to(&buf[..n], self.client_addr).await {
                                Ok(sent) if sent != n => {
                                    log::error!(
                                        "sfu-lb: flow {} short write to client, len = {sent}, buf len = {n}",
                                        self.key
                                    );
                                }
                                Err(e) => {
                                    log::error!("sfu-lb: flow {} fails to send to client, error: {e}", self.key);
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }
        }
        self.close().await;
    }

    async fn run_watchdog(self: Arc<Self>) {
        let mut interval = tokio::time::interval(WATCHDOG_PERIOD);
        interval.tick().await; // first tick fires immediately; consume it.
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = interval.tick() => {
                    if self.idle_for() > IDLE_TIMEOUT {
                        log::error!("sfu-lb: flow {} no packet for {IDLE_TIMEOUT:?}, closing", self.key);
                        break;
                    }
                }
            }
        }
        self.close().await;
    }

    /// Idempotent shutdown. The first caller transitions `Active -> Closing`, removes the flow
    /// from the table (only if the table still points at this flow — see the mobility race in the
    /// module docs), cancels the flow's token so both workers observe it on their next wakeup, and
    /// hands the join handles to a detached reaper task rather than awaiting them inline: both
    /// workers call `close()` themselves on exit, and awaiting a worker's own handle from within
    /// its own call stack would deadlock. The detached reaper still guarantees both workers have
    /// exited within bounded time, satisfying the "released exactly once" / "exits within bounded
    /// time" properties without that hazard.
    pub async fn close(self: &Arc<Self>) {
        let prev = self
            .state
            .swap(State::Closing as u8, Ordering::AcqRel);
        if prev != State::Active as u8 {
            // Already closing or closed: no-op.
            return;
        }

        self.table.delete_if_current(&self.key, self).await;
        self.token.cancel();

        let handles = self.workers.lock().await.take();
        if let Some(WorkerHandles { reader, watchdog }) = handles {
            tokio::spawn(async move {
                let _ = reader.await;
                let _ = watchdog.await;
            });
        }

        self.state.store(State::Closed as u8, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == State::Closed as u8
    }
}
