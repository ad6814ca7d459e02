
use std::collections::HashMap;

use tokio::sync::Mutex;

/// Process-wide mapping from SFU endpoint to the number of flows currently assigned to it under
/// the selection policy. Written only by the ingest loop; wrapped in a mutex anyway (the same
/// defensive-but-cheap choice `turn`'s allocation manager makes for its reservation map) so an
/// implementation that later decides to decrement on flow teardown doesn't have to revisit the
/// locking strategy.
pub struct SfuRegistry {
    refcounts: Mutex<HashMap<String, u64>>,
}

impl SfuRegistry {
    /// Seeds the registry with every endpoint in `sfu_list` at refcount zero.
    pub fn new(sfu_list: &[String]) -> Self {
        let mut refcounts = HashMap::with_capacity(sfu_list.len());
        for sfu in sfu_list {
            refcounts.insert(sfu.clone(), 0);
        }
        SfuRegistry {
            refcounts: Mutex::new(refcounts),
        }
    }

    /// Returns the endpoint with the smallest current refcount, incrementing it before
    /// returning. Ties are broken by whichever entry the (unordered) map iteration visits last;
    /// callers must not depend on a specific tie-break.
    pub async fn select_least_loaded(&self) -> Option<String> {
        let mut refcounts = self.refcounts.lock().await;
        let mut best: Option<(String, u64)> = None;
        for (sfu, count) in refcounts.iter() {
            if best.as_ref().map(|(_, c)| *count <= *c).unwrap_or(true) {
                best = Some((sfu.clone(), *count));
            }
        }
        let (sfu, _) = best?;
        if let Some(count) = refcounts.get_mut(&sfu) {
            *count += 1;
        }
        Some(sfu)
    }

    /// Returns any endpoint other than `excluding`, incrementing its refcount. `None` if the
    /// registry has fewer than two distinct entries.
    pub async fn pick_any(&self, excluding: &str) -> Option<String> {
        let mut refcounts = self.refcounts.lock().await;
        let candidate = refcounts
            .keys()
            .find(|sfu| sfu.as_str() != excluding)
            .cloned()?;
        if let Some(count) = refcounts.get_mut(&candidate) {
            *count += 1;
        }
        Some(candidate)
    }

    /// Current refcount of `sfu`, or `None` if it is not a known endpoint. Exposed for tests and
    /// the diagnostic endpoint.
    pub async fn refcount(&self, sfu: &str) -> Option<u64> {
        self.refcounts.lock().await.get(sfu).copied()
    }
}
