
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::flow::Flow;

/// Concurrent mapping from client-endpoint key to the flow currently serving it. Grounded on
/// `turn::allocation::AllocationMap` (`Arc<Mutex<HashMap<FiveTuple, Arc<Allocation>>>>`): same
/// shape, keyed by the stringified client address instead of a `FiveTuple`.
#[derive(Clone)]
pub struct FlowTable {
    flows: Arc<Mutex<HashMap<String, Arc<Flow>>>>,
}

impl FlowTable {
    pub fn new() -> Self {
        FlowTable {
            flows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn load(&self, key: &str) -> Option<Arc<Flow>> {
        self.flows.lock().await.get(key).cloned()
    }

    /// Unconditionally replaces any prior entry for `key` (last-writer-wins), required by the
    /// mobility protocol which installs a successor before the predecessor is closed.
    pub async fn store(&self, key: String, flow: Arc<Flow>) {
        self.flows.lock().await.insert(key, flow);
    }

    pub async fn delete(&self, key: &str) {
        self.flows.lock().await.remove(key);
    }

    /// Removes the entry for `key` only if it still points at `flow`. Used by
    /// [`Flow::close`](crate::flow::Flow::close) so a predecessor's late close (after a mobility
    /// rebind already installed a successor under the same key) cannot evict the successor.
    pub async fn delete_if_current(&self, key: &str, flow: &Arc<Flow>) {
        let mut flows = self.flows.lock().await;
        if let Some(current) = flows.get(key) {
            if Arc::ptr_eq(current, flow) {
                flows.remove(key);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.flows.lock().await.len()
    }
}

impl Default for FlowTable {
    fn default() -> Self {
        Self::new()
    }
}
