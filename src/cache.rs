//! Latest published JSON snapshots served on `/stats`.
//!
//! Written only by the stats scheduler at the end of a cycle, read by the HTTP layer.
//! Only the most recent snapshot is kept.

use tokio::sync::RwLock;

/// A single replaceable JSON document.
#[derive(Debug, Default)]
pub struct JsonSlot {
    data: RwLock<Vec<u8>>,
}

impl JsonSlot {
    /// Replace the current document.
    pub async fn publish(&self, bytes: Vec<u8>) {
        *self.data.write().await = bytes;
    }

    /// Copy of the current document; empty until the first publish.
    pub async fn read(&self) -> Vec<u8> {
        self.data.read().await.clone()
    }
}

/// Snapshots exposed by `/stats?type=...`.
#[derive(Debug, Default)]
pub struct SeriesCache {
    /// Aggregated task status logs (`type=task`).
    pub task_stats: JsonSlot,
    /// Full task listing of the account (`type=all`).
    pub all_tasks: JsonSlot,
}

impl SeriesCache {
    pub fn new() -> Self {
        Self::default()
    }
}
