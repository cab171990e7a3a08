//! Coordinator state shared with the presentation layer.

use serde::Serialize;

use crate::models::SyncConflict;

/// Coordinator state machine: `Idle -> Syncing -> Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
}

/// Snapshot consumed by whatever renders sync state to the user.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    /// 0.0 ..= 100.0
    pub progress: f64,
    pub total_items: usize,
    /// Actions classified so far in the current pass, whatever the outcome
    pub processed_items: usize,
    /// Actions the authority accepted in the last pass
    pub synced_items: usize,
    pub conflicts: Vec<SyncConflict>,
    /// Unix ms
    pub last_sync_time: Option<i64>,
    pub error: Option<String>,
    /// Next background retry, when one is scheduled (Unix ms)
    pub next_retry_at: Option<i64>,
}

impl SyncStatus {
    /// Record progress; `total == 0` reports 0%.
    pub fn set_progress(&mut self, processed: usize, total: usize) {
        #[allow(clippy::cast_precision_loss)]
        let progress = if total > 0 {
            (processed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        self.progress = progress.clamp(0.0, 100.0);
        self.processed_items = processed;
        self.total_items = total;
    }
}
