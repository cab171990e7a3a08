//! Outcome of one differential sync pass

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Action, ActionId, SyncConflict};

/// Per-action partition of a sync pass.
///
/// Every input action lands in exactly one of `synced_actions`,
/// `conflicts`, or `failed_actions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub synced_actions: Vec<Action>,
    pub conflicts: Vec<SyncConflict>,
    pub failed_actions: Vec<Action>,
    pub total_processed: usize,
    /// Failure reason per failed action
    #[serde(default)]
    pub failure_reasons: BTreeMap<ActionId, String>,
}

impl SyncResult {
    pub fn push_synced(&mut self, action: Action) {
        self.synced_actions.push(action);
        self.total_processed += 1;
    }

    pub fn push_conflict(&mut self, conflict: SyncConflict) {
        self.conflicts.push(conflict);
        self.total_processed += 1;
    }

    pub fn push_failed(&mut self, action: Action, reason: impl Into<String>) {
        self.failure_reasons
            .insert(action.local_id.clone(), reason.into());
        self.failed_actions.push(action);
        self.total_processed += 1;
    }

    /// `total_processed` equals the sum of the three partitions
    pub fn is_consistent(&self) -> bool {
        self.total_processed
            == self.synced_actions.len() + self.conflicts.len() + self.failed_actions.len()
    }

    pub const fn has_failures(&self) -> bool {
        !self.failed_actions.is_empty()
    }

    pub fn failure_reason(&self, local_id: &ActionId) -> Option<&str> {
        self.failure_reasons.get(local_id).map(String::as_str)
    }
}
