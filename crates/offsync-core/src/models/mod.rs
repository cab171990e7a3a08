//! Data models for offsync

mod action;
mod optimistic_update;
mod queue_item;
mod retry_metrics;
mod sync_conflict;
mod sync_result;

pub use action::{Action, ActionId, ActionPayload, ActionType, EntityType, Operation};
pub use optimistic_update::{OptimisticUpdate, UpdateId};
pub use queue_item::{QueueItem, QueueItemDraft, QueueItemId, QueueStatus};
pub use retry_metrics::{OutcomeMeta, RetryMetrics, RetryOutcome};
pub use sync_conflict::{ConflictType, Resolution, SyncConflict};
pub use sync_result::SyncResult;
