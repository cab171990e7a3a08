//! offsync-core - Core library for offsync
//!
//! This crate contains the action models, durable storage, and the sync
//! engine (pending store, optimistic updates, differential sync, conflict
//! resolution, retry scheduling, and the coordinator that drives them).

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod models;
pub mod optimistic;
pub mod retry;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;
pub mod worker;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthorityConfig, ConfigError, SyncConfig};
pub use coordinator::{BackgroundRequest, SkipReason, SyncCoordinator, SyncOutcome, SyncTrigger};
pub use error::{Error, Result};
pub use models::{
    Action, ActionId, ActionPayload, ActionType, ConflictType, Resolution, SyncConflict,
    SyncResult,
};
pub use optimistic::OptimisticUpdateManager;
pub use retry::{RetryJob, RetryScheduler, ScheduledRetry};
pub use state::{SyncState, SyncStatus};
pub use store::OfflineActionStore;
pub use worker::{BackgroundWorker, WorkerEvent, WorkerHandle};
