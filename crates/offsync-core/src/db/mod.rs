//! Database layer for offsync

mod action_repository;
mod connection;
mod metrics_repository;
mod migrations;
mod queue_repository;

pub use action_repository::{ActionFilter, ActionRepository, LibSqlActionRepository};
pub use connection::Database;
pub use metrics_repository::{LibSqlMetricsRepository, MetricsRepository};
pub use queue_repository::{LibSqlQueueRepository, QueueRepository};
