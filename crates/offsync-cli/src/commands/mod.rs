pub mod add;
pub mod common;
pub mod completions;
pub mod metrics;
pub mod pending;
pub mod queue;
pub mod sync;
