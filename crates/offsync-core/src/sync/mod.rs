//! Differential sync against a remote authority.

mod authority;
pub mod diff;
mod engine;
mod http;
mod resolver;

pub use authority::{AuthorityError, RemoteAuthority, RemoteState, SubmitOutcome};
pub use engine::DifferentialSyncEngine;
pub use http::{classify_response, HttpAuthority};
pub use resolver::{recommend, AppliedAction, ConflictResolver};
