//! Narrow interface to the remote authority.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Error;
use crate::models::{Action, ActionPayload, ConflictType};

/// Authority-side view of an entity that diverges from a local action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteState {
    /// The authority's current version of the entity, as an action
    #[serde(default)]
    pub remote_action: Option<Action>,
    /// Version counter the local action was based on
    #[serde(default)]
    pub local_version: Option<i64>,
    /// Version counter the authority holds
    #[serde(default)]
    pub remote_version: Option<i64>,
    /// Payload combining both sides, when the authority offers one
    #[serde(default)]
    pub merged_data: Option<ActionPayload>,
}

impl RemoteState {
    /// Classify the mismatch: a merge proposal wins, then differing version
    /// counters, otherwise the sides only differ in time.
    pub fn conflict_type(&self) -> ConflictType {
        if self.merged_data.is_some() {
            return ConflictType::Merge;
        }
        match (self.local_version, self.remote_version) {
            (Some(local), Some(remote)) if local != remote => ConflictType::Version,
            (None, Some(_)) => ConflictType::Version,
            _ => ConflictType::Timestamp,
        }
    }
}

/// What the authority did with a submitted action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Accepted as-is; creations carry the assigned identity
    Accepted { remote_id: Option<String> },
    /// Rejected because the authority holds a divergent record
    Conflict(RemoteState),
}

/// Transport-level failures reported by an authority client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorityError {
    /// Timeout, dropped connection, 5xx, or a response that could not be understood
    #[error("transient authority failure: {0}")]
    Transient(String),
    /// Permanent per-action refusal (4xx other than auth and conflict)
    #[error("authority rejected the action ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("authority refused credentials: {0}")]
    Unauthorized(String),
    /// No connection could be established at all
    #[error("authority unreachable: {0}")]
    Unreachable(String),
}

impl AuthorityError {
    /// Whether the failure ends the whole pass rather than a single action.
    pub const fn aborts_pass(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Unreachable(_))
    }
}

impl From<AuthorityError> for Error {
    fn from(error: AuthorityError) -> Self {
        match error {
            AuthorityError::Unauthorized(message) => Self::Fatal(message),
            AuthorityError::Rejected { status, message } => {
                Self::InvalidInput(format!("authority rejected the action ({status}): {message}"))
            }
            other @ (AuthorityError::Transient(_) | AuthorityError::Unreachable(_)) => {
                Self::Transient(other.to_string())
            }
        }
    }
}

/// Remote authority client; one call per action.
///
/// Implementations map the action to the authority's create, update, or
/// delete operation (see `ActionType::operation`).
#[allow(async_fn_in_trait)]
pub trait RemoteAuthority {
    async fn submit(&self, action: &Action) -> Result<SubmitOutcome, AuthorityError>;
}
