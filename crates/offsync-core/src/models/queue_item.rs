//! Retryable queue item model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Queue item identifier (database sequence)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(pub i64);

impl fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown queue status: {other}"))),
        }
    }
}

/// Request to enqueue new work
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItemDraft {
    pub action_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub max_retries: u32,
}

impl QueueItemDraft {
    pub fn new(action_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
            priority: 0,
            max_retries: 3,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A schedulable unit of retryable work (sync requests, cache refreshes)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub action_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    /// Unix ms
    pub created_at: i64,
    /// Unix ms
    pub updated_at: i64,
}

impl QueueItem {
    /// Failed items with attempts left may be picked up again
    pub const fn is_retryable(&self) -> bool {
        matches!(self.status, QueueStatus::Failed) && self.retry_count < self.max_retries
    }

    pub const fn is_terminal(&self) -> bool {
        match self.status {
            QueueStatus::Completed => true,
            QueueStatus::Failed => !self.is_retryable(),
            QueueStatus::Pending | QueueStatus::Processing => false,
        }
    }

    /// `pending` or retryable `failed` -> `processing`
    pub fn start_processing(&mut self, now: i64) -> Result<()> {
        match self.status {
            QueueStatus::Pending => {}
            QueueStatus::Failed if self.is_retryable() => {}
            status => {
                return Err(Error::InvalidState(format!(
                    "queue item {} cannot start from {}",
                    self.id,
                    status.as_str()
                )))
            }
        }
        self.status = QueueStatus::Processing;
        self.updated_at = now;
        Ok(())
    }

    /// `processing` -> `completed`; the item is immutable afterwards
    pub fn complete(&mut self, now: i64) -> Result<()> {
        self.expect_processing("complete")?;
        self.status = QueueStatus::Completed;
        self.error_message = None;
        self.updated_at = now;
        Ok(())
    }

    /// `processing` -> `failed`, consuming one retry
    pub fn fail(&mut self, error: impl Into<String>, now: i64) -> Result<()> {
        self.expect_processing("fail")?;
        self.status = QueueStatus::Failed;
        self.retry_count = (self.retry_count + 1).min(self.max_retries);
        self.error_message = Some(error.into());
        self.updated_at = now;
        Ok(())
    }

    fn expect_processing(&self, op: &str) -> Result<()> {
        if self.status == QueueStatus::Processing {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "cannot {op} queue item {} in status {}",
                self.id,
                self.status.as_str()
            )))
        }
    }
}
