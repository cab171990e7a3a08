//! Aggregate retry outcome metrics

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOutcome {
    Success,
    Failure,
}

impl RetryOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for RetryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(Error::InvalidInput(format!("unknown retry outcome: {other}"))),
        }
    }
}

/// Details reported alongside an outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeMeta {
    pub job_id: Option<String>,
    /// Why the job ran (`sync_failures`, `manual`, ...); metrics are keyed by this
    pub reason: Option<String>,
    pub trigger: Option<String>,
    pub retry_count: Option<u32>,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub success_count: Option<u32>,
    pub failure_count: Option<u32>,
    pub timestamp_ms: Option<i64>,
}

/// Running totals for one job reason
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryMetrics {
    pub total_success: u64,
    pub total_failure: u64,
    pub consecutive_failure: u64,
    pub last_success_ms: Option<i64>,
    pub last_failure_ms: Option<i64>,
    pub last_outcome: Option<RetryOutcome>,
    /// Metadata of the most recent outcome
    pub last: Option<OutcomeMeta>,
}

impl RetryMetrics {
    pub fn record(&mut self, outcome: RetryOutcome, meta: &OutcomeMeta, now: i64) {
        let at = meta.timestamp_ms.unwrap_or(now);
        match outcome {
            RetryOutcome::Success => {
                self.total_success += 1;
                self.consecutive_failure = 0;
                self.last_success_ms = Some(at);
            }
            RetryOutcome::Failure => {
                self.total_failure += 1;
                self.consecutive_failure += 1;
                self.last_failure_ms = Some(at);
            }
        }
        self.last_outcome = Some(outcome);
        self.last = Some(OutcomeMeta {
            timestamp_ms: Some(at),
            ..meta.clone()
        });
    }

    pub const fn attempts(&self) -> u64 {
        self.total_success + self.total_failure
    }
}
