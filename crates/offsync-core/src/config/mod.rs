//! Runtime configuration for the sync engine.
//!
//! Defaults reproduce the reference behaviour (5s backoff base, 5 minute cap).
//! `SyncConfig::from_env` reads `OFFSYNC_*` overrides and validates ranges.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use thiserror::Error;

use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BACKGROUND_COOLDOWN: Duration = Duration::from_secs(30);
pub const DEFAULT_QUEUE_HISTORY_LIMIT: usize = 30;
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// First retry delay; doubled per attempt
    pub retry_base_delay: Duration,
    /// Upper bound for any retry delay
    pub retry_max_delay: Duration,
    /// Attempts a background job gets before it is dropped
    pub max_retries: u32,
    /// Bound on each authority call
    pub request_timeout: Duration,
    /// Minimum spacing between background sync requests
    pub background_cooldown: Duration,
    /// Queue items returned by history listings
    pub queue_history_limit: usize,
    /// Spacing between periodic passes while the driver runs
    pub sync_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            background_cooldown: DEFAULT_BACKGROUND_COOLDOWN,
            queue_history_limit: DEFAULT_QUEUE_HISTORY_LIMIT,
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_secs = parse_in_range(&lookup, "OFFSYNC_RETRY_BASE_DELAY_SECS", 5, 1..=3_600)?;
        let max_secs = parse_in_range(&lookup, "OFFSYNC_RETRY_MAX_DELAY_SECS", 300, 1..=86_400)?;
        if max_secs < base_secs {
            return Err(ConfigError::Invalid(
                "OFFSYNC_RETRY_MAX_DELAY_SECS must be >= OFFSYNC_RETRY_BASE_DELAY_SECS"
                    .to_string(),
            ));
        }

        let max_retries = parse_in_range(&lookup, "OFFSYNC_MAX_RETRIES", 3, 0..=100)?;
        let timeout_secs = parse_in_range(&lookup, "OFFSYNC_REQUEST_TIMEOUT_SECS", 30, 1..=600)?;
        let cooldown_secs =
            parse_in_range(&lookup, "OFFSYNC_BACKGROUND_COOLDOWN_SECS", 30, 0..=3_600)?;
        let history_limit = parse_in_range(&lookup, "OFFSYNC_QUEUE_HISTORY_LIMIT", 30, 1..=1_000)?;
        let interval_secs = parse_in_range(&lookup, "OFFSYNC_SYNC_INTERVAL_SECS", 30, 1..=86_400)?;

        Ok(Self {
            retry_base_delay: Duration::from_secs(base_secs),
            retry_max_delay: Duration::from_secs(max_secs),
            max_retries: u32::try_from(max_retries)
                .map_err(|_| ConfigError::Invalid("OFFSYNC_MAX_RETRIES is too large".into()))?,
            request_timeout: Duration::from_secs(timeout_secs),
            background_cooldown: Duration::from_secs(cooldown_secs),
            queue_history_limit: usize::try_from(history_limit).map_err(|_| {
                ConfigError::Invalid("OFFSYNC_QUEUE_HISTORY_LIMIT is too large".into())
            })?,
            sync_interval: Duration::from_secs(interval_secs),
        })
    }
}

/// Where and how to reach the remote authority.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorityConfig {
    pub base_url: String,
    pub api_token: Option<String>,
}

impl fmt::Debug for AuthorityConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthorityConfig")
            .field("base_url", &self.base_url)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl AuthorityConfig {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConfigError> {
        let base_url = normalize_text_option(Some(base_url.into()))
            .ok_or(ConfigError::MissingVar("OFFSYNC_AUTHORITY_URL"))?;
        if !is_http_url(&base_url) {
            return Err(ConfigError::Invalid(
                "OFFSYNC_AUTHORITY_URL must start with http:// or https://".to_string(),
            ));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: None,
        })
    }

    #[must_use]
    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = normalize_text_option(token);
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = optional_trimmed(&lookup, "OFFSYNC_AUTHORITY_URL")
            .ok_or(ConfigError::MissingVar("OFFSYNC_AUTHORITY_URL"))?;
        Ok(Self::new(base_url)?.with_api_token(lookup("OFFSYNC_AUTHORITY_TOKEN")))
    }
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}
