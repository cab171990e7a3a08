use std::io;

use offsync_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] offsync_core::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Missing required flag for {action_type}: --{flag}")]
    MissingFlag {
        action_type: &'static str,
        flag: &'static str,
    },
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Could not resolve a data directory; pass --db-path or set OFFSYNC_DB_PATH")]
    NoDataDir,
    #[error(
        "Sync is not configured. Pass --authority-url or set OFFSYNC_AUTHORITY_URL (and optionally OFFSYNC_AUTHORITY_TOKEN)."
    )]
    SyncNotConfigured,
}
