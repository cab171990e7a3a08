use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use offsync_core::ActionType;

#[derive(Parser)]
#[command(name = "offsync")]
#[command(about = "Record actions offline and sync them with a remote authority")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Identity scope actions are recorded under
    #[arg(long, global = true, env = "OFFSYNC_USER", default_value = "local")]
    pub user: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a new pending action
    Add {
        /// Action type (e.g. create_post, like_post, follow)
        #[arg(value_parser = parse_action_type)]
        action_type: ActionType,
        /// Existing post, user, or topic the action targets
        #[arg(long, value_name = "ID")]
        target: Option<String>,
        /// Post content
        #[arg(long)]
        content: Option<String>,
        /// Topic a new post belongs to
        #[arg(long, value_name = "ID")]
        topic: Option<String>,
        /// Topic name
        #[arg(long)]
        name: Option<String>,
        /// Topic description
        #[arg(long)]
        description: Option<String>,
        /// Profile field to update (repeatable)
        #[arg(long = "field", value_name = "KEY=VALUE", value_parser = parse_field)]
        fields: Vec<(String, String)>,
        /// Full JSON payload; overrides the individual flags
        #[arg(long, value_name = "JSON", conflicts_with_all = ["target", "content", "topic"])]
        payload: Option<String>,
    },
    /// List actions waiting to be synced
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push pending actions to the authority
    Sync {
        /// Authority base URL
        #[arg(long, env = "OFFSYNC_AUTHORITY_URL", value_name = "URL")]
        authority_url: Option<String>,
        /// Skip queued sync requests
        #[arg(long)]
        no_queue: bool,
        /// Keep running: periodic passes and scheduled retries until Ctrl+C
        #[arg(long)]
        watch: bool,
        /// Output the final status as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage queued sync requests
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Show retry metrics per job reason
    Metrics {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Queue a sync request (manual sync, cache refresh, ...)
    Add {
        /// Request kind
        #[arg(default_value = "manual_sync")]
        kind: String,
        /// JSON payload attached to the request
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
        /// Higher runs first
        #[arg(long, default_value_t = 0)]
        priority: i32,
        /// Attempts before the request is abandoned
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
    },
    /// List recent queue items
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

fn parse_action_type(raw: &str) -> Result<ActionType, String> {
    raw.trim()
        .replace('-', "_")
        .parse()
        .map_err(|err: offsync_core::Error| err.to_string())
}

pub fn parse_field(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("field name cannot be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}
