use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use offsync_core::db::{
    ActionFilter, ActionRepository, Database, LibSqlActionRepository, LibSqlMetricsRepository,
    LibSqlQueueRepository,
};
use offsync_core::models::{QueueItem, RetryMetrics};
use offsync_core::sync::RemoteAuthority;
use offsync_core::util::normalize_text_option;
use offsync_core::{
    Action, ActionPayload, ActionType, AuthorityConfig, OfflineActionStore, SyncConfig,
    SyncConflict, SyncCoordinator, SyncOutcome, SystemClock,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

pub type LocalCoordinator<A> =
    SyncCoordinator<A, LibSqlActionRepository, LibSqlMetricsRepository, LibSqlQueueRepository>;

#[derive(Debug, Serialize)]
pub struct PendingActionItem {
    pub local_id: String,
    pub action_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payload: ActionPayload,
    pub created_at: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct MetricsItem {
    pub reason: String,
    #[serde(flatten)]
    pub metrics: RetryMetrics,
}

/// Flags accepted by `offsync add` besides the action type.
#[derive(Debug, Default)]
pub struct PayloadFlags {
    pub target: Option<String>,
    pub content: Option<String>,
    pub topic: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub fields: Vec<(String, String)>,
}

pub fn build_payload(
    action_type: ActionType,
    flags: PayloadFlags,
) -> Result<ActionPayload, CliError> {
    let kind = action_type.as_str();
    let required = |value: Option<String>, flag: &'static str| {
        normalize_text_option(value).ok_or(CliError::MissingFlag {
            action_type: kind,
            flag,
        })
    };

    let payload = match action_type {
        ActionType::CreatePost => ActionPayload::CreatePost {
            content: required(flags.content, "content")?,
            topic_id: required(flags.topic, "topic")?,
            reply_to: None,
            quoted_post: None,
        },
        ActionType::DeletePost => ActionPayload::DeletePost {
            post_id: required(flags.target, "target")?,
        },
        ActionType::LikePost => ActionPayload::LikePost {
            post_id: required(flags.target, "target")?,
        },
        ActionType::Boost => ActionPayload::Boost {
            post_id: required(flags.target, "target")?,
        },
        ActionType::Bookmark => ActionPayload::Bookmark {
            post_id: required(flags.target, "target")?,
        },
        ActionType::Unbookmark => ActionPayload::Unbookmark {
            post_id: required(flags.target, "target")?,
        },
        ActionType::Follow => ActionPayload::Follow {
            user_id: required(flags.target, "target")?,
        },
        ActionType::Unfollow => ActionPayload::Unfollow {
            user_id: required(flags.target, "target")?,
        },
        ActionType::ProfileUpdate => {
            if flags.fields.is_empty() {
                return Err(CliError::MissingFlag {
                    action_type: kind,
                    flag: "field",
                });
            }
            ActionPayload::ProfileUpdate {
                user_id: required(flags.target, "target")?,
                fields: flags
                    .fields
                    .into_iter()
                    .map(|(key, value)| (key, Value::String(value)))
                    .collect(),
            }
        }
        ActionType::JoinTopic => ActionPayload::JoinTopic {
            topic_id: required(flags.target, "target")?,
        },
        ActionType::LeaveTopic => ActionPayload::LeaveTopic {
            topic_id: required(flags.target, "target")?,
        },
        ActionType::TopicCreate => ActionPayload::TopicCreate {
            name: required(flags.name, "name")?,
            description: normalize_text_option(flags.description),
        },
        ActionType::TopicUpdate => ActionPayload::TopicUpdate {
            topic_id: required(flags.target, "target")?,
            name: normalize_text_option(flags.name),
            description: normalize_text_option(flags.description),
        },
        ActionType::TopicDelete => ActionPayload::TopicDelete {
            topic_id: required(flags.target, "target")?,
        },
    };
    Ok(payload)
}

/// Parse a raw JSON payload, filling in the `type` tag when it is omitted.
pub fn parse_payload(action_type: ActionType, raw: &str) -> Result<ActionPayload, CliError> {
    let mut value: Value = serde_json::from_str(raw)?;
    let Some(object) = value.as_object_mut() else {
        return Err(CliError::InvalidPayload(
            "payload must be a JSON object".to_string(),
        ));
    };

    match object.get("type").and_then(Value::as_str) {
        Some(kind) if kind != action_type.as_str() => {
            return Err(CliError::InvalidPayload(format!(
                "payload type `{kind}` does not match `{action_type}`"
            )));
        }
        Some(_) => {}
        None => {
            object.insert("type".to_string(), Value::from(action_type.as_str()));
        }
    }

    ActionPayload::from_value(value).map_err(|err| CliError::InvalidPayload(err.to_string()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    cli_db_path
        .or_else(|| env::var_os("OFFSYNC_DB_PATH").map(PathBuf::from))
        .map_or_else(default_db_path, Ok)
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("offsync").join("offsync.db"))
        .ok_or(CliError::NoDataDir)
}

pub fn authority_config(authority_url: Option<String>) -> Result<AuthorityConfig, CliError> {
    let Some(url) = normalize_text_option(authority_url) else {
        return Err(CliError::SyncNotConfigured);
    };
    Ok(AuthorityConfig::new(url)?.with_api_token(env::var("OFFSYNC_AUTHORITY_TOKEN").ok()))
}

pub async fn open_database(path: &Path) -> Result<Database, CliError> {
    Ok(Database::open(path).await?)
}

/// Persist a new action for `user_key` without contacting the authority.
pub async fn record_action(
    db: &Database,
    user_key: &str,
    payload: ActionPayload,
) -> Result<Action, CliError> {
    let repo = LibSqlActionRepository::new(db.connection().clone());
    let store = OfflineActionStore::new(repo, false);
    let action = Action::new(user_key, payload);
    store.add_pending_action(action.clone()).await?;
    Ok(action)
}

pub async fn list_pending(db: &Database, user_key: &str) -> Result<Vec<Action>, CliError> {
    let repo = LibSqlActionRepository::new(db.connection().clone());
    Ok(repo.list(user_key, ActionFilter::Pending).await?)
}

/// Coordinator over the local database, starting online.
pub fn build_coordinator<A: RemoteAuthority>(
    db: &Database,
    authority: Arc<A>,
    config: SyncConfig,
) -> LocalCoordinator<A> {
    let conn = db.connection();
    let store = Arc::new(OfflineActionStore::new(
        LibSqlActionRepository::new(conn.clone()),
        true,
    ));
    SyncCoordinator::new(
        store,
        authority,
        LibSqlMetricsRepository::new(conn.clone()),
        LibSqlQueueRepository::new(conn.clone()),
        Arc::new(SystemClock),
        config,
    )
}

pub fn action_to_item(action: &Action, now_ms: i64) -> PendingActionItem {
    PendingActionItem {
        local_id: action.local_id.to_string(),
        action_type: action.action_type.to_string(),
        entity_type: action.entity_type.to_string(),
        entity_id: action.entity_id.clone(),
        payload: action.payload.clone(),
        created_at: action.created_at,
        relative_time: format_relative_time(action.created_at, now_ms),
    }
}

pub fn format_pending_lines(actions: &[Action], now_ms: i64) -> Vec<String> {
    actions
        .iter()
        .map(|action| {
            let entity = format!("{}:{}", action.entity_type, action.entity_id);
            let relative_time = format_relative_time(action.created_at, now_ms);
            format!(
                "{}  {:<16}  {entity}  ({relative_time})",
                action.local_id,
                action.action_type.as_str()
            )
        })
        .collect()
}

pub fn format_queue_lines(items: &[QueueItem], now_ms: i64) -> Vec<String> {
    items
        .iter()
        .map(|item| {
            let line = format!(
                "#{:<5} {:<10}  {:<16}  p{}  retries {}/{}  {}",
                item.id.0,
                item.status.as_str(),
                item.action_type,
                item.priority,
                item.retry_count,
                item.max_retries,
                format_relative_time(item.updated_at, now_ms)
            );
            match &item.error_message {
                Some(error) => format!("{line}  error: {error}"),
                None => line,
            }
        })
        .collect()
}

pub fn format_metrics_lines(entries: &[(String, RetryMetrics)]) -> Vec<String> {
    entries
        .iter()
        .map(|(reason, metrics)| {
            let last = match (metrics.last_outcome, metrics.last.as_ref()) {
                (Some(outcome), Some(meta)) => meta.timestamp_ms.map_or_else(
                    || format!("last {outcome}"),
                    |at| format!("last {outcome} at {}", format_sync_timestamp(at)),
                ),
                (Some(outcome), None) => format!("last {outcome}"),
                _ => "no outcomes yet".to_string(),
            };
            format!(
                "{reason}: {} ok, {} failed, {} consecutive failures; {last}",
                metrics.total_success, metrics.total_failure, metrics.consecutive_failure
            )
        })
        .collect()
}

pub fn format_outcome(outcome: &SyncOutcome) -> String {
    match outcome.retry() {
        Some(retry) => format!(
            "{outcome} (retry in {}s at {})",
            retry.delay.as_secs(),
            format_sync_timestamp(retry.due_at)
        ),
        None => outcome.to_string(),
    }
}

pub fn format_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            let action = &conflict.local_action;
            format!(
                "{}  {:<16}  {}:{}  {} conflict",
                action.local_id,
                action.action_type.as_str(),
                action.entity_type,
                action.entity_id,
                conflict.conflict_type.as_str()
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
