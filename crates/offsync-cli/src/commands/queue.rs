use std::path::Path;

use offsync_core::db::{LibSqlQueueRepository, QueueRepository};
use offsync_core::models::{QueueItem, QueueItemDraft};
use offsync_core::util::normalize_text_option;
use offsync_core::SyncConfig;
use serde_json::Value;

use crate::commands::common::{format_queue_lines, now_ms, open_database};
use crate::error::CliError;

pub async fn run_queue_add(draft: QueueItemDraft, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let item = enqueue(&LibSqlQueueRepository::new(db.connection().clone()), &draft).await?;
    println!("{}", item.id);
    Ok(())
}

pub async fn run_queue_list(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let limit = SyncConfig::from_env()?.queue_history_limit;
    let db = open_database(db_path).await?;
    let repo = LibSqlQueueRepository::new(db.connection().clone());
    let items = repo.list_recent(limit).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_queue_lines(&items, now_ms()) {
        println!("{line}");
    }
    Ok(())
}

pub fn queue_draft(
    kind: &str,
    payload: Option<&str>,
    priority: i32,
    max_retries: u32,
) -> Result<QueueItemDraft, CliError> {
    let kind = normalize_text_option(Some(kind.to_string()))
        .ok_or_else(|| CliError::InvalidPayload("queue request kind cannot be empty".into()))?;
    let payload = match payload {
        Some(raw) => serde_json::from_str(raw)?,
        None => Value::Object(serde_json::Map::new()),
    };
    Ok(QueueItemDraft::new(kind, payload)
        .with_priority(priority)
        .with_max_retries(max_retries))
}

pub async fn enqueue<Q: QueueRepository>(
    repo: &Q,
    draft: &QueueItemDraft,
) -> Result<QueueItem, CliError> {
    Ok(repo.enqueue(draft, now_ms()).await?)
}
