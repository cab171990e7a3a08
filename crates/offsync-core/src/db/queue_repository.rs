//! Retry queue storage

use crate::error::{Error, Result};
use crate::models::{QueueItem, QueueItemDraft, QueueItemId, QueueStatus};
use libsql::params::IntoParams;
use libsql::{params, Connection, Row};

const SELECT_COLUMNS: &str = "SELECT id, action_type, payload, priority, status, retry_count,
        max_retries, error_message, created_at, updated_at
     FROM sync_queue";

/// Trait for queue item storage (async)
#[allow(async_fn_in_trait)]
pub trait QueueRepository {
    /// Persist a new `pending` item
    async fn enqueue(&self, draft: &QueueItemDraft, now: i64) -> Result<QueueItem>;

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>>;

    /// Most recently created items first
    async fn list_recent(&self, limit: usize) -> Result<Vec<QueueItem>>;

    /// Pending items and failed items with retries left, by priority
    async fn list_retryable(&self) -> Result<Vec<QueueItem>>;

    /// Persist a status transition
    async fn update(&self, item: &QueueItem) -> Result<()>;
}

/// libSQL implementation of `QueueRepository`
#[derive(Clone)]
pub struct LibSqlQueueRepository {
    conn: Connection,
}

impl LibSqlQueueRepository {
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &Row) -> Result<QueueItem> {
        Ok(QueueItem {
            id: QueueItemId(row.get(0)?),
            action_type: row.get(1)?,
            payload: serde_json::from_str(&row.get::<String>(2)?)?,
            priority: row.get(3)?,
            status: row.get::<String>(4)?.parse()?,
            retry_count: to_u32(row.get(5)?)?,
            max_retries: to_u32(row.get(6)?)?,
            error_message: row.get::<Option<String>>(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    async fn query_items(&self, sql: &str, params: impl IntoParams) -> Result<Vec<QueueItem>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_item(&row)?);
        }
        Ok(items)
    }
}

fn to_u32(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Database(format!("counter out of range: {value}")))
}

impl QueueRepository for LibSqlQueueRepository {
    async fn enqueue(&self, draft: &QueueItemDraft, now: i64) -> Result<QueueItem> {
        let action_type = draft.action_type.trim();
        if action_type.is_empty() {
            return Err(Error::InvalidInput("queue action type must not be empty".into()));
        }

        self.conn
            .execute(
                "INSERT INTO sync_queue (
                    action_type, payload, priority, status, retry_count, max_retries,
                    created_at, updated_at
                 ) VALUES (?, ?, ?, 'pending', 0, ?, ?, ?)",
                params![
                    action_type,
                    serde_json::to_string(&draft.payload)?,
                    draft.priority,
                    i64::from(draft.max_retries),
                    now,
                    now,
                ],
            )
            .await?;

        let id = QueueItemId(self.conn.last_insert_rowid());
        self.get(id)
            .await?
            .ok_or_else(|| Error::Database(format!("queue item {id} missing after insert")))
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        Ok(self.query_items(&sql, [id.0]).await?.into_iter().next())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id DESC LIMIT ?");
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_items(&sql, [limit]).await
    }

    async fn list_retryable(&self) -> Result<Vec<QueueItem>> {
        let sql = format!(
            "{SELECT_COLUMNS}
             WHERE status = 'pending' OR (status = 'failed' AND retry_count < max_retries)
             ORDER BY priority DESC, created_at ASC, id ASC"
        );
        self.query_items(&sql, ()).await
    }

    async fn update(&self, item: &QueueItem) -> Result<()> {
        let stored = self
            .get(item.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("queue item {}", item.id)))?;
        if stored.status == QueueStatus::Completed && stored != *item {
            return Err(Error::InvalidState(format!(
                "queue item {} is completed and immutable",
                item.id
            )));
        }
        if item.retry_count > item.max_retries {
            return Err(Error::InvalidState(format!(
                "queue item {} exceeds its retry limit",
                item.id
            )));
        }

        self.conn
            .execute(
                "UPDATE sync_queue
                 SET status = ?, retry_count = ?, max_retries = ?, error_message = ?,
                     priority = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    item.status.as_str(),
                    i64::from(item.retry_count),
                    i64::from(item.max_retries),
                    item.error_message.clone(),
                    item.priority,
                    item.updated_at,
                    item.id.0,
                ],
            )
            .await?;
        Ok(())
    }
}
