//! Durable pending-action storage

use crate::error::{Error, Result};
use crate::models::{Action, ActionId, ActionPayload};
use libsql::{params, Connection, Row};

/// Which actions `ActionRepository::list` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionFilter {
    /// Not yet accepted by the authority
    #[default]
    Pending,
    Synced,
    All,
}

/// Trait for durable action storage (async)
#[allow(async_fn_in_trait)]
pub trait ActionRepository {
    /// List actions for a user scope, oldest first
    async fn list(&self, user_key: &str, filter: ActionFilter) -> Result<Vec<Action>>;

    /// Insert or replace by `local_id`
    async fn save(&self, action: &Action) -> Result<()>;

    /// Delete by `local_id`; deleting a missing row is not an error
    async fn delete(&self, local_id: &ActionId) -> Result<()>;
}

/// libSQL implementation of `ActionRepository`
#[derive(Clone)]
pub struct LibSqlActionRepository {
    conn: Connection,
}

impl LibSqlActionRepository {
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn parse_action(row: &Row) -> Result<Action> {
        let payload = ActionPayload::from_json(&row.get::<String>(6)?)?;
        let action_type = row.get::<String>(3)?.parse()?;
        if payload.action_type() != action_type {
            return Err(Error::Database(format!(
                "stored payload type {} does not match action type {action_type}",
                payload.action_type()
            )));
        }

        Ok(Action {
            local_id: row.get::<String>(0)?.parse()?,
            remote_id: row.get::<Option<String>>(1)?,
            user_key: row.get(2)?,
            action_type,
            entity_type: row.get::<String>(4)?.parse()?,
            entity_id: row.get(5)?,
            payload,
            created_at: row.get(7)?,
            is_synced: row.get::<i64>(8)? != 0,
            synced_at: row.get::<Option<i64>>(9)?,
        })
    }
}

impl ActionRepository for LibSqlActionRepository {
    async fn list(&self, user_key: &str, filter: ActionFilter) -> Result<Vec<Action>> {
        let clause = match filter {
            ActionFilter::Pending => "AND is_synced = 0",
            ActionFilter::Synced => "AND is_synced = 1",
            ActionFilter::All => "",
        };
        let sql = format!(
            "SELECT local_id, remote_id, user_key, action_type, entity_type, entity_id,
                    payload, created_at, is_synced, synced_at
             FROM offline_actions
             WHERE user_key = ? {clause}
             ORDER BY created_at ASC, local_id ASC"
        );

        let mut rows = self.conn.query(&sql, [user_key]).await?;
        let mut actions = Vec::new();
        while let Some(row) = rows.next().await? {
            actions.push(Self::parse_action(&row)?);
        }
        Ok(actions)
    }

    async fn save(&self, action: &Action) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO offline_actions (
                    local_id, remote_id, user_key, action_type, entity_type, entity_id,
                    payload, created_at, is_synced, synced_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(local_id) DO UPDATE SET
                    remote_id = excluded.remote_id,
                    payload = excluded.payload,
                    is_synced = excluded.is_synced,
                    synced_at = excluded.synced_at",
                params![
                    action.local_id.as_str(),
                    action.remote_id.clone(),
                    action.user_key.as_str(),
                    action.action_type.as_str(),
                    action.entity_type.as_str(),
                    action.entity_id.as_str(),
                    action.payload.to_json()?,
                    action.created_at,
                    i64::from(action.is_synced),
                    action.synced_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, local_id: &ActionId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM offline_actions WHERE local_id = ?",
                [local_id.as_str()],
            )
            .await?;
        Ok(())
    }
}
