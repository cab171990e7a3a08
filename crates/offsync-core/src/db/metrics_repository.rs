//! Retry metrics storage, one row per job reason

use crate::error::Result;
use crate::models::RetryMetrics;
use libsql::{params, Connection};

/// Trait for metrics storage operations (async)
#[allow(async_fn_in_trait)]
pub trait MetricsRepository {
    /// Load metrics for a reason; unknown reasons start from zero
    async fn load(&self, reason: &str) -> Result<RetryMetrics>;

    async fn save(&self, reason: &str, metrics: &RetryMetrics, now: i64) -> Result<()>;

    /// All reasons, alphabetically
    async fn list(&self) -> Result<Vec<(String, RetryMetrics)>>;
}

/// libSQL implementation of `MetricsRepository`
#[derive(Clone)]
pub struct LibSqlMetricsRepository {
    conn: Connection,
}

impl LibSqlMetricsRepository {
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl MetricsRepository for LibSqlMetricsRepository {
    async fn load(&self, reason: &str) -> Result<RetryMetrics> {
        let mut rows = self
            .conn
            .query("SELECT metrics FROM retry_metrics WHERE reason = ?", [reason])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(serde_json::from_str(&row.get::<String>(0)?)?),
            None => Ok(RetryMetrics::default()),
        }
    }

    async fn save(&self, reason: &str, metrics: &RetryMetrics, now: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO retry_metrics (reason, metrics, updated_at)
                 VALUES (?, ?, ?)",
                params![reason, serde_json::to_string(metrics)?, now],
            )
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, RetryMetrics)>> {
        let mut rows = self
            .conn
            .query("SELECT reason, metrics FROM retry_metrics ORDER BY reason", ())
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            let reason: String = row.get(0)?;
            let metrics = serde_json::from_str(&row.get::<String>(1)?)?;
            entries.push((reason, metrics));
        }
        Ok(entries)
    }
}
