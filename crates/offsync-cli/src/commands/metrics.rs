use std::path::Path;

use offsync_core::db::{LibSqlMetricsRepository, MetricsRepository};

use crate::commands::common::{format_metrics_lines, open_database, MetricsItem};
use crate::error::CliError;

pub async fn run_metrics(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let entries = LibSqlMetricsRepository::new(db.connection().clone())
        .list()
        .await?;

    if as_json {
        let json_items = entries
            .into_iter()
            .map(|(reason, metrics)| MetricsItem { reason, metrics })
            .collect::<Vec<MetricsItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No retry metrics recorded.");
        return Ok(());
    }

    for line in format_metrics_lines(&entries) {
        println!("{line}");
    }
    Ok(())
}
