use std::path::Path;
use std::sync::Arc;

use offsync_core::sync::HttpAuthority;
use offsync_core::SyncConfig;
use tokio::signal;
use tracing::{debug, info, warn};

use crate::commands::common::{
    authority_config, build_coordinator, format_conflict_lines, format_outcome,
    format_sync_timestamp, open_database,
};
use crate::error::CliError;

pub async fn run_sync(
    authority_url: Option<String>,
    drain_queue: bool,
    watch: bool,
    as_json: bool,
    user_key: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let authority = authority_config(authority_url)?;
    let config = SyncConfig::from_env()?;
    let client = HttpAuthority::new(&authority, config.request_timeout)?;

    let db = open_database(db_path).await?;
    let coordinator = build_coordinator(&db, Arc::new(client), config);
    let loaded = coordinator.load(user_key).await?;
    debug!(user_key, loaded, "Loaded pending actions");

    if watch {
        if !as_json {
            println!("Watching pending actions for {user_key}; press Ctrl+C to stop");
        }
        coordinator.run(user_key, shutdown_signal()).await?;
    } else {
        let outcome = coordinator.trigger_sync().await?;
        if !as_json {
            println!("Sync {}", format_outcome(&outcome));
        }
    }

    if drain_queue {
        for (id, outcome) in coordinator.drain_queue().await? {
            if !as_json {
                println!("Queue #{id}: {}", format_outcome(&outcome));
            }
        }
    }

    let status = coordinator.status().await;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    if !status.conflicts.is_empty() {
        println!("Conflicts awaiting resolution:");
        for line in format_conflict_lines(&status.conflicts) {
            println!("  {line}");
        }
    }
    if let Some(at) = status.next_retry_at {
        println!("Next retry at {}", format_sync_timestamp(at));
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, stopping sync"),
        () = terminate => info!("Received SIGTERM, stopping sync"),
    }
}
