mod cli;
mod commands;
mod error;


use clap::{CommandFactory, Parser};
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, QueueCommands};
use crate::commands::add::run_add;
use crate::commands::common::{resolve_db_path, PayloadFlags};
use crate::commands::completions::run_completions;
use crate::commands::metrics::run_metrics;
use crate::commands::pending::run_pending;
use crate::commands::queue::{queue_draft, run_queue_add, run_queue_list};
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let default_directive = "offsync=info"
        .parse::<Directive>()
        .unwrap_or_else(|_| LevelFilter::INFO.into());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    if let Commands::Completions { shell, output } = &command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path)?;
    let user = cli.user.as_str();

    match command {
        Commands::Add {
            action_type,
            target,
            content,
            topic,
            name,
            description,
            fields,
            payload,
        } => {
            let flags = PayloadFlags {
                target,
                content,
                topic,
                name,
                description,
                fields,
            };
            run_add(action_type, flags, payload.as_deref(), user, &db_path).await?;
        }
        Commands::Pending { json } => run_pending(json, user, &db_path).await?,
        Commands::Sync {
            authority_url,
            no_queue,
            watch,
            json,
        } => run_sync(authority_url, !no_queue, watch, json, user, &db_path).await?,
        Commands::Queue { command } => match command {
            QueueCommands::Add {
                kind,
                payload,
                priority,
                max_retries,
            } => {
                let draft = queue_draft(&kind, payload.as_deref(), priority, max_retries)?;
                run_queue_add(draft, &db_path).await?;
            }
            QueueCommands::List { json } => run_queue_list(json, &db_path).await?,
        },
        Commands::Metrics { json } => run_metrics(json, &db_path).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
