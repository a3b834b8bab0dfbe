//! Pensum CLI entry point.

use anyhow::Result;
use clap::Parser;
use pensum::cli::{commands, Cli, Commands};
use pensum::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("pensum={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(&std::path::PathBuf::from(path)))?,
        None => Settings::load()?,
    };

    // Ensure data directories exist
    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.temp_dir())?;

    // Execute command
    match cli.command {
        Commands::Ingest {
            reference,
            owner,
            course,
            kind,
        } => {
            commands::run_ingest(&reference, &owner, course, kind, settings).await?;
        }

        Commands::Reprocess {
            video_id,
            all_failed,
            stale,
        } => {
            commands::run_reprocess(video_id, all_failed, stale, settings).await?;
        }

        Commands::Status { video_id } => {
            commands::run_status(video_id, settings)?;
        }

        Commands::List { owner } => {
            commands::run_list(owner, settings)?;
        }

        Commands::Delete { video_id, yes } => {
            commands::run_delete(video_id, yes, settings)?;
        }

        Commands::Search {
            query,
            creator,
            course,
            limit,
        } => {
            commands::run_search(&query, &creator, course, limit, settings).await?;
        }

        Commands::Ask {
            question,
            student,
            creator,
            course,
            session,
        } => {
            commands::run_ask(&question, &student, &creator, course, session, settings).await?;
        }

        Commands::Serve { host, port } => {
            commands::run_serve(host, port, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(&action, settings)?;
        }
    }

    Ok(())
}
