//! Operator tooling for the webhook audit trail and session tracking.
//!
//! Shares the server's configuration, so the same `.env` file and environment
//! variables select the database.

use clap::{Parser, Subcommand};
use domain::error::{DomainErrorKind, Error, InternalErrorKind};
use domain::Id;
use log::*;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use service::{config::Config, logging::Logger};

#[derive(Debug, Parser)]
#[command(author, version, about = "Inspect and repair webhook processing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    config: Config,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List failed webhook events
    Failed,
    /// List failed webhook events with no retries left
    DeadLetters,
    /// Run another attempt for a failed webhook event
    Retry {
        /// Id of the webhook event record
        id: Id,
    },
    /// Show webhook event counts per status
    Stats,
    /// Delete sessions created longer ago than the given age
    CleanupSessions {
        /// Defaults to the configured SESSION_CLEANUP_MAX_AGE_DAYS
        #[arg(long)]
        max_age_days: Option<u32>,
    },
    /// Show session statistics for one local user
    SessionStats {
        /// Local user id
        user_id: Id,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    if let Err(e) = Logger::init_logger(&cli.config) {
        eprintln!("Failed to initialize logger: {e}");
    }

    let db = match service::init_database(&cli.config).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to establish database connection: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&cli.command, &cli.config, &db).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(command: &Command, config: &Config, db: &DatabaseConnection) -> Result<(), Error> {
    match command {
        Command::Failed => print(&domain::webhook_event::list_failed_events(db).await?),
        Command::DeadLetters => print(&domain::webhook_event::list_dead_letter_events(db).await?),
        Command::Retry { id } => {
            let event = domain::webhook_event::retry_failed_event(
                db,
                *id,
                config.webhook_processing_timeout(),
            )
            .await?;
            print(&event)
        }
        Command::Stats => print(&domain::webhook_event::get_stats(db).await?),
        Command::CleanupSessions { max_age_days } => {
            let max_age_days = max_age_days.unwrap_or(config.session_cleanup_max_age_days);
            let deleted = domain::user_session::cleanup_expired_sessions(db, max_age_days).await?;
            print(&serde_json::json!({ "deleted": deleted, "max_age_days": max_age_days }))
        }
        Command::SessionStats { user_id } => {
            print(&domain::user_session::get_session_stats(db, *user_id).await?)
        }
    }
}

fn print<T: Serialize>(value: &T) -> Result<(), Error> {
    let output = serde_json::to_string_pretty(value).map_err(|e| Error {
        source: Some(Box::new(e)),
        error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(
            "Failed to render output".to_string(),
        )),
    })?;
    println!("{output}");
    Ok(())
}
