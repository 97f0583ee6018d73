use log::*;
use sea_orm::DatabaseConnection;
use service::{config::Config, logging::Logger, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to initialize logger: {e}");
    }

    info!("Starting up...");

    let db = match service::init_database(&config).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to establish database connection: {e}");
            std::process::exit(1);
        }
    };

    spawn_webhook_retry_worker(&config, &db);
    spawn_session_cleanup_worker(&config, &db);

    let app_state = AppState::new(config, &db);
    if let Err(e) = web::init_server(app_state).await {
        error!("Server stopped: {e}");
        std::process::exit(1);
    }
}

fn spawn_webhook_retry_worker(config: &Config, db: &Arc<DatabaseConnection>) {
    if config.webhook_retry_interval_secs == 0 {
        info!("Automatic webhook retries are disabled");
        return;
    }

    let period = Duration::from_secs(config.webhook_retry_interval_secs);
    let base_backoff = config.webhook_retry_base_backoff();
    let timeout = config.webhook_processing_timeout();
    let db = Arc::clone(db);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) =
                domain::webhook_event::retry_due_events(&db, base_backoff, timeout).await
            {
                warn!("Webhook retry sweep failed: {e}");
            }
        }
    });
}

fn spawn_session_cleanup_worker(config: &Config, db: &Arc<DatabaseConnection>) {
    if config.session_cleanup_interval_secs == 0 {
        info!("Session cleanup is disabled");
        return;
    }

    let period = Duration::from_secs(config.session_cleanup_interval_secs);
    let max_age_days = config.session_cleanup_max_age_days;
    let db = Arc::clone(db);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) =
                domain::user_session::cleanup_expired_sessions(db.as_ref(), max_age_days).await
            {
                warn!("Session cleanup failed: {e}");
            }
        }
    });
}
