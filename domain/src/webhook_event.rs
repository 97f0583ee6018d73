//! Applies validated webhook events and keeps their audit trail.
//!
//! Every delivery gets an audit record in the `processing` state before any business
//! data is touched. The business side effects then run inside a single database
//! transaction bounded by a timeout. The audit record is finalized outside that
//! transaction so a rolled back event still leaves a `failed` record behind for
//! inspection and retry.

use crate::error::{DomainErrorKind, Error, InternalErrorKind, WebhookErrorKind};
use crate::webhook::dispatch::{dispatch, EventHandler};
use crate::webhook::envelope::{EventData, WebhookEnvelope};
use crate::webhook::validation;
use crate::webhook_event_status::WebhookEventStatus;
use crate::{user, user_session, webhook_events, Id};
use chrono::{DateTime, Utc};
use entity_api::error::EntityApiErrorKind;
use entity_api::webhook_event::{self as audit, NewWebhookEvent, StatusSummary};
use log::*;
use sea_orm::{ConnectionTrait, DatabaseConnection, DatabaseTransaction, TransactionTrait};
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};

pub use entity_api::webhook_event::find_by_id;
pub use entity_api::webhook_events::MAX_RETRY_COUNT;

/// Failed records examined per automatic retry sweep.
const RETRY_BATCH_SIZE: u64 = 50;

/// One delivery, ready to be applied.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub envelope: WebhookEnvelope,
    /// `svix-id` of the delivery.
    pub delivery_id: Option<String>,
    /// `svix-timestamp` of the delivery, as received.
    pub delivery_timestamp: Option<String>,
}

/// Records the event, applies it in a transaction and finalizes the audit record.
///
/// On failure the returned error has kind `WebhookErrorKind::ProcessingFailed` with
/// the handler's error as its source; the audit record is left `failed`.
pub async fn process_with_transaction(
    db: &DatabaseConnection,
    ctx: ProcessingContext,
    timeout: Duration,
) -> Result<webhook_events::Model, Error> {
    let started = Instant::now();
    let event = audit::create(
        db,
        NewWebhookEvent {
            event_type: ctx.envelope.event_type.clone(),
            clerk_id: ctx.envelope.clerk_id(),
            payload: ctx.envelope.raw.clone(),
            webhook_id: ctx.delivery_id,
            webhook_timestamp: ctx.delivery_timestamp,
        },
    )
    .await?;

    apply(db, event, &ctx.envelope, timeout, started).await
}

/// Runs another attempt for a failed event, re-validating its stored payload.
pub async fn retry_failed_event(
    db: &DatabaseConnection,
    id: Id,
    timeout: Duration,
) -> Result<webhook_events::Model, Error> {
    let event = find_by_id(db, id).await?;
    retry_event(db, event, timeout).await
}

async fn retry_event(
    db: &DatabaseConnection,
    event: webhook_events::Model,
    timeout: Duration,
) -> Result<webhook_events::Model, Error> {
    if !event.is_retryable() {
        return Err(Error::webhook(
            WebhookErrorKind::NotRetryable,
            format!(
                "Webhook event {} is {} after {} of {MAX_RETRY_COUNT} retries",
                event.id, event.status, event.retry_count
            ),
        ));
    }

    let id = event.id;
    let event = audit::mark_retrying(db, event).await.map_err(|err| {
        if err.error_kind == EntityApiErrorKind::RecordNotUpdated {
            Error::webhook(
                WebhookErrorKind::NotRetryable,
                format!("Webhook event {id} was claimed by another retry"),
            )
        } else {
            Error::from(err)
        }
    })?;
    info!(
        "Retrying webhook event {} ({}), attempt {} of {MAX_RETRY_COUNT}",
        event.id, event.event_type, event.retry_count
    );

    let event = audit::mark_processing(db, event).await?;
    let started = Instant::now();

    match validation::validate(&event.payload) {
        Ok(envelope) => apply(db, event, &envelope, timeout, started).await,
        Err(validation_error) => {
            let err = Error::from(validation_error);
            record_failure(db, event, &err, elapsed_ms(started)).await?;
            Err(Error::processing_failed(err))
        }
    }
}

async fn apply(
    db: &DatabaseConnection,
    event: webhook_events::Model,
    envelope: &WebhookEnvelope,
    timeout: Duration,
    started: Instant,
) -> Result<webhook_events::Model, Error> {
    let outcome = run_in_transaction(db, envelope, timeout).await;
    let duration_ms = elapsed_ms(started);

    match outcome {
        Ok(()) => {
            let event = audit::mark_success(db, event, duration_ms).await?;
            info!(
                "Processed webhook event {} ({}) in {duration_ms}ms",
                event.id, event.event_type
            );
            Ok(event)
        }
        Err(err) => {
            warn!(
                "Webhook event {} ({}) failed after {duration_ms}ms: {err}",
                event.id, event.event_type
            );
            if let Err(audit_err) = record_failure(db, event, &err, duration_ms).await {
                error!("Could not record webhook event failure: {audit_err}");
            }
            Err(Error::processing_failed(err))
        }
    }
}

/// Transient failures stay retryable. Anything another attempt cannot fix goes
/// straight to the dead letters.
async fn record_failure(
    db: &DatabaseConnection,
    event: webhook_events::Model,
    err: &Error,
    duration_ms: i64,
) -> Result<webhook_events::Model, Error> {
    if err.is_transient() {
        Ok(audit::mark_failed(db, event, err.to_string(), duration_ms).await?)
    } else {
        info!(
            "Webhook event {} failed permanently, moving it to the dead letters",
            event.id
        );
        Ok(audit::mark_dead_letter(db, event, err.to_string(), duration_ms).await?)
    }
}

async fn run_in_transaction(
    db: &DatabaseConnection,
    envelope: &WebhookEnvelope,
    timeout: Duration,
) -> Result<(), Error> {
    let txn = db.begin().await?;
    let result = within(timeout, &envelope.event_type, handle_event(&txn, envelope)).await;

    match result {
        Ok(()) => {
            txn.commit().await?;
            Ok(())
        }
        Err(err) => {
            rollback(txn).await;
            Err(err)
        }
    }
}

async fn within<T>(
    timeout: Duration,
    event_type: &str,
    work: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::time::timeout(timeout, work).await.map_err(|_| {
        Error::timeout(format!(
            "Processing {event_type} exceeded {}ms",
            timeout.as_millis()
        ))
    })?
}

async fn rollback(txn: DatabaseTransaction) {
    if let Err(err) = txn.rollback().await {
        warn!("Rolling back webhook transaction failed: {err}");
    }
}

async fn handle_event(db: &impl ConnectionTrait, envelope: &WebhookEnvelope) -> Result<(), Error> {
    match (dispatch(&envelope.event_type), &envelope.data) {
        (EventHandler::UpsertUser, EventData::User(data)) => {
            user::upsert_from_event(db, data).await?;
        }
        (EventHandler::DeleteUser, EventData::User(data)) => {
            user::delete_by_clerk_id(db, &data.id).await?;
        }
        (EventHandler::CreateSession, EventData::Session(data)) => {
            user_session::start_from_event(db, data).await?;
        }
        (EventHandler::EndSession, EventData::Session(data)) => {
            user_session::end_from_event(db, data).await?;
        }
        (EventHandler::NoOp, _) => {
            info!(
                "No handler for webhook event type {}, acknowledging",
                envelope.event_type
            );
        }
        (handler, _) => {
            return Err(Error {
                source: None,
                error_kind: DomainErrorKind::Internal(InternalErrorKind::Other(format!(
                    "{handler:?} cannot apply {} data",
                    envelope.event_type
                ))),
            });
        }
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// Delay before the next automatic attempt: `base * 2^retry_count`.
pub fn retry_backoff(retry_count: i32, base: Duration) -> Duration {
    let exponent = u32::try_from(retry_count).unwrap_or(0);
    base.saturating_mul(2u32.saturating_pow(exponent))
}

pub fn is_due_for_retry(event: &webhook_events::Model, now: DateTime<Utc>, base: Duration) -> bool {
    if !event.is_retryable() {
        return false;
    }
    chrono::Duration::from_std(retry_backoff(event.retry_count, base))
        .ok()
        .and_then(|backoff| event.updated_at.checked_add_signed(backoff))
        .is_some_and(|due_at| due_at <= now)
}

/// Outcome of one automatic retry sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetrySweep {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Retries every failed event whose backoff has elapsed, oldest first.
pub async fn retry_due_events(
    db: &DatabaseConnection,
    base_backoff: Duration,
    timeout: Duration,
) -> Result<RetrySweep, Error> {
    let now = Utc::now();
    let candidates = audit::find_retryable(db, RETRY_BATCH_SIZE).await?;

    let mut sweep = RetrySweep::default();
    for event in candidates
        .into_iter()
        .filter(|event| is_due_for_retry(event, now, base_backoff))
    {
        sweep.attempted += 1;
        let id = event.id;
        match retry_event(db, event, timeout).await {
            Ok(_) => sweep.succeeded += 1,
            Err(err) => {
                sweep.failed += 1;
                debug!("Automatic retry of webhook event {id} failed: {err}");
            }
        }
    }

    if sweep.attempted > 0 {
        info!(
            "Webhook retry sweep: {} attempted, {} succeeded, {} failed",
            sweep.attempted, sweep.succeeded, sweep.failed
        );
    }
    Ok(sweep)
}

pub async fn list_failed_events(
    db: &impl ConnectionTrait,
) -> Result<Vec<webhook_events::Model>, Error> {
    Ok(audit::find_failed(db).await?)
}

/// Failed events with no retries left.
pub async fn list_dead_letter_events(
    db: &impl ConnectionTrait,
) -> Result<Vec<webhook_events::Model>, Error> {
    Ok(audit::find_dead_letters(db).await?)
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct WebhookEventStats {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub processing: i64,
    pub retrying: i64,
    /// Over successful events only.
    pub average_processing_duration_ms: Option<f64>,
}

impl WebhookEventStats {
    pub fn from_summaries(summaries: &[StatusSummary]) -> Self {
        summaries
            .iter()
            .fold(WebhookEventStats::default(), |mut stats, summary| {
                stats.total += summary.count;
                match summary.status {
                    WebhookEventStatus::Success => {
                        stats.success = summary.count;
                        stats.average_processing_duration_ms = summary.average_duration_ms;
                    }
                    WebhookEventStatus::Failed => stats.failed = summary.count,
                    WebhookEventStatus::Processing => stats.processing = summary.count,
                    WebhookEventStatus::Retrying => stats.retrying = summary.count,
                }
                stats
            })
    }
}

pub async fn get_stats(db: &impl ConnectionTrait) -> Result<WebhookEventStats, Error> {
    let summaries = audit::summarize_by_status(db).await?;
    Ok(WebhookEventStats::from_summaries(&summaries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn audit_record(status: WebhookEventStatus, retry_count: i32) -> webhook_events::Model {
        let now = Utc::now();
        webhook_events::Model {
            id: Id::new_v4(),
            event_type: "user.created".to_string(),
            clerk_id: Some("user_1".to_string()),
            payload: json!({
                "type": "user.created",
                "object": "event",
                "data": {
                    "id": "user_1",
                    "email_addresses": [{"id": "idn_1", "email_address": "a@b.co"}],
                    "created_at": 1_700_000_000,
                    "updated_at": 1_700_000_000
                }
            }),
            status,
            error_message: None,
            retry_count,
            processed_at: None,
            webhook_id: Some("msg_1".to_string()),
            webhook_timestamp: Some("1700000000".to_string()),
            processing_duration_ms: None,
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(30);
        assert_eq!(retry_backoff(0, base), Duration::from_secs(30));
        assert_eq!(retry_backoff(1, base), Duration::from_secs(60));
        assert_eq!(retry_backoff(2, base), Duration::from_secs(120));
    }

    #[test]
    fn failed_event_is_due_once_its_backoff_elapsed() {
        let event = audit_record(WebhookEventStatus::Failed, 1);
        let base = Duration::from_secs(30);
        let updated_at = event.updated_at.with_timezone(&Utc);

        assert!(!is_due_for_retry(&event, updated_at + chrono::Duration::seconds(59), base));
        assert!(is_due_for_retry(&event, updated_at + chrono::Duration::seconds(60), base));
    }

    #[test]
    fn exhausted_or_successful_events_are_never_due() {
        let far_future = Utc::now() + chrono::Duration::days(365);
        let base = Duration::from_secs(1);

        let exhausted = audit_record(WebhookEventStatus::Failed, MAX_RETRY_COUNT);
        assert!(!is_due_for_retry(&exhausted, far_future, base));

        let succeeded = audit_record(WebhookEventStatus::Success, 0);
        assert!(!is_due_for_retry(&succeeded, far_future, base));
    }

    #[test]
    fn stats_fold_per_status_summaries() {
        let stats = WebhookEventStats::from_summaries(&[
            StatusSummary {
                status: WebhookEventStatus::Success,
                count: 8,
                average_duration_ms: Some(12.5),
            },
            StatusSummary {
                status: WebhookEventStatus::Failed,
                count: 2,
                average_duration_ms: Some(400.0),
            },
        ]);

        assert_eq!(stats.total, 10);
        assert_eq!(stats.success, 8);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.retrying, 0);
        assert_eq!(stats.average_processing_duration_ms, Some(12.5));
    }
}
