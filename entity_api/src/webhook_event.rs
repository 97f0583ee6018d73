//! Persistence operations for the webhook_events audit trail.
//!
//! Records are never deleted. Every status change goes through one of the `mark_*`
//! functions so the allowed transitions stay in one place:
//! `processing -> {success, failed}` and `failed -> retrying -> processing`.

use super::error::{EntityApiErrorKind, Error};
use chrono::Utc;
use entity::webhook_event_status::WebhookEventStatus;
use entity::webhook_events::{ActiveModel, Column, Entity, Model, MAX_RETRY_COUNT};
use entity::Id;
use log::*;
use sea_orm::{
    entity::prelude::*,
    sea_query::Expr,
    ActiveValue::{Set, Unchanged},
    ConnectionTrait, FromQueryResult, QueryOrder, QuerySelect,
};

/// Intake data for a new audit record.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub event_type: String,
    pub clerk_id: Option<String>,
    pub payload: Json,
    pub webhook_id: Option<String>,
    pub webhook_timestamp: Option<String>,
}

/// Row of the per-status aggregate used for statistics.
#[derive(Debug, Clone, PartialEq, FromQueryResult)]
pub struct StatusSummary {
    pub status: WebhookEventStatus,
    pub count: i64,
    pub average_duration_ms: Option<f64>,
}

/// Creates the audit record for a delivery in the `processing` state.
pub async fn create(db: &impl ConnectionTrait, new_event: NewWebhookEvent) -> Result<Model, Error> {
    debug!(
        "Recording webhook event {} (delivery {:?})",
        new_event.event_type, new_event.webhook_id
    );

    let now = Utc::now();
    let active_model = ActiveModel {
        event_type: Set(new_event.event_type),
        clerk_id: Set(new_event.clerk_id),
        payload: Set(new_event.payload),
        status: Set(WebhookEventStatus::Processing),
        error_message: Set(None),
        retry_count: Set(0),
        processed_at: Set(None),
        webhook_id: Set(new_event.webhook_id),
        webhook_timestamp: Set(new_event.webhook_timestamp),
        processing_duration_ms: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        ..Default::default()
    };

    Ok(active_model.insert(db).await?)
}

pub async fn find_by_id(db: &impl ConnectionTrait, id: Id) -> Result<Model, Error> {
    Entity::find_by_id(id).one(db).await?.ok_or(Error {
        source: None,
        error_kind: EntityApiErrorKind::RecordNotFound,
    })
}

pub async fn mark_success(
    db: &impl ConnectionTrait,
    event: Model,
    processing_duration_ms: i64,
) -> Result<Model, Error> {
    let now = Utc::now();
    let mut active_model = unchanged(event);
    active_model.status = Set(WebhookEventStatus::Success);
    active_model.error_message = Set(None);
    active_model.processed_at = Set(Some(now.into()));
    active_model.processing_duration_ms = Set(Some(processing_duration_ms));
    active_model.updated_at = Set(now.into());

    Ok(active_model.update(db).await?)
}

pub async fn mark_failed(
    db: &impl ConnectionTrait,
    event: Model,
    error_message: String,
    processing_duration_ms: i64,
) -> Result<Model, Error> {
    Ok(failed(event, error_message, processing_duration_ms)
        .update(db)
        .await?)
}

/// Marks the event failed with no retries left, for failures another attempt cannot fix.
pub async fn mark_dead_letter(
    db: &impl ConnectionTrait,
    event: Model,
    error_message: String,
    processing_duration_ms: i64,
) -> Result<Model, Error> {
    let mut active_model = failed(event, error_message, processing_duration_ms);
    active_model.retry_count = Set(MAX_RETRY_COUNT);

    Ok(active_model.update(db).await?)
}

fn failed(event: Model, error_message: String, processing_duration_ms: i64) -> ActiveModel {
    let now = Utc::now();
    let mut active_model = unchanged(event);
    active_model.status = Set(WebhookEventStatus::Failed);
    active_model.error_message = Set(Some(error_message));
    active_model.processed_at = Set(Some(now.into()));
    active_model.processing_duration_ms = Set(Some(processing_duration_ms));
    active_model.updated_at = Set(now.into());
    active_model
}

/// `failed -> retrying`, consuming one retry attempt.
pub async fn mark_retrying(db: &impl ConnectionTrait, event: Model) -> Result<Model, Error> {
    if !event.is_retryable() {
        warn!(
            "Webhook event {} is not retryable (status={}, retry_count={})",
            event.id, event.status, event.retry_count
        );
        return Err(Error {
            source: None,
            error_kind: EntityApiErrorKind::ValidationError,
        });
    }

    let retry_count = event.retry_count + 1;
    let mut active_model = unchanged(event);
    active_model.status = Set(WebhookEventStatus::Retrying);
    active_model.retry_count = Set(retry_count);
    active_model.updated_at = Set(Utc::now().into());

    // Guarded so two concurrent retries of the same record cannot both claim it.
    Ok(Entity::update(active_model)
        .filter(Column::Status.eq(WebhookEventStatus::Failed))
        .filter(Column::RetryCount.lt(MAX_RETRY_COUNT))
        .exec(db)
        .await?)
}

/// `retrying -> processing`, right before the transactional step runs again.
pub async fn mark_processing(db: &impl ConnectionTrait, event: Model) -> Result<Model, Error> {
    if event.status != WebhookEventStatus::Retrying {
        return Err(Error {
            source: None,
            error_kind: EntityApiErrorKind::ValidationError,
        });
    }

    let mut active_model = unchanged(event);
    active_model.status = Set(WebhookEventStatus::Processing);
    active_model.updated_at = Set(Utc::now().into());

    Ok(Entity::update(active_model)
        .filter(Column::Status.eq(WebhookEventStatus::Retrying))
        .exec(db)
        .await?)
}

/// All failed records, most recent first.
pub async fn find_failed(db: &impl ConnectionTrait) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::Status.eq(WebhookEventStatus::Failed))
        .order_by_desc(Column::UpdatedAt)
        .all(db)
        .await?)
}

/// Failed records that have used up every retry.
pub async fn find_dead_letters(db: &impl ConnectionTrait) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::Status.eq(WebhookEventStatus::Failed))
        .filter(Column::RetryCount.gte(MAX_RETRY_COUNT))
        .order_by_desc(Column::UpdatedAt)
        .all(db)
        .await?)
}

/// Failed records that still have retries left, oldest first.
pub async fn find_retryable(db: &impl ConnectionTrait, limit: u64) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::Status.eq(WebhookEventStatus::Failed))
        .filter(Column::RetryCount.lt(MAX_RETRY_COUNT))
        .order_by_asc(Column::UpdatedAt)
        .limit(limit)
        .all(db)
        .await?)
}

/// Count and average processing duration per status.
pub async fn summarize_by_status(db: &impl ConnectionTrait) -> Result<Vec<StatusSummary>, Error> {
    Ok(Entity::find()
        .select_only()
        .column(Column::Status)
        .column_as(Column::Id.count(), "count")
        .column_as(
            Expr::cust(r#"CAST(AVG("webhook_events"."processing_duration_ms") AS DOUBLE PRECISION)"#),
            "average_duration_ms",
        )
        .group_by(Column::Status)
        .into_model::<StatusSummary>()
        .all(db)
        .await?)
}

fn unchanged(event: Model) -> ActiveModel {
    ActiveModel {
        id: Unchanged(event.id),
        event_type: Unchanged(event.event_type),
        clerk_id: Unchanged(event.clerk_id),
        payload: Unchanged(event.payload),
        status: Unchanged(event.status),
        error_message: Unchanged(event.error_message),
        retry_count: Unchanged(event.retry_count),
        processed_at: Unchanged(event.processed_at),
        webhook_id: Unchanged(event.webhook_id),
        webhook_timestamp: Unchanged(event.webhook_timestamp),
        processing_duration_ms: Unchanged(event.processing_duration_ms),
        created_at: Unchanged(event.created_at),
        updated_at: Unchanged(event.updated_at),
    }
}

#[cfg(test)]
#[cfg(feature = "mock")]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};
    use serde_json::json;

    fn test_event(status: WebhookEventStatus, retry_count: i32) -> Model {
        let now = Utc::now();
        Model {
            id: Id::new_v4(),
            event_type: "user.created".to_string(),
            clerk_id: Some("user_1".to_string()),
            payload: json!({"type": "user.created"}),
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

    #[tokio::test]
    async fn create_starts_in_processing_state() -> Result<(), Error> {
        let event = test_event(WebhookEventStatus::Processing, 0);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![event.clone()]])
            .into_connection();

        let created = create(
            &db,
            NewWebhookEvent {
                event_type: "user.created".to_string(),
                clerk_id: Some("user_1".to_string()),
                payload: json!({"type": "user.created"}),
                webhook_id: Some("msg_1".to_string()),
                webhook_timestamp: Some("1700000000".to_string()),
            },
        )
        .await?;

        assert_eq!(created.status, WebhookEventStatus::Processing);
        assert_eq!(created.retry_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn mark_retrying_rejects_exhausted_event_without_touching_the_database() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let result = mark_retrying(&db, test_event(WebhookEventStatus::Failed, 3)).await;

        assert_eq!(
            result.unwrap_err().error_kind,
            EntityApiErrorKind::ValidationError
        );
        assert!(db.into_transaction_log().is_empty());
    }

    #[tokio::test]
    async fn mark_retrying_increments_retry_count() -> Result<(), Error> {
        let failed = test_event(WebhookEventStatus::Failed, 1);
        let mut retrying = failed.clone();
        retrying.status = WebhookEventStatus::Retrying;
        retrying.retry_count = 2;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![retrying.clone()]])
            .into_connection();

        let result = mark_retrying(&db, failed).await?;
        assert_eq!(result.status, WebhookEventStatus::Retrying);
        assert_eq!(result.retry_count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn mark_dead_letter_uses_up_every_retry() -> Result<(), Error> {
        let processing = test_event(WebhookEventStatus::Processing, 0);
        let mut dead = processing.clone();
        dead.status = WebhookEventStatus::Failed;
        dead.retry_count = MAX_RETRY_COUNT;

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![dead]])
            .into_connection();

        let result = mark_dead_letter(&db, processing, "Invalid record".to_string(), 40).await?;
        assert!(result.is_dead_letter());

        // The update writes retry_count = MAX_RETRY_COUNT.
        let log = format!("{:?}", db.into_transaction_log());
        assert!(log.contains("Int(Some(3))"));
        Ok(())
    }

    #[tokio::test]
    async fn mark_processing_requires_retrying_state() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let result = mark_processing(&db, test_event(WebhookEventStatus::Failed, 1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn find_by_id_returns_not_found_for_missing_event() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<Model, Vec<Model>, _>(vec![vec![]])
            .into_connection();

        let result = find_by_id(&db, Id::new_v4()).await;
        assert_eq!(
            result.unwrap_err().error_kind,
            EntityApiErrorKind::RecordNotFound
        );
    }
}
