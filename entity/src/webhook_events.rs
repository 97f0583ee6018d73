//! SeaORM Entity for the webhook_events table.
//! Append-only audit trail of every webhook delivery received from the identity provider.

use crate::webhook_event_status::WebhookEventStatus;
use crate::Id;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of retries allowed before a failed event is left for operator handling.
pub const MAX_RETRY_COUNT: i32 = 3;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(schema_name = "sync_platform", table_name = "webhook_events")]
pub struct Model {
    #[serde(skip_deserializing)]
    #[sea_orm(primary_key)]
    pub id: Id,

    /// Dotted event name, e.g. `user.created`
    pub event_type: String,

    /// External subject id the event refers to, when one could be determined
    pub clerk_id: Option<String>,

    /// The full envelope exactly as it was received
    pub payload: Json,

    pub status: WebhookEventStatus,

    pub error_message: Option<String>,

    pub retry_count: i32,

    pub processed_at: Option<DateTimeWithTimeZone>,

    /// Delivery id from the `svix-id` header
    pub webhook_id: Option<String>,

    /// Delivery timestamp from the `svix-timestamp` header
    pub webhook_timestamp: Option<String>,

    pub processing_duration_ms: Option<i64>,

    #[serde(skip_deserializing)]
    pub created_at: DateTimeWithTimeZone,

    #[serde(skip_deserializing)]
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// A record may be retried while it is failed and has attempts left.
    pub fn is_retryable(&self) -> bool {
        self.status == WebhookEventStatus::Failed && self.retry_count < MAX_RETRY_COUNT
    }

    /// Failed with no retries left.
    pub fn is_dead_letter(&self) -> bool {
        self.status == WebhookEventStatus::Failed && self.retry_count >= MAX_RETRY_COUNT
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(status: WebhookEventStatus, retry_count: i32) -> Model {
        let now = Utc::now();
        Model {
            id: Id::new_v4(),
            event_type: "user.created".to_string(),
            clerk_id: Some("user_1".to_string()),
            payload: json!({}),
            status,
            error_message: None,
            retry_count,
            processed_at: None,
            webhook_id: None,
            webhook_timestamp: None,
            processing_duration_ms: None,
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[test]
    fn failed_event_with_attempts_left_is_retryable() {
        assert!(event(WebhookEventStatus::Failed, 0).is_retryable());
        assert!(event(WebhookEventStatus::Failed, 2).is_retryable());
    }

    #[test]
    fn event_is_not_retryable_once_retry_count_reaches_three() {
        let exhausted = event(WebhookEventStatus::Failed, 3);
        assert!(!exhausted.is_retryable());
        assert!(exhausted.is_dead_letter());
        assert!(!event(WebhookEventStatus::Retrying, 3).is_retryable());
    }

    #[test]
    fn only_failed_events_are_retryable() {
        assert!(!event(WebhookEventStatus::Success, 0).is_retryable());
        assert!(!event(WebhookEventStatus::Processing, 0).is_retryable());
        assert!(!event(WebhookEventStatus::Retrying, 1).is_retryable());
    }
}
