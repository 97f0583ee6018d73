use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a received webhook delivery.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, EnumIter, Deserialize, Default, Serialize, DeriveActiveEnum,
)]
#[serde(rename_all = "lowercase")]
#[sea_orm(
    rs_type = "String",
    db_type = "Enum",
    enum_name = "webhook_event_status"
)]
pub enum WebhookEventStatus {
    /// Received and currently being applied
    #[sea_orm(string_value = "processing")]
    #[default]
    Processing,
    /// Side effects committed
    #[sea_orm(string_value = "success")]
    Success,
    /// Side effects rolled back; see `error_message`
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Picked up for another attempt
    #[sea_orm(string_value = "retrying")]
    Retrying,
}

impl std::fmt::Display for WebhookEventStatus {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookEventStatus::Processing => write!(fmt, "processing"),
            WebhookEventStatus::Success => write!(fmt, "success"),
            WebhookEventStatus::Failed => write!(fmt, "failed"),
            WebhookEventStatus::Retrying => write!(fmt, "retrying"),
        }
    }
}
