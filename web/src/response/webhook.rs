//! Response bodies for the identity provider webhook endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use domain::webhook::validation::{ValidationCategory, ValidationError};
use domain::webhook::DeliveryHeaders;
use serde::Serialize;

const SIGNATURE_GUIDANCE: &str =
    "Sign the raw request body with the endpoint's signing secret and send the svix-id, svix-timestamp and svix-signature headers unchanged.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebhookAccepted {
    success: bool,
    message: String,
    event_type: String,
}

impl WebhookAccepted {
    pub(crate) fn new(event_type: String) -> Self {
        Self {
            success: true,
            message: format!("Processed {event_type} event"),
            event_type,
        }
    }
}

impl IntoResponse for WebhookAccepted {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Echoes what was received about the delivery. The signature itself is never returned.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeliverySummary {
    id: Option<String>,
    timestamp: Option<String>,
    has_signature: bool,
}

impl From<&DeliveryHeaders> for DeliverySummary {
    fn from(delivery: &DeliveryHeaders) -> Self {
        Self {
            id: delivery.id.clone(),
            timestamp: delivery.timestamp.clone(),
            has_signature: delivery.has_signature(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct WebhookRejection {
    #[serde(skip)]
    status: StatusCode,
    success: bool,
    error: &'static str,
    message: String,
    category: ValidationCategory,
    webhook: DeliverySummary,
    guidance: &'static str,
}

impl WebhookRejection {
    /// Any authenticity failure. The specific reason stays in the server logs.
    pub(crate) fn unauthenticated(delivery: &DeliveryHeaders) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            success: false,
            error: "Webhook validation failed",
            message: "Webhook signature verification failed".to_string(),
            category: ValidationCategory::GeneralValidationError,
            webhook: delivery.into(),
            guidance: SIGNATURE_GUIDANCE,
        }
    }

    pub(crate) fn invalid(err: &ValidationError, delivery: &DeliveryHeaders) -> Self {
        let status = match err.category {
            ValidationCategory::UnknownEventType => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_REQUEST,
        };
        Self {
            status,
            success: false,
            error: "Webhook validation failed",
            message: err.message(),
            category: err.category,
            webhook: delivery.into(),
            guidance: err.guidance(),
        }
    }
}

impl IntoResponse for WebhookRejection {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejection_never_echoes_the_signature() {
        let delivery = DeliveryHeaders {
            id: Some("msg_1".to_string()),
            timestamp: Some("1700000000".to_string()),
            signature: Some("v1,c2VjcmV0".to_string()),
        };

        let body = serde_json::to_value(WebhookRejection::unauthenticated(&delivery)).unwrap();

        assert_eq!(
            body["webhook"],
            json!({"id": "msg_1", "timestamp": "1700000000", "hasSignature": true})
        );
        assert!(!body.to_string().contains("c2VjcmV0"));
        assert!(body.get("status").is_none());
    }

    #[test]
    fn accepted_body_uses_camel_case() {
        let body = serde_json::to_value(WebhookAccepted::new("user.created".to_string())).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["eventType"], "user.created");
    }
}
