//! Controller for identity provider (Clerk) webhooks delivered through Svix.

use crate::response::webhook::{WebhookAccepted, WebhookRejection};
use crate::{AppState, Error};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};

use domain::error::{DomainErrorKind, Error as DomainError, WebhookErrorKind};
use domain::webhook::validation::{self, ValidationError};
use domain::webhook::{self, dispatch, DeliveryHeaders};
use domain::webhook_event::{self as WebhookEventApi, ProcessingContext};
use log::*;

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn delivery_headers(headers: &HeaderMap) -> DeliveryHeaders {
    DeliveryHeaders {
        id: header(headers, "svix-id"),
        timestamp: header(headers, "svix-timestamp"),
        signature: header(headers, "svix-signature"),
    }
}

/// POST /webhooks/clerk
///
/// Takes the body as raw bytes; the signature covers the exact bytes sent.
pub async fn clerk_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Error> {
    let config = &app_state.config;
    let delivery = delivery_headers(&headers);
    debug!("Received Clerk webhook delivery {:?}", delivery.id);

    let secrets = config.clerk_webhook_secrets();
    if secrets.is_empty() {
        error!("CLERK_WEBHOOK_SECRET is not configured, refusing webhook delivery");
        return Err(DomainError::config("Webhook secret not configured").into());
    }

    let payload = match webhook::verify(
        &body,
        &delivery,
        &secrets,
        config.webhook_signature_tolerance_secs,
    ) {
        Ok(payload) => payload,
        Err(err) if err.error_kind == DomainErrorKind::Webhook(WebhookErrorKind::Authenticity) => {
            return Ok(WebhookRejection::unauthenticated(&delivery).into_response());
        }
        Err(err) => return Err(err.into()),
    };

    let envelope = match validation::validate(&payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(
                "Rejected webhook delivery {:?} ({}): {}",
                delivery.id,
                err.category,
                err.message()
            );
            return Ok(WebhookRejection::invalid(&err, &delivery).into_response());
        }
    };

    if config.webhook_strict_event_types && !dispatch::is_known_event_type(&envelope.event_type) {
        warn!(
            "Rejected webhook delivery {:?} with unknown event type {}",
            delivery.id, envelope.event_type
        );
        let err = ValidationError::unknown_event_type(&envelope.event_type);
        return Ok(WebhookRejection::invalid(&err, &delivery).into_response());
    }

    let event_type = envelope.event_type.clone();
    WebhookEventApi::process_with_transaction(
        app_state.db_conn_ref(),
        ProcessingContext {
            envelope,
            delivery_id: delivery.id,
            delivery_timestamp: delivery.timestamp,
        },
        config.webhook_processing_timeout(),
    )
    .await?;

    Ok(WebhookAccepted::new(event_type).into_response())
}
