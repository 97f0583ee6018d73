use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::*;
use serde_json::json;

use domain::error::{
    DomainErrorKind, EntityErrorKind, Error as DomainError, InternalErrorKind, WebhookErrorKind,
};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(DomainError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl Error {
    fn status_and_message(&self) -> (StatusCode, &'static str) {
        match &self.0.error_kind {
            DomainErrorKind::Internal(internal_error_kind) => match internal_error_kind {
                InternalErrorKind::Entity(entity_error_kind) => match entity_error_kind {
                    EntityErrorKind::NotFound => (StatusCode::NOT_FOUND, "Not found"),
                    EntityErrorKind::Invalid => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "Unprocessable entity")
                    }
                    EntityErrorKind::AlreadyExists => (StatusCode::CONFLICT, "Already exists"),
                    EntityErrorKind::DbTransaction | EntityErrorKind::Other(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                    }
                },
                InternalErrorKind::Config => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Server configuration error")
                }
                InternalErrorKind::Timeout | InternalErrorKind::Other(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                }
            },
            DomainErrorKind::Webhook(webhook_error_kind) => match webhook_error_kind {
                WebhookErrorKind::Authenticity | WebhookErrorKind::Validation(_) => {
                    (StatusCode::BAD_REQUEST, "Webhook validation failed")
                }
                WebhookErrorKind::NotRetryable => {
                    (StatusCode::CONFLICT, "Webhook event cannot be retried")
                }
                // A 5xx makes the provider redeliver the event later.
                WebhookErrorKind::ProcessingFailed => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "Webhook processing failed")
                }
            },
        }
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html#associatedconstant.UNPROCESSABLE_ENTITY
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            error!("{message}: {}", self.0);
        } else {
            debug!("{message}: {}", self.0);
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl<E> From<E> for Error
where
    E: Into<DomainError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
