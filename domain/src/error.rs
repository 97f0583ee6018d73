//! Error types for the `domain` layer.
use crate::webhook::validation::ValidationError;
use entity_api::error::{EntityApiErrorKind, Error as EntityApiError};
use sea_orm::DbErr;
use std::error::Error as StdError;
use std::fmt;
use webhook_auth::{Error as WebhookAuthError, ErrorKind as WebhookAuthErrorKind};

/// Top-level domain error type.
/// Errors in the Domain layer are modeled as a tree structure
/// with `domain::error::Error` as the root type holding a tree of `error_kind`
/// enums that represent the kinds of errors that can occur in the domain layer or
/// in lower layers. The `source` field is used to hold the original error that caused
/// the domain error. The intent is to translate errors between layers while maintaining
/// layer boundaries. Ex. `domain` is dependent on `entity_api`, and `web` is dependent on `domain`.
/// but `web` should not be dependent, directly, on `entity_api`. Each layer is free to define its own
/// error kinds to whatever richness needed at that layer. Ultimately the various `error_kind`s are used
/// by `web` to return appropriate HTTP status codes and messages to the client.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: DomainErrorKind,
}

/// Enum representing the major categories of errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum DomainErrorKind {
    Internal(InternalErrorKind),
    Webhook(WebhookErrorKind),
}

/// Enum representing the various kinds of internal errors that can occur in the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum InternalErrorKind {
    Entity(EntityErrorKind),
    Config,
    /// The transactional step did not finish inside its time budget.
    Timeout,
    Other(String),
}

/// Enum representing the various kinds of entity errors that can bubble up from the "Entity" layer (`entity_api` and `entity`).
/// These errors are translated from the `entity_api` layer to the `domain` layer and reduced to a subset of error kinds
/// that are relevant to the `domain` layer.
#[derive(Debug, PartialEq)]
pub enum EntityErrorKind {
    NotFound,
    Invalid,
    AlreadyExists,
    DbTransaction,
    Other(String),
}

/// Failures specific to receiving and applying identity provider webhooks.
#[derive(Debug, PartialEq)]
pub enum WebhookErrorKind {
    /// Missing headers, bad signature, stale timestamp or an unparseable signed body.
    Authenticity,
    /// The payload is authentic but does not match the expected shape.
    Validation(ValidationError),
    /// The audit record exists but is not in a state that allows another attempt.
    NotRetryable,
    /// Applying the event failed; `source` holds the underlying domain error.
    ProcessingFailed,
}

impl Error {
    pub fn not_found(message: impl Into<String>) -> Self {
        Error {
            source: Some(message.into().into()),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Entity(
                EntityErrorKind::NotFound,
            )),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error {
            source: Some(message.into().into()),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Config),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Error {
            source: Some(message.into().into()),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Timeout),
        }
    }

    pub fn webhook(kind: WebhookErrorKind, message: impl Into<String>) -> Self {
        Error {
            source: Some(message.into().into()),
            error_kind: DomainErrorKind::Webhook(kind),
        }
    }

    /// Wraps a failure raised while applying an event so callers can tell it apart
    /// from rejections that happen before anything is recorded.
    pub fn processing_failed(cause: Error) -> Self {
        Error {
            source: Some(Box::new(cause)),
            error_kind: DomainErrorKind::Webhook(WebhookErrorKind::ProcessingFailed),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.error_kind,
            DomainErrorKind::Internal(InternalErrorKind::Entity(EntityErrorKind::NotFound))
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(
            self.error_kind,
            DomainErrorKind::Internal(InternalErrorKind::Entity(EntityErrorKind::AlreadyExists))
        )
    }

    /// Whether trying the same work again later could succeed.
    pub fn is_transient(&self) -> bool {
        match &self.error_kind {
            DomainErrorKind::Internal(InternalErrorKind::Timeout)
            | DomainErrorKind::Internal(InternalErrorKind::Entity(
                EntityErrorKind::DbTransaction,
            )) => true,
            // Dependent rows (a session's user) may arrive with a later delivery.
            DomainErrorKind::Internal(InternalErrorKind::Entity(EntityErrorKind::NotFound)) => {
                true
            }
            DomainErrorKind::Webhook(WebhookErrorKind::ProcessingFailed) => self
                .source
                .as_ref()
                .and_then(|source| source.downcast_ref::<Error>())
                .is_some_and(Error::is_transient),
            _ => false,
        }
    }

    fn kind_description(&self) -> String {
        match &self.error_kind {
            DomainErrorKind::Internal(InternalErrorKind::Entity(kind)) => match kind {
                EntityErrorKind::NotFound => "Record not found".to_string(),
                EntityErrorKind::Invalid => "Invalid record".to_string(),
                EntityErrorKind::AlreadyExists => "Record already exists".to_string(),
                EntityErrorKind::DbTransaction => "Database error".to_string(),
                EntityErrorKind::Other(other) => format!("Entity error ({other})"),
            },
            DomainErrorKind::Internal(InternalErrorKind::Config) => {
                "Configuration error".to_string()
            }
            DomainErrorKind::Internal(InternalErrorKind::Timeout) => "Timed out".to_string(),
            DomainErrorKind::Internal(InternalErrorKind::Other(other)) => other.clone(),
            DomainErrorKind::Webhook(WebhookErrorKind::Authenticity) => {
                "Webhook verification failed".to_string()
            }
            DomainErrorKind::Webhook(WebhookErrorKind::Validation(validation)) => {
                format!("Webhook validation failed ({})", validation.category)
            }
            DomainErrorKind::Webhook(WebhookErrorKind::NotRetryable) => {
                "Webhook event cannot be retried".to_string()
            }
            DomainErrorKind::Webhook(WebhookErrorKind::ProcessingFailed) => {
                "Webhook processing failed".to_string()
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {source}", self.kind_description()),
            None => write!(f, "{}", self.kind_description()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

// This is where we translate errors from the `entity_api` layer to the `domain` layer.
impl From<EntityApiError> for Error {
    fn from(err: EntityApiError) -> Self {
        let entity_error_kind = match err.error_kind {
            EntityApiErrorKind::RecordNotFound => EntityErrorKind::NotFound,
            EntityApiErrorKind::InvalidQueryTerm | EntityApiErrorKind::ValidationError => {
                EntityErrorKind::Invalid
            }
            EntityApiErrorKind::RecordAlreadyExists => EntityErrorKind::AlreadyExists,
            EntityApiErrorKind::SystemError => EntityErrorKind::DbTransaction,
            EntityApiErrorKind::RecordNotUpdated => {
                EntityErrorKind::Other("Record not updated".to_string())
            }
            EntityApiErrorKind::Other => EntityErrorKind::Other("EntityErrorKind".to_string()),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Entity(entity_error_kind)),
        }
    }
}

// Transaction begin/commit/rollback surface raw `DbErr`s.
impl From<DbErr> for Error {
    fn from(err: DbErr) -> Self {
        EntityApiError::from(err).into()
    }
}

impl From<WebhookAuthError> for Error {
    fn from(err: WebhookAuthError) -> Self {
        let error_kind = match &err.error_kind {
            WebhookAuthErrorKind::Webhook(_) => {
                DomainErrorKind::Webhook(WebhookErrorKind::Authenticity)
            }
            WebhookAuthErrorKind::Config => DomainErrorKind::Internal(InternalErrorKind::Config),
        };
        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error {
            source: Some(Box::new(err.clone())),
            error_kind: DomainErrorKind::Webhook(WebhookErrorKind::Validation(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webhook_auth::error::WebhookErrorKind as AuthWebhookErrorKind;

    #[test]
    fn unique_violation_from_entity_api_maps_to_already_exists() {
        let err: Error = EntityApiError {
            source: None,
            error_kind: EntityApiErrorKind::RecordAlreadyExists,
        }
        .into();

        assert!(err.is_already_exists());
        assert!(!err.is_transient());
    }

    #[test]
    fn signature_failures_map_to_authenticity() {
        let err: Error = WebhookAuthError {
            source: None,
            error_kind: WebhookAuthErrorKind::Webhook(AuthWebhookErrorKind::InvalidSignature),
        }
        .into();

        assert_eq!(
            err.error_kind,
            DomainErrorKind::Webhook(WebhookErrorKind::Authenticity)
        );
    }

    #[test]
    fn processing_failure_inherits_transience_from_its_cause() {
        assert!(Error::processing_failed(Error::timeout("slow")).is_transient());
        assert!(Error::processing_failed(Error::not_found("user_1")).is_transient());
        assert!(!Error::processing_failed(Error::config("no secret")).is_transient());
    }

    #[test]
    fn display_includes_the_source_message() {
        let err = Error::not_found("User user_1 not found for session sess_1");
        assert_eq!(
            err.to_string(),
            "Record not found: User user_1 not found for session sess_1"
        );
    }
}
