//! Inbound identity provider webhooks: authenticity, shape validation and routing.
//!
//! A delivery moves through three steps before anything is persisted:
//! [`verify`] checks the Svix signature over the raw body, [`validation::validate`]
//! checks the decoded JSON against the rules of its event family and produces a
//! typed [`envelope::WebhookEnvelope`], and [`dispatch::dispatch`] picks the handler
//! that `webhook_event::process_with_transaction` will run.

use crate::error::Error;
use log::*;
use std::collections::HashMap;
use webhook_auth::webhook::{
    SvixWebhookVerifier, WebhookVerifier, SVIX_ID_HEADER, SVIX_SIGNATURE_HEADER,
    SVIX_TIMESTAMP_HEADER,
};

pub mod dispatch;
pub mod envelope;
pub mod validation;

pub use webhook_auth::webhook::DEFAULT_TOLERANCE_SECS;

const PROVIDER_ID: &str = "clerk";

/// The Svix delivery headers, kept as received so rejections can echo them back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryHeaders {
    pub id: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
}

impl DeliveryHeaders {
    pub fn has_signature(&self) -> bool {
        self.signature
            .as_deref()
            .is_some_and(|signature| !signature.is_empty())
    }

    fn as_map(&self) -> HashMap<String, String> {
        [
            (SVIX_ID_HEADER, &self.id),
            (SVIX_TIMESTAMP_HEADER, &self.timestamp),
            (SVIX_SIGNATURE_HEADER, &self.signature),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.clone().map(|value| (name.to_string(), value)))
        .collect()
    }
}

/// Verifies the delivery signature against every accepted secret and decodes the body.
///
/// `secrets` holds the current signing secret first; an empty list is a configuration
/// error. Any authenticity problem maps to `WebhookErrorKind::Authenticity`.
pub fn verify(
    body: &[u8],
    headers: &DeliveryHeaders,
    secrets: &[String],
    tolerance_secs: i64,
) -> Result<serde_json::Value, Error> {
    let verifier = SvixWebhookVerifier::new(PROVIDER_ID, secrets, tolerance_secs)?;
    let payload = verifier.verify(&headers.as_map(), body).map_err(|err| {
        info!(
            "Rejected unauthenticated {} webhook delivery {:?}",
            verifier.provider_id(),
            headers.id
        );
        err
    })?;

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DomainErrorKind, InternalErrorKind, WebhookErrorKind};

    const SECRET: &str = "whsec_dGVzdC1zaWduaW5nLXNlY3JldA==";
    const BODY: &[u8] = br#"{"type":"user.created","object":"event","data":{"id":"user_1"}}"#;

    fn signed_headers(body: &[u8]) -> DeliveryHeaders {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signer =
            SvixWebhookVerifier::new(PROVIDER_ID, &[SECRET.to_string()], DEFAULT_TOLERANCE_SECS)
                .unwrap();
        DeliveryHeaders {
            id: Some("msg_1".to_string()),
            signature: Some(signer.sign("msg_1", &timestamp, body).unwrap()),
            timestamp: Some(timestamp),
        }
    }

    #[test]
    fn verify_returns_the_decoded_body() {
        let payload = verify(
            BODY,
            &signed_headers(BODY),
            &[SECRET.to_string()],
            DEFAULT_TOLERANCE_SECS,
        )
        .unwrap();

        assert_eq!(payload["data"]["id"], "user_1");
    }

    #[test]
    fn missing_signature_is_an_authenticity_error() {
        let mut headers = signed_headers(BODY);
        headers.signature = None;
        assert!(!headers.has_signature());

        let err = verify(BODY, &headers, &[SECRET.to_string()], DEFAULT_TOLERANCE_SECS)
            .unwrap_err();
        assert_eq!(
            err.error_kind,
            DomainErrorKind::Webhook(WebhookErrorKind::Authenticity)
        );
        assert!(err.to_string().contains(SVIX_SIGNATURE_HEADER));
    }

    #[test]
    fn no_configured_secret_is_a_config_error() {
        let err = verify(BODY, &signed_headers(BODY), &[], DEFAULT_TOLERANCE_SECS).unwrap_err();
        assert_eq!(
            err.error_kind,
            DomainErrorKind::Internal(InternalErrorKind::Config)
        );
    }
}
