//! Svix (Standard Webhooks) HMAC-SHA256 signature verification.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use log::debug;
use sha2::Sha256;

use super::WebhookVerifier;
use crate::error::{config_error, webhook_error, Error, WebhookErrorKind};

type HmacSha256 = Hmac<Sha256>;

pub const SVIX_ID_HEADER: &str = "svix-id";
pub const SVIX_TIMESTAMP_HEADER: &str = "svix-timestamp";
pub const SVIX_SIGNATURE_HEADER: &str = "svix-signature";

/// Deliveries whose timestamp is further than this from the current time are rejected.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1";

/// Verifies deliveries signed with the Svix scheme.
///
/// More than one secret can be configured: the current signing secret first,
/// followed by previous secrets still inside their rotation window.
pub struct SvixWebhookVerifier {
    provider_id: String,
    secrets: Vec<Vec<u8>>,
    tolerance_secs: i64,
}

impl SvixWebhookVerifier {
    /// Create a new verifier.
    ///
    /// # Arguments
    ///
    /// * `provider_id` - Provider identifier
    /// * `secrets` - Signing secrets, `whsec_` prefixed or bare base64
    /// * `tolerance_secs` - Allowed clock distance between the delivery timestamp and now
    pub fn new(
        provider_id: impl Into<String>,
        secrets: &[String],
        tolerance_secs: i64,
    ) -> Result<Self, Error> {
        let secrets = secrets
            .iter()
            .map(|secret| secret.trim())
            .filter(|secret| !secret.is_empty())
            .map(decode_secret)
            .collect::<Result<Vec<_>, _>>()?;

        if secrets.is_empty() {
            return Err(config_error("No webhook signing secret configured"));
        }

        Ok(Self {
            provider_id: provider_id.into(),
            secrets,
            tolerance_secs,
        })
    }

    /// Verify against an explicit clock, in unix seconds.
    pub fn verify_at(
        &self,
        headers: &HashMap<String, String>,
        body: &[u8],
        now: i64,
    ) -> Result<serde_json::Value, Error> {
        let msg_id = required_header(headers, SVIX_ID_HEADER)?;
        let timestamp = required_header(headers, SVIX_TIMESTAMP_HEADER)?;
        let signature_header = headers.get(SVIX_SIGNATURE_HEADER).ok_or_else(|| {
            webhook_error(
                WebhookErrorKind::MissingSignature,
                &format!("Missing signature header: {SVIX_SIGNATURE_HEADER}"),
            )
        })?;

        let sent_at: i64 = timestamp.trim().parse().map_err(|_| {
            webhook_error(WebhookErrorKind::InvalidPayload, "Invalid timestamp header")
        })?;
        if now.abs_diff(sent_at) > self.tolerance_secs.unsigned_abs() {
            return Err(webhook_error(
                WebhookErrorKind::TimestampExpired,
                "Timestamp outside of tolerance window",
            ));
        }

        let signatures: Vec<Vec<u8>> = signature_header
            .split_whitespace()
            .filter_map(|token| token.split_once(','))
            .filter(|(version, _)| *version == SIGNATURE_VERSION)
            .filter_map(|(_, encoded)| STANDARD.decode(encoded).ok())
            .collect();

        if signatures.is_empty() {
            return Err(webhook_error(
                WebhookErrorKind::InvalidSignature,
                "Invalid signature format",
            ));
        }

        let matched = self.secrets.iter().any(|secret| {
            signatures.iter().any(|signature| {
                signed_mac(secret, msg_id, timestamp, body)
                    .map(|mac| mac.verify_slice(signature).is_ok())
                    .unwrap_or(false)
            })
        });

        if !matched {
            return Err(webhook_error(
                WebhookErrorKind::InvalidSignature,
                "No matching signature found",
            ));
        }

        serde_json::from_slice(body).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::ErrorKind::Webhook(WebhookErrorKind::InvalidPayload),
        })
    }

    /// Produce a `v1,<base64>` signature with the current secret.
    pub fn sign(&self, msg_id: &str, timestamp: &str, body: &[u8]) -> Result<String, Error> {
        let secret = self
            .secrets
            .first()
            .ok_or_else(|| config_error("No webhook signing secret configured"))?;
        let mac = signed_mac(secret, msg_id, timestamp, body)?;
        Ok(format!(
            "{SIGNATURE_VERSION},{}",
            STANDARD.encode(mac.finalize().into_bytes())
        ))
    }
}

impl WebhookVerifier for SvixWebhookVerifier {
    fn verify(
        &self,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<serde_json::Value, Error> {
        let result = self.verify_at(headers, body, chrono::Utc::now().timestamp());
        if let Err(e) = &result {
            debug!("{} webhook verification failed: {e}", self.provider_id);
        }
        result
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, Error> {
    let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
    STANDARD
        .decode(encoded)
        .map_err(|_| config_error("Webhook signing secret is not valid base64"))
}

fn required_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Result<&'a str, Error> {
    headers
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            webhook_error(
                WebhookErrorKind::MissingHeader,
                &format!("Missing header: {name}"),
            )
        })
}

fn signed_mac(secret: &[u8], msg_id: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, Error> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| config_error("Invalid HMAC key"))?;
    mac.update(msg_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    // "test-signing-secret" base64 encoded
    const SECRET: &str = "whsec_dGVzdC1zaWduaW5nLXNlY3JldA==";
    const OTHER_SECRET: &str = "whsec_b3RoZXItc2lnbmluZy1zZWNyZXQ=";
    const NOW: i64 = 1_700_000_000;
    const BODY: &[u8] = br#"{"type":"user.created","object":"event","data":{"id":"user_1"}}"#;

    fn verifier(secrets: &[&str]) -> SvixWebhookVerifier {
        let secrets: Vec<String> = secrets.iter().map(|s| s.to_string()).collect();
        SvixWebhookVerifier::new("clerk", &secrets, DEFAULT_TOLERANCE_SECS).unwrap()
    }

    fn headers(signature: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(SVIX_ID_HEADER.to_string(), "msg_1".to_string());
        headers.insert(SVIX_TIMESTAMP_HEADER.to_string(), NOW.to_string());
        headers.insert(SVIX_SIGNATURE_HEADER.to_string(), signature.to_string());
        headers
    }

    fn kind(err: Error) -> ErrorKind {
        err.error_kind
    }

    #[test]
    fn test_valid_signature() {
        let verifier = verifier(&[SECRET]);
        let signature = verifier.sign("msg_1", &NOW.to_string(), BODY).unwrap();

        let payload = verifier.verify_at(&headers(&signature), BODY, NOW).unwrap();
        assert_eq!(payload["type"], "user.created");
    }

    #[test]
    fn test_single_byte_mutation_invalidates_signature() {
        let verifier = verifier(&[SECRET]);
        let signature = verifier.sign("msg_1", &NOW.to_string(), BODY).unwrap();

        let mut tampered = BODY.to_vec();
        tampered[10] ^= 0x01;

        let result = verifier.verify_at(&headers(&signature), &tampered, NOW);
        assert_eq!(
            kind(result.unwrap_err()),
            ErrorKind::Webhook(WebhookErrorKind::InvalidSignature)
        );
    }

    #[test]
    fn test_signature_bound_to_message_id() {
        let verifier = verifier(&[SECRET]);
        let signature = verifier.sign("msg_2", &NOW.to_string(), BODY).unwrap();

        assert!(verifier.verify_at(&headers(&signature), BODY, NOW).is_err());
    }

    #[test]
    fn test_any_of_multiple_signatures_may_match() {
        let verifier = verifier(&[SECRET]);
        let signature = verifier.sign("msg_1", &NOW.to_string(), BODY).unwrap();
        let header = format!("v1,aW52YWxpZA== {signature}");

        assert!(verifier.verify_at(&headers(&header), BODY, NOW).is_ok());
    }

    #[test]
    fn test_previous_secret_still_accepted_during_rotation() {
        let old = verifier(&[OTHER_SECRET]);
        let signature = old.sign("msg_1", &NOW.to_string(), BODY).unwrap();

        let rotated = verifier(&[SECRET, OTHER_SECRET]);
        assert!(rotated.verify_at(&headers(&signature), BODY, NOW).is_ok());

        let current_only = verifier(&[SECRET]);
        assert!(current_only
            .verify_at(&headers(&signature), BODY, NOW)
            .is_err());
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let verifier = verifier(&[SECRET]);
        let signature = verifier.sign("msg_1", &NOW.to_string(), BODY).unwrap();

        let result = verifier.verify_at(&headers(&signature), BODY, NOW + DEFAULT_TOLERANCE_SECS + 1);
        assert_eq!(
            kind(result.unwrap_err()),
            ErrorKind::Webhook(WebhookErrorKind::TimestampExpired)
        );
    }

    #[test]
    fn test_extreme_timestamps_are_rejected() {
        let verifier = verifier(&[SECRET]);

        for timestamp in [i64::MIN.to_string(), i64::MAX.to_string()] {
            let mut headers = headers("v1,aW52YWxpZA==");
            headers.insert(SVIX_TIMESTAMP_HEADER.to_string(), timestamp);

            let result = verifier.verify_at(&headers, BODY, NOW);
            assert_eq!(
                kind(result.unwrap_err()),
                ErrorKind::Webhook(WebhookErrorKind::TimestampExpired)
            );
        }
    }

    #[test]
    fn test_missing_signature_header() {
        let verifier = verifier(&[SECRET]);
        let mut headers = headers("unused");
        headers.remove(SVIX_SIGNATURE_HEADER);

        let result = verifier.verify_at(&headers, BODY, NOW);
        assert_eq!(
            kind(result.unwrap_err()),
            ErrorKind::Webhook(WebhookErrorKind::MissingSignature)
        );
    }

    #[test]
    fn test_malformed_signature_header() {
        let verifier = verifier(&[SECRET]);

        let result = verifier.verify_at(&headers("not-a-signature"), BODY, NOW);
        assert_eq!(
            kind(result.unwrap_err()),
            ErrorKind::Webhook(WebhookErrorKind::InvalidSignature)
        );
    }

    #[test]
    fn test_signed_but_unparseable_body() {
        let verifier = verifier(&[SECRET]);
        let body = b"not json";
        let signature = verifier.sign("msg_1", &NOW.to_string(), body).unwrap();

        let result = verifier.verify_at(&headers(&signature), body, NOW);
        assert_eq!(
            kind(result.unwrap_err()),
            ErrorKind::Webhook(WebhookErrorKind::InvalidPayload)
        );
    }

    #[test]
    fn test_empty_secret_list_is_a_config_error() {
        let result = SvixWebhookVerifier::new("clerk", &[String::new()], DEFAULT_TOLERANCE_SECS);
        assert_eq!(kind(result.err().unwrap()), ErrorKind::Config);
    }
}
