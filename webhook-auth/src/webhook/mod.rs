//! Webhook signature verification.

mod svix;

pub use svix::{
    SvixWebhookVerifier, DEFAULT_TOLERANCE_SECS, SVIX_ID_HEADER, SVIX_SIGNATURE_HEADER,
    SVIX_TIMESTAMP_HEADER,
};

use std::collections::HashMap;

use crate::error::Error;

/// Trait for verifying webhook deliveries.
pub trait WebhookVerifier: Send + Sync {
    /// Verify a webhook request and decode its body.
    ///
    /// # Arguments
    ///
    /// * `headers` - HTTP headers from the webhook request, keyed by lowercase name
    /// * `body` - Raw request body bytes, exactly as received
    ///
    /// # Returns
    ///
    /// The decoded JSON body. The body is only parsed after the signature matched.
    fn verify(
        &self,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> Result<serde_json::Value, Error>;

    /// Get the provider identifier for this verifier.
    fn provider_id(&self) -> &str;
}
