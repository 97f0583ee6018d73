//! # webhook-auth
//!
//! Signature verification for inbound webhooks delivered through Svix
//! (the Standard Webhooks scheme used by the identity provider):
//! - HMAC-SHA256 over `msg_id.timestamp.body`
//! - one or more `v1,<base64>` signatures per delivery
//! - several signing secrets accepted at once so secrets can be rotated
//! - a timestamp tolerance window against replays
//!
//! ## Usage
//!
//! ```rust,ignore
//! use webhook_auth::webhook::{SvixWebhookVerifier, WebhookVerifier};
//!
//! let verifier = SvixWebhookVerifier::new("clerk", &[secret], 300)?;
//! let payload = verifier.verify(&headers, &body)?;
//! ```

pub mod error;
pub mod webhook;

// Re-export commonly used types
pub use error::{Error, ErrorKind};
