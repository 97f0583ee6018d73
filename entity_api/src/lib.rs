pub use entity::{user_sessions, users, webhook_event_status, webhook_events, Id};

pub mod error;
pub mod mutate;
pub mod user;
pub mod user_session;
pub mod webhook_event;
