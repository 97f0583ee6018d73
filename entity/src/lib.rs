use uuid::Uuid;

pub mod user_sessions;
pub mod users;
pub mod webhook_event_status;
pub mod webhook_events;

/// A type alias that represents any Entity's internal id field data type.
/// Aliased so that it's easy to change the underlying type if necessary.
pub type Id = Uuid;
