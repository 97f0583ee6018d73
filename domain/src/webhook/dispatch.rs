//! Maps event types to the handler that applies them.

use super::envelope::EventFamily;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventHandler {
    UpsertUser,
    DeleteUser,
    CreateSession,
    EndSession,
    /// Acknowledged and audited without side effects.
    NoOp,
}

const DISPATCH_TABLE: &[(&str, EventHandler)] = &[
    ("user.created", EventHandler::UpsertUser),
    ("user.updated", EventHandler::UpsertUser),
    ("user.deleted", EventHandler::DeleteUser),
    ("session.created", EventHandler::CreateSession),
    ("session.ended", EventHandler::EndSession),
    ("session.revoked", EventHandler::EndSession),
    ("session.removed", EventHandler::EndSession),
];

pub fn dispatch(event_type: &str) -> EventHandler {
    DISPATCH_TABLE
        .iter()
        .find(|(handled, _)| *handled == event_type)
        .map(|(_, handler)| *handler)
        .unwrap_or(EventHandler::NoOp)
}

/// Whether the event type belongs to a family this service understands,
/// even if no handler acts on it yet.
pub fn is_known_event_type(event_type: &str) -> bool {
    EventFamily::of(event_type) != EventFamily::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_session_termination_ends_the_session() {
        for event_type in ["session.ended", "session.revoked", "session.removed"] {
            assert_eq!(dispatch(event_type), EventHandler::EndSession);
        }
    }

    #[test]
    fn unhandled_types_are_no_ops() {
        assert_eq!(dispatch("organization.created"), EventHandler::NoOp);
        assert_eq!(dispatch("foo.bar"), EventHandler::NoOp);
        assert_eq!(dispatch("User.Created"), EventHandler::NoOp);
    }

    #[test]
    fn known_families_are_not_limited_to_handled_types() {
        assert!(is_known_event_type("organizationMembership.created"));
        assert!(!is_known_event_type("foo.bar"));
    }
}
