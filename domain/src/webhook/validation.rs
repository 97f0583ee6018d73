//! Structural validation of decoded webhook payloads.
//!
//! Validation runs in two phases. The envelope phase checks the top-level shape
//! shared by every event. The data phase looks up the rule set for the event type
//! and checks `data` field by field. Every problem found is collected so a sender
//! sees all of them in one response.

use super::envelope::{EventData, EventFamily, WebhookEnvelope};
use email_address::EmailAddress;
use log::*;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCategory {
    InvalidStructure,
    MissingRequiredField,
    InvalidEmailFormat,
    InvalidTimestamp,
    InvalidEventData,
    InvalidOrganizationData,
    InvalidUserData,
    GeneralValidationError,
    UnknownEventType,
}

impl ValidationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCategory::InvalidStructure => "INVALID_STRUCTURE",
            ValidationCategory::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            ValidationCategory::InvalidEmailFormat => "INVALID_EMAIL_FORMAT",
            ValidationCategory::InvalidTimestamp => "INVALID_TIMESTAMP",
            ValidationCategory::InvalidEventData => "INVALID_EVENT_DATA",
            ValidationCategory::InvalidOrganizationData => "INVALID_ORGANIZATION_DATA",
            ValidationCategory::InvalidUserData => "INVALID_USER_DATA",
            ValidationCategory::GeneralValidationError => "GENERAL_VALIDATION_ERROR",
            ValidationCategory::UnknownEventType => "UNKNOWN_EVENT_TYPE",
        }
    }

    /// Fixed advice returned to the sender alongside the category.
    pub fn guidance(&self) -> &'static str {
        match self {
            ValidationCategory::InvalidStructure => {
                "Send a JSON object with non-empty `type` and `object` strings and a `data` object."
            }
            ValidationCategory::MissingRequiredField => {
                "Include every required field for the event type; null counts as missing."
            }
            ValidationCategory::InvalidEmailFormat => {
                "Each entry in `email_addresses` needs a well-formed `email_address`."
            }
            ValidationCategory::InvalidTimestamp => {
                "Timestamps must be non-negative integers counting seconds since the Unix epoch."
            }
            ValidationCategory::InvalidEventData => {
                "Check the field types in `data` against the event type's documented shape."
            }
            ValidationCategory::InvalidOrganizationData => {
                "Organization events need string `id`, `name` and `slug` fields."
            }
            ValidationCategory::InvalidUserData => {
                "User events need a string `id` and a non-empty `email_addresses` array."
            }
            ValidationCategory::GeneralValidationError => {
                "Several kinds of problems were found; fix each issue listed in the message."
            }
            ValidationCategory::UnknownEventType => {
                "This endpoint does not handle the event type; remove it from the endpoint's subscriptions."
            }
        }
    }
}

impl fmt::Display for ValidationCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One problem with one field.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub category: ValidationCategory,
    pub field: String,
    pub message: String,
}

/// Every problem found in a payload, with a single category for the whole set.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub category: ValidationCategory,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    /// The shared category when all issues agree, otherwise `GENERAL_VALIDATION_ERROR`.
    fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let category = match issues.split_first() {
            Some((first, rest)) if rest.iter().all(|issue| issue.category == first.category) => {
                first.category
            }
            _ => ValidationCategory::GeneralValidationError,
        };
        ValidationError { category, issues }
    }

    fn single(category: ValidationCategory, field: &str, message: String) -> Self {
        Self::from_issues(vec![ValidationIssue {
            category,
            field: field.to_string(),
            message,
        }])
    }

    pub fn unknown_event_type(event_type: &str) -> Self {
        Self::single(
            ValidationCategory::UnknownEventType,
            "type",
            format!("Unsupported event type: {event_type}"),
        )
    }

    pub fn message(&self) -> String {
        self.issues
            .iter()
            .map(|issue| issue.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn fields(&self) -> Vec<&str> {
        self.issues.iter().map(|issue| issue.field.as_str()).collect()
    }

    pub fn guidance(&self) -> &'static str {
        self.category.guidance()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, Copy)]
enum Constraint {
    Text,
    Timestamp,
    Flag,
    Integer,
    Object(&'static [FieldRule]),
    EmailAddresses,
}

#[derive(Debug, Clone, Copy)]
struct FieldRule {
    field: &'static str,
    constraint: Constraint,
    required: bool,
}

const fn required(field: &'static str, constraint: Constraint) -> FieldRule {
    FieldRule {
        field,
        constraint,
        required: true,
    }
}

const fn optional(field: &'static str, constraint: Constraint) -> FieldRule {
    FieldRule {
        field,
        constraint,
        required: false,
    }
}

const ENVELOPE_RULES: &[FieldRule] = &[
    required("type", Constraint::Text),
    required("object", Constraint::Text),
    required("data", Constraint::Object(&[])),
    optional("timestamp", Constraint::Timestamp),
];

const EMAIL_ADDRESS_RULES: &[FieldRule] = &[
    required("id", Constraint::Text),
    required("email_address", Constraint::Text),
    optional("primary", Constraint::Flag),
];

const USER_UPSERT_RULES: &[FieldRule] = &[
    required("id", Constraint::Text),
    required("email_addresses", Constraint::EmailAddresses),
    required("created_at", Constraint::Timestamp),
    required("updated_at", Constraint::Timestamp),
    optional("first_name", Constraint::Text),
    optional("last_name", Constraint::Text),
    optional("username", Constraint::Text),
    optional("image_url", Constraint::Text),
    optional("primary_email_address_id", Constraint::Text),
    optional("public_metadata", Constraint::Object(&[])),
    optional("banned", Constraint::Flag),
    optional("locked", Constraint::Flag),
];

const USER_RULES: &[FieldRule] = &[
    required("id", Constraint::Text),
    optional("created_at", Constraint::Timestamp),
    optional("updated_at", Constraint::Timestamp),
];

const SESSION_ACTIVITY_RULES: &[FieldRule] = &[
    optional("timestamp", Constraint::Timestamp),
    optional("ip_address", Constraint::Text),
    optional("user_agent", Constraint::Text),
    optional("city", Constraint::Text),
    optional("country", Constraint::Text),
];

const SESSION_CREATED_RULES: &[FieldRule] = &[
    required("id", Constraint::Text),
    required("user_id", Constraint::Text),
    required("created_at", Constraint::Timestamp),
    optional("updated_at", Constraint::Timestamp),
    optional("expire_at", Constraint::Timestamp),
    optional("abandon_at", Constraint::Timestamp),
    optional("status", Constraint::Text),
    optional("client_id", Constraint::Text),
    optional("last_active_at", Constraint::Object(SESSION_ACTIVITY_RULES)),
];

const SESSION_RULES: &[FieldRule] = &[
    required("id", Constraint::Text),
    required("user_id", Constraint::Text),
    optional("created_at", Constraint::Timestamp),
    optional("updated_at", Constraint::Timestamp),
    optional("expire_at", Constraint::Timestamp),
    optional("abandon_at", Constraint::Timestamp),
    optional("status", Constraint::Text),
    optional("client_id", Constraint::Text),
    optional("last_active_at", Constraint::Object(SESSION_ACTIVITY_RULES)),
];

const ORGANIZATION_RULES: &[FieldRule] = &[
    required("id", Constraint::Text),
    required("name", Constraint::Text),
    required("slug", Constraint::Text),
    required("created_at", Constraint::Timestamp),
    required("updated_at", Constraint::Timestamp),
    optional("image_url", Constraint::Text),
    optional("logo_url", Constraint::Text),
    optional("public_metadata", Constraint::Object(&[])),
    optional("max_allowed_memberships", Constraint::Integer),
];

const MEMBERSHIP_ORGANIZATION_RULES: &[FieldRule] = &[
    optional("id", Constraint::Text),
    optional("name", Constraint::Text),
    optional("slug", Constraint::Text),
    optional("created_at", Constraint::Timestamp),
    optional("updated_at", Constraint::Timestamp),
];

const PUBLIC_USER_DATA_RULES: &[FieldRule] = &[
    optional("user_id", Constraint::Text),
    optional("identifier", Constraint::Text),
    optional("first_name", Constraint::Text),
    optional("last_name", Constraint::Text),
    optional("image_url", Constraint::Text),
];

const MEMBERSHIP_RULES: &[FieldRule] = &[
    required("id", Constraint::Text),
    required(
        "organization",
        Constraint::Object(MEMBERSHIP_ORGANIZATION_RULES),
    ),
    required("public_user_data", Constraint::Object(PUBLIC_USER_DATA_RULES)),
    required("role", Constraint::Text),
    optional("created_at", Constraint::Timestamp),
    optional("updated_at", Constraint::Timestamp),
];

/// Rule set and type-mismatch category for an event type. `None` for types with no rules.
fn rules_for(event_type: &str) -> Option<(&'static [FieldRule], ValidationCategory)> {
    match EventFamily::of(event_type) {
        EventFamily::User => match event_type {
            "user.created" | "user.updated" => {
                Some((USER_UPSERT_RULES, ValidationCategory::InvalidUserData))
            }
            _ => Some((USER_RULES, ValidationCategory::InvalidUserData)),
        },
        EventFamily::Session => match event_type {
            "session.created" => Some((SESSION_CREATED_RULES, ValidationCategory::InvalidEventData)),
            _ => Some((SESSION_RULES, ValidationCategory::InvalidEventData)),
        },
        EventFamily::Organization => Some((
            ORGANIZATION_RULES,
            ValidationCategory::InvalidOrganizationData,
        )),
        EventFamily::OrganizationMembership => {
            Some((MEMBERSHIP_RULES, ValidationCategory::InvalidEventData))
        }
        EventFamily::Unknown => None,
    }
}

/// Validates a decoded payload and converts it into a typed envelope.
pub fn validate(raw: &Value) -> Result<WebhookEnvelope, ValidationError> {
    let Some(object) = raw.as_object() else {
        return Err(ValidationError::single(
            ValidationCategory::InvalidStructure,
            "payload",
            "Webhook payload must be a JSON object".to_string(),
        ));
    };

    let mut issues = Vec::new();
    check_fields(
        object,
        ENVELOPE_RULES,
        "",
        ValidationCategory::InvalidStructure,
        &mut issues,
    );
    if !issues.is_empty() {
        return Err(ValidationError::from_issues(issues));
    }

    let event_type = text(object, "type");
    let data = object.get("data").cloned().unwrap_or(Value::Null);

    match rules_for(&event_type) {
        Some((rules, mismatch)) => {
            if let Some(fields) = data.as_object() {
                check_fields(fields, rules, "", mismatch, &mut issues);
            }
        }
        None => debug!("No validation rules for webhook event type {event_type}, passing it through"),
    }
    if !issues.is_empty() {
        return Err(ValidationError::from_issues(issues));
    }

    let family = EventFamily::of(&event_type);
    let data = EventData::from_value(family, data).map_err(|err| {
        ValidationError::single(
            ValidationCategory::GeneralValidationError,
            "data",
            format!("data does not match {event_type}: {err}"),
        )
    })?;

    Ok(WebhookEnvelope {
        object: text(object, "object"),
        timestamp: object.get("timestamp").and_then(Value::as_i64),
        event_type,
        data,
        raw: raw.clone(),
    })
}

fn text(object: &Map<String, Value>, field: &str) -> String {
    object
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn qualify(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn push(issues: &mut Vec<ValidationIssue>, category: ValidationCategory, field: &str, message: String) {
    issues.push(ValidationIssue {
        category,
        field: field.to_string(),
        message,
    });
}

fn check_fields(
    object: &Map<String, Value>,
    rules: &[FieldRule],
    prefix: &str,
    mismatch: ValidationCategory,
    issues: &mut Vec<ValidationIssue>,
) {
    for rule in rules {
        let path = qualify(prefix, rule.field);
        match object.get(rule.field) {
            None | Some(Value::Null) => {
                if rule.required {
                    push(
                        issues,
                        ValidationCategory::MissingRequiredField,
                        &path,
                        format!("{path} is required"),
                    );
                }
            }
            Some(value) => check_value(value, rule, &path, mismatch, issues),
        }
    }
}

fn check_value(
    value: &Value,
    rule: &FieldRule,
    path: &str,
    mismatch: ValidationCategory,
    issues: &mut Vec<ValidationIssue>,
) {
    match rule.constraint {
        Constraint::Text => match value.as_str() {
            Some(text) if !(rule.required && text.trim().is_empty()) => {}
            _ if rule.required => {
                push(issues, mismatch, path, format!("{path} must be a non-empty string"))
            }
            _ => push(issues, mismatch, path, format!("{path} must be a string")),
        },
        Constraint::Timestamp => {
            if !value.as_i64().is_some_and(|secs| secs >= 0) {
                push(
                    issues,
                    ValidationCategory::InvalidTimestamp,
                    path,
                    format!("{path} must be a non-negative integer timestamp"),
                );
            }
        }
        Constraint::Flag => {
            if !value.is_boolean() {
                push(issues, mismatch, path, format!("{path} must be a boolean"));
            }
        }
        Constraint::Integer => {
            if value.as_i64().is_none() {
                push(issues, mismatch, path, format!("{path} must be an integer"));
            }
        }
        Constraint::Object(nested) => match value.as_object() {
            Some(fields) => check_fields(fields, nested, path, mismatch, issues),
            None => push(issues, mismatch, path, format!("{path} must be an object")),
        },
        Constraint::EmailAddresses => check_email_addresses(value, path, issues),
    }
}

fn check_email_addresses(value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    let category = ValidationCategory::InvalidUserData;
    let Some(entries) = value.as_array() else {
        push(issues, category, path, format!("{path} must be an array"));
        return;
    };
    if entries.is_empty() {
        push(
            issues,
            category,
            path,
            format!("{path} must contain at least one email address"),
        );
        return;
    }

    for (index, entry) in entries.iter().enumerate() {
        let entry_path = format!("{path}[{index}]");
        let Some(fields) = entry.as_object() else {
            push(issues, category, &entry_path, format!("{entry_path} must be an object"));
            continue;
        };
        check_fields(fields, EMAIL_ADDRESS_RULES, &entry_path, category, issues);

        if let Some(address) = fields.get("email_address").and_then(Value::as_str) {
            if !address.trim().is_empty() && !EmailAddress::is_valid(address) {
                push(
                    issues,
                    ValidationCategory::InvalidEmailFormat,
                    &format!("{entry_path}.email_address"),
                    format!("Invalid email format: {address}"),
                );
                // Only the first bad address is reported.
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_created(data: Value) -> Value {
        json!({"type": "user.created", "object": "event", "data": data})
    }

    fn valid_user_data() -> Value {
        json!({
            "id": "user_1",
            "email_addresses": [{"id": "idn_1", "email_address": "a@b.co"}],
            "created_at": 1_700_000_000,
            "updated_at": 1_700_000_000
        })
    }

    #[test]
    fn valid_user_created_becomes_a_typed_envelope() {
        let envelope = validate(&user_created(valid_user_data())).unwrap();

        assert_eq!(envelope.event_type, "user.created");
        assert_eq!(envelope.object, "event");
        match envelope.data {
            EventData::User(user) => {
                assert_eq!(user.id, "user_1");
                assert_eq!(user.primary_email(), Some("a@b.co"));
            }
            other => panic!("expected user data, got {other:?}"),
        }
    }

    #[test]
    fn every_problem_in_the_payload_is_reported() {
        let err = validate(&user_created(json!({
            "id": "user_1",
            "created_at": -1,
            "updated_at": 1_700_000_000
        })))
        .unwrap_err();

        assert_eq!(err.fields(), vec!["email_addresses", "created_at"]);
        assert_eq!(err.category, ValidationCategory::GeneralValidationError);
        assert_eq!(
            err.message(),
            "email_addresses is required; created_at must be a non-negative integer timestamp"
        );
    }

    #[test]
    fn issues_sharing_a_category_keep_it() {
        let err = validate(&user_created(json!({
            "id": "user_1",
            "email_addresses": [{"id": "idn_1", "email_address": "a@b.co"}],
            "created_at": "yesterday",
            "updated_at": 1.5
        })))
        .unwrap_err();

        assert_eq!(err.category, ValidationCategory::InvalidTimestamp);
        assert_eq!(err.issues.len(), 2);
    }

    #[test]
    fn only_the_first_invalid_email_is_reported() {
        let mut data = valid_user_data();
        data["email_addresses"] = json!([
            {"id": "idn_1", "email_address": "not-an-email"},
            {"id": "idn_2", "email_address": "also bad"}
        ]);

        let err = validate(&user_created(data)).unwrap_err();

        assert_eq!(err.category, ValidationCategory::InvalidEmailFormat);
        assert_eq!(err.message(), "Invalid email format: not-an-email");
    }

    #[test]
    fn empty_email_list_is_invalid_user_data() {
        let mut data = valid_user_data();
        data["email_addresses"] = json!([]);

        let err = validate(&user_created(data)).unwrap_err();
        assert_eq!(err.category, ValidationCategory::InvalidUserData);
    }

    #[test]
    fn null_counts_as_absent() {
        let mut data = valid_user_data();
        data["first_name"] = Value::Null;
        assert!(validate(&user_created(data.clone())).is_ok());

        data["id"] = Value::Null;
        let err = validate(&user_created(data)).unwrap_err();
        assert_eq!(err.category, ValidationCategory::MissingRequiredField);
        assert_eq!(err.message(), "id is required");
    }

    #[test]
    fn non_object_payload_is_invalid_structure() {
        let err = validate(&json!(["user.created"])).unwrap_err();
        assert_eq!(err.category, ValidationCategory::InvalidStructure);
    }

    #[test]
    fn envelope_problems_stop_before_the_data_phase() {
        let err = validate(&json!({"type": "", "object": "event", "data": {}})).unwrap_err();

        assert_eq!(err.category, ValidationCategory::InvalidStructure);
        assert_eq!(err.message(), "type must be a non-empty string");
    }

    #[test]
    fn user_deleted_only_needs_an_id() {
        let envelope = validate(&json!({
            "type": "user.deleted",
            "object": "event",
            "data": {"id": "user_1", "deleted": true}
        }))
        .unwrap();

        assert!(matches!(envelope.data, EventData::User(_)));
    }

    #[test]
    fn created_at_is_only_required_for_session_created() {
        let session = json!({"id": "sess_1", "user_id": "user_1"});

        let err = validate(&json!({"type": "session.created", "object": "event", "data": session}))
            .unwrap_err();
        assert_eq!(err.message(), "created_at is required");

        assert!(
            validate(&json!({"type": "session.ended", "object": "event", "data": session})).is_ok()
        );
    }

    #[test]
    fn nested_activity_fields_are_qualified() {
        let err = validate(&json!({
            "type": "session.ended",
            "object": "event",
            "data": {
                "id": "sess_1",
                "user_id": "user_1",
                "last_active_at": {"timestamp": -5}
            }
        }))
        .unwrap_err();

        assert_eq!(err.fields(), vec!["last_active_at.timestamp"]);
    }

    #[test]
    fn membership_organization_must_be_an_object() {
        let err = validate(&json!({
            "type": "organizationMembership.created",
            "object": "event",
            "data": {
                "id": "orgmem_1",
                "organization": "org_1",
                "public_user_data": {"user_id": "user_1"},
                "role": "admin"
            }
        }))
        .unwrap_err();

        assert_eq!(err.message(), "organization must be an object");
        assert_eq!(err.category, ValidationCategory::InvalidEventData);
    }

    #[test]
    fn organization_type_errors_use_the_organization_category() {
        let err = validate(&json!({
            "type": "organization.created",
            "object": "event",
            "data": {
                "id": "org_1",
                "name": 42,
                "slug": "acme",
                "created_at": 1_700_000_000,
                "updated_at": 1_700_000_000
            }
        }))
        .unwrap_err();

        assert_eq!(err.category, ValidationCategory::InvalidOrganizationData);
    }

    #[test]
    fn unknown_event_types_pass_through() {
        let envelope = validate(&json!({
            "type": "foo.bar",
            "object": "event",
            "data": {"anything": ["goes"]}
        }))
        .unwrap();

        assert_eq!(envelope.data, EventData::Unknown(json!({"anything": ["goes"]})));
    }

    #[test]
    fn categories_serialize_in_screaming_snake_case() {
        assert_eq!(
            serde_json::to_value(ValidationCategory::InvalidOrganizationData).unwrap(),
            json!("INVALID_ORGANIZATION_DATA")
        );
        assert_eq!(
            ValidationCategory::UnknownEventType.to_string(),
            "UNKNOWN_EVENT_TYPE"
        );
    }
}
