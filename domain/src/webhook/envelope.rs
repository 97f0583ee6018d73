//! Typed form of a validated webhook payload.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

/// Event types are grouped by the prefix before the first `.`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    User,
    Session,
    Organization,
    OrganizationMembership,
    Unknown,
}

impl EventFamily {
    pub fn of(event_type: &str) -> Self {
        match event_type.split_once('.').map(|(prefix, _)| prefix) {
            Some("user") => EventFamily::User,
            Some("session") => EventFamily::Session,
            Some("organization") => EventFamily::Organization,
            Some("organizationMembership") => EventFamily::OrganizationMembership,
            _ => EventFamily::Unknown,
        }
    }
}

/// A webhook payload that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEnvelope {
    pub event_type: String,
    pub object: String,
    pub timestamp: Option<i64>,
    pub data: EventData,
    /// The payload exactly as decoded, stored on the audit record.
    pub raw: Value,
}

impl WebhookEnvelope {
    pub fn family(&self) -> EventFamily {
        EventFamily::of(&self.event_type)
    }

    /// The identity provider id the event is about, recorded on the audit record.
    pub fn clerk_id(&self) -> Option<String> {
        match &self.data {
            EventData::User(user) => Some(user.id.clone()),
            EventData::Session(session) => Some(session.user_id.clone()),
            EventData::Organization(organization) => Some(organization.id.clone()),
            EventData::OrganizationMembership(membership) => {
                membership.public_user_data.user_id.clone()
            }
            EventData::Unknown(data) => data.get("id").and_then(Value::as_str).map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    User(UserEventData),
    Session(SessionEventData),
    Organization(OrganizationEventData),
    OrganizationMembership(MembershipEventData),
    Unknown(Value),
}

impl EventData {
    pub fn from_value(family: EventFamily, data: Value) -> Result<Self, serde_json::Error> {
        Ok(match family {
            EventFamily::User => EventData::User(serde_json::from_value(data)?),
            EventFamily::Session => EventData::Session(serde_json::from_value(data)?),
            EventFamily::Organization => EventData::Organization(serde_json::from_value(data)?),
            EventFamily::OrganizationMembership => {
                EventData::OrganizationMembership(serde_json::from_value(data)?)
            }
            EventFamily::Unknown => EventData::Unknown(data),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmailAddressData {
    pub id: String,
    pub email_address: Option<String>,
    pub primary: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserEventData {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddressData>,
    pub primary_email_address_id: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub image_url: Option<String>,
    pub public_metadata: Option<Value>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub banned: Option<bool>,
    pub locked: Option<bool>,
}

impl UserEventData {
    /// The address named by `primary_email_address_id`, then the one flagged
    /// `primary`, then the first listed.
    pub fn primary_email(&self) -> Option<&str> {
        let by_id = self.primary_email_address_id.as_deref().and_then(|primary_id| {
            self.email_addresses
                .iter()
                .find(|address| address.id == primary_id)
        });
        let by_flag = || {
            self.email_addresses
                .iter()
                .find(|address| address.primary == Some(true))
        };

        by_id
            .or_else(by_flag)
            .or_else(|| self.email_addresses.first())
            .and_then(|address| address.email_address.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionActivity {
    pub timestamp: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionEventData {
    pub id: String,
    pub user_id: String,
    pub status: Option<String>,
    pub client_id: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub expire_at: Option<i64>,
    pub abandon_at: Option<i64>,
    pub last_active_at: Option<SessionActivity>,
}

impl SessionEventData {
    /// Provider-side session attributes kept alongside the local session row.
    pub fn metadata(&self) -> Value {
        json!({
            "status": self.status,
            "expire_at": self.expire_at,
            "abandon_at": self.abandon_at,
            "client_id": self.client_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrganizationEventData {
    pub id: String,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub image_url: Option<String>,
    pub logo_url: Option<String>,
    pub public_metadata: Option<Value>,
    pub max_allowed_memberships: Option<i64>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct MembershipOrganization {
    pub id: Option<String>,
    pub name: Option<String>,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PublicUserData {
    pub user_id: Option<String>,
    pub identifier: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MembershipEventData {
    pub id: String,
    pub organization: MembershipOrganization,
    pub public_user_data: PublicUserData,
    pub role: String,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

/// Converts the provider's epoch seconds. `None` when out of chrono's range.
pub fn timestamp_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}
