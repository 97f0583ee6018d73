use crate::error::{DomainErrorKind, EntityErrorKind, Error, InternalErrorKind};
use crate::webhook::envelope::{timestamp_to_datetime, UserEventData};
use crate::{users, Id};
use chrono::Utc;
use entity_api::mutate::{IntoUpdateMap, UpdateMap};
use log::*;
use sea_orm::prelude::{DateTimeWithTimeZone, Json};
use sea_orm::{ConnectionTrait, Value};

pub use entity_api::user::{find_by_clerk_id, find_by_id};

/// What an upsert did to the local user row.
#[derive(Debug, PartialEq)]
pub enum UpsertOutcome {
    Created(users::Model),
    Updated(users::Model),
    Unchanged(users::Model),
    /// A concurrent delivery inserted the same user first.
    AlreadyApplied,
}

/// Columns whose stored value differs from an incoming user event.
///
/// The outer `Option` marks a change; the inner one is the new, possibly null, value.
#[derive(Debug, Default, PartialEq)]
pub struct UserChanges {
    pub email: Option<String>,
    pub first_name: Option<Option<String>>,
    pub last_name: Option<Option<String>>,
    pub username: Option<Option<String>>,
    pub image_url: Option<Option<String>>,
    pub public_metadata: Option<Option<Json>>,
    pub banned: Option<bool>,
    pub locked: Option<bool>,
    pub clerk_created_at: Option<Option<DateTimeWithTimeZone>>,
    pub clerk_updated_at: Option<Option<DateTimeWithTimeZone>>,
}

fn changed<T: PartialEq + Clone>(current: &T, incoming: &T) -> Option<T> {
    (current != incoming).then(|| incoming.clone())
}

impl UserChanges {
    /// Profile fields follow the event, including nulls. Email, flags and provider
    /// timestamps only change when the event carries a value.
    pub fn between(existing: &users::Model, incoming: &UserEventData) -> Self {
        let clerk_created_at = incoming.created_at.and_then(to_db_time);
        let clerk_updated_at = incoming.updated_at.and_then(to_db_time);

        UserChanges {
            email: incoming
                .primary_email()
                .and_then(|email| changed(&existing.email.as_str(), &email))
                .map(str::to_string),
            first_name: changed(&existing.first_name, &incoming.first_name),
            last_name: changed(&existing.last_name, &incoming.last_name),
            username: changed(&existing.username, &incoming.username),
            image_url: changed(&existing.image_url, &incoming.image_url),
            public_metadata: changed(&existing.public_metadata, &incoming.public_metadata),
            banned: incoming
                .banned
                .and_then(|banned| changed(&existing.banned, &banned)),
            locked: incoming
                .locked
                .and_then(|locked| changed(&existing.locked, &locked)),
            clerk_created_at: clerk_created_at
                .and_then(|at| changed(&existing.clerk_created_at, &Some(at))),
            clerk_updated_at: clerk_updated_at
                .and_then(|at| changed(&existing.clerk_updated_at, &Some(at))),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == UserChanges::default()
    }
}

impl IntoUpdateMap for UserChanges {
    fn into_update_map(self) -> UpdateMap {
        let mut update_map = UpdateMap::new();
        if let Some(email) = self.email {
            update_map.insert("email".to_string(), Some(Value::from(email)));
        }
        if let Some(first_name) = self.first_name {
            update_map.insert("first_name".to_string(), Some(Value::from(first_name)));
        }
        if let Some(last_name) = self.last_name {
            update_map.insert("last_name".to_string(), Some(Value::from(last_name)));
        }
        if let Some(username) = self.username {
            update_map.insert("username".to_string(), Some(Value::from(username)));
        }
        if let Some(image_url) = self.image_url {
            update_map.insert("image_url".to_string(), Some(Value::from(image_url)));
        }
        if let Some(public_metadata) = self.public_metadata {
            update_map.insert(
                "public_metadata".to_string(),
                Some(Value::from(public_metadata)),
            );
        }
        if let Some(banned) = self.banned {
            update_map.insert("banned".to_string(), Some(Value::from(banned)));
        }
        if let Some(locked) = self.locked {
            update_map.insert("locked".to_string(), Some(Value::from(locked)));
        }
        if let Some(clerk_created_at) = self.clerk_created_at {
            update_map.insert(
                "clerk_created_at".to_string(),
                Some(Value::from(clerk_created_at)),
            );
        }
        if let Some(clerk_updated_at) = self.clerk_updated_at {
            update_map.insert(
                "clerk_updated_at".to_string(),
                Some(Value::from(clerk_updated_at)),
            );
        }
        update_map
    }
}

fn to_db_time(secs: i64) -> Option<DateTimeWithTimeZone> {
    timestamp_to_datetime(secs).map(Into::into)
}

fn new_user(data: &UserEventData, email: &str) -> users::Model {
    let now = Utc::now();
    users::Model {
        id: Id::default(),
        clerk_id: data.id.clone(),
        email: email.to_string(),
        first_name: data.first_name.clone(),
        last_name: data.last_name.clone(),
        username: data.username.clone(),
        image_url: data.image_url.clone(),
        public_metadata: data.public_metadata.clone(),
        banned: data.banned.unwrap_or(false),
        locked: data.locked.unwrap_or(false),
        clerk_created_at: data.created_at.and_then(to_db_time),
        clerk_updated_at: data.updated_at.and_then(to_db_time),
        created_at: now.into(),
        updated_at: now.into(),
    }
}

/// Creates or refreshes the local copy of a provider user, keyed by its external id.
///
/// Safe to repeat: a second delivery of the same event finds the row and leaves it
/// unchanged.
pub async fn upsert_from_event(
    db: &impl ConnectionTrait,
    data: &UserEventData,
) -> Result<UpsertOutcome, Error> {
    let Some(email) = data.primary_email() else {
        return Err(Error {
            source: Some(format!("User {} has no email address", data.id).into()),
            error_kind: DomainErrorKind::Internal(InternalErrorKind::Entity(
                EntityErrorKind::Invalid,
            )),
        });
    };

    match find_by_clerk_id(db, &data.id).await? {
        Some(existing) => {
            let changes = UserChanges::between(&existing, data);
            if changes.is_empty() {
                debug!("User {} is already up to date", data.id);
                return Ok(UpsertOutcome::Unchanged(existing));
            }
            let user = entity_api::user::update(db, existing, changes).await?;
            info!("Updated user {}", user.clerk_id);
            Ok(UpsertOutcome::Updated(user))
        }
        None => match entity_api::user::create(db, new_user(data, email)).await {
            Ok(user) => {
                info!("Created user {}", user.clerk_id);
                Ok(UpsertOutcome::Created(user))
            }
            Err(err) => {
                let err = Error::from(err);
                if err.is_already_exists() {
                    info!("User {} was created concurrently, treating as applied", data.id);
                    Ok(UpsertOutcome::AlreadyApplied)
                } else {
                    Err(err)
                }
            }
        },
    }
}

/// Removes the local user and, through the foreign key, its sessions.
/// Returns `false` when there was nothing to delete.
pub async fn delete_by_clerk_id(db: &impl ConnectionTrait, clerk_id: &str) -> Result<bool, Error> {
    match find_by_clerk_id(db, clerk_id).await? {
        Some(user) => {
            entity_api::user::delete(db, user.id).await?;
            info!("Deleted user {clerk_id}");
            Ok(true)
        }
        None => {
            debug!("User {clerk_id} does not exist locally, nothing to delete");
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn event_data() -> UserEventData {
        serde_json::from_value(json!({
            "id": "user_1",
            "email_addresses": [{"id": "idn_1", "email_address": "a@b.co"}],
            "first_name": "Ada",
            "created_at": 1_700_000_000,
            "updated_at": 1_700_000_000
        }))
        .unwrap()
    }

    fn stored_user() -> users::Model {
        new_user(&event_data(), "a@b.co")
    }

    #[test]
    fn identical_event_produces_no_changes() {
        assert!(UserChanges::between(&stored_user(), &event_data()).is_empty());
    }

    #[test]
    fn only_differing_fields_are_changed() {
        let mut incoming = event_data();
        incoming.first_name = None;
        incoming.image_url = Some("https://img.example.com/ada.png".to_string());

        let changes = UserChanges::between(&stored_user(), &incoming);

        assert_eq!(changes.first_name, Some(None));
        assert_eq!(
            changes.image_url,
            Some(Some("https://img.example.com/ada.png".to_string()))
        );
        assert_eq!(changes.email, None);
        assert_eq!(changes.banned, None);

        let update_map = changes.into_update_map();
        assert!(update_map.get("first_name").is_some());
        assert!(update_map.get("last_name").is_none());
    }

    #[test]
    fn absent_flags_keep_their_stored_value() {
        let mut existing = stored_user();
        existing.banned = true;

        let changes = UserChanges::between(&existing, &event_data());
        assert_eq!(changes.banned, None);
    }
}

#[cfg(test)]
#[cfg(feature = "mock")]
mod mock_tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn event_data() -> UserEventData {
        super::tests::event_data()
    }

    #[tokio::test]
    async fn upsert_creates_missing_user() -> Result<(), Error> {
        let created = new_user(&event_data(), "a@b.co");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<users::Model, Vec<users::Model>, _>(vec![vec![]])
            .append_query_results(vec![vec![created.clone()]])
            .into_connection();

        let outcome = upsert_from_event(&db, &event_data()).await?;

        assert_eq!(outcome, UpsertOutcome::Created(created));
        Ok(())
    }

    #[tokio::test]
    async fn repeated_delivery_leaves_user_unchanged() -> Result<(), Error> {
        let existing = new_user(&event_data(), "a@b.co");
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![existing.clone()]])
            .into_connection();

        let outcome = upsert_from_event(&db, &event_data()).await?;

        assert_eq!(outcome, UpsertOutcome::Unchanged(existing));
        // One lookup, no write.
        assert_eq!(db.into_transaction_log().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn delete_of_unknown_user_succeeds() -> Result<(), Error> {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results::<users::Model, Vec<users::Model>, _>(vec![vec![]])
            .into_connection();

        assert!(!delete_by_clerk_id(&db, "user_missing").await?);
        Ok(())
    }
}
