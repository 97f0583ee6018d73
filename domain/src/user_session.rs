//! Local tracking of identity provider sessions.

use crate::error::Error;
use crate::webhook::envelope::{timestamp_to_datetime, SessionEventData};
use crate::{user, user_sessions, Id};
use chrono::{DateTime, Duration, Utc};
use entity_api::mutate::{IntoUpdateMap, UpdateMap};
use entity_api::user_session;
use log::*;
use sea_orm::prelude::{DateTimeWithTimeZone, Json};
use sea_orm::{ConnectionTrait, Value};
use serde::Serialize;

/// Mutable session attributes. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub last_activity: Option<DateTimeWithTimeZone>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_metadata: Option<Json>,
}

impl IntoUpdateMap for SessionUpdate {
    fn into_update_map(self) -> UpdateMap {
        let mut update_map = UpdateMap::new();
        if let Some(last_activity) = self.last_activity {
            update_map.insert(
                "last_activity".to_string(),
                Some(Value::from(Some(last_activity))),
            );
        }
        if let Some(ip_address) = self.ip_address {
            update_map.insert("ip_address".to_string(), Some(Value::from(Some(ip_address))));
        }
        if let Some(user_agent) = self.user_agent {
            update_map.insert("user_agent".to_string(), Some(Value::from(Some(user_agent))));
        }
        if let Some(session_metadata) = self.session_metadata {
            update_map.insert(
                "session_metadata".to_string(),
                Some(Value::from(Some(session_metadata))),
            );
        }
        update_map
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub total_sessions: u64,
    pub active_sessions: u64,
    /// Mean of `ended_at - created_at` over ended sessions only.
    pub average_session_duration_ms: Option<f64>,
}

impl SessionStats {
    pub fn from_sessions(sessions: &[user_sessions::Model]) -> Self {
        let durations: Vec<i64> = sessions
            .iter()
            .filter_map(|session| {
                session
                    .ended_at
                    .map(|ended_at| (ended_at - session.created_at).num_milliseconds())
            })
            .collect();

        let average_session_duration_ms = (!durations.is_empty())
            .then(|| durations.iter().sum::<i64>() as f64 / durations.len() as f64);

        SessionStats {
            total_sessions: sessions.len() as u64,
            active_sessions: sessions.iter().filter(|session| session.is_active()).count() as u64,
            average_session_duration_ms,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum SessionStartOutcome {
    Created(user_sessions::Model),
    /// The session is already tracked; nothing was written.
    AlreadyTracked,
}

pub async fn create_session(
    db: &impl ConnectionTrait,
    session: user_sessions::Model,
) -> Result<user_sessions::Model, Error> {
    let session = user_session::create(db, session).await?;
    info!(
        "Tracking session {} for user {}",
        session.clerk_session_id, session.user_id
    );
    Ok(session)
}

pub async fn update_session(
    db: &impl ConnectionTrait,
    clerk_session_id: &str,
    update: SessionUpdate,
) -> Result<user_sessions::Model, Error> {
    user_session::update_by_clerk_session_id(db, clerk_session_id, update)
        .await
        .map_err(|err| {
            let err = Error::from(err);
            if err.is_not_found() {
                Error::not_found(format!("Session {clerk_session_id} not found"))
            } else {
                err
            }
        })
}

/// Ends a tracked session. Ending an already ended session keeps its first `ended_at`.
pub async fn end_session(
    db: &impl ConnectionTrait,
    clerk_session_id: &str,
) -> Result<user_sessions::Model, Error> {
    let existing = user_session::find_by_clerk_session_id(db, clerk_session_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("Session {clerk_session_id} not found")))?;

    let session = user_session::end(db, existing).await?;
    info!("Session {clerk_session_id} ended");
    Ok(session)
}

pub async fn get_active_sessions(
    db: &impl ConnectionTrait,
    user_id: Id,
) -> Result<Vec<user_sessions::Model>, Error> {
    Ok(user_session::find_active_by_user_id(db, user_id).await?)
}

pub async fn get_session_by_external_id(
    db: &impl ConnectionTrait,
    clerk_session_id: &str,
) -> Result<Option<user_sessions::Model>, Error> {
    Ok(user_session::find_by_clerk_session_id(db, clerk_session_id).await?)
}

/// Best effort: failures are logged and swallowed.
pub async fn update_last_activity(
    db: &impl ConnectionTrait,
    clerk_session_id: &str,
    at: DateTime<Utc>,
) {
    match user_session::touch_last_activity(db, clerk_session_id, at).await {
        Ok(0) => debug!("No session {clerk_session_id} to record activity for"),
        Ok(_) => trace!("Recorded activity for session {clerk_session_id}"),
        Err(err) => warn!("Failed to record activity for session {clerk_session_id}: {err}"),
    }
}

/// Hard deletes sessions created more than `max_age_days` ago, ended or not.
pub async fn cleanup_expired_sessions(
    db: &impl ConnectionTrait,
    max_age_days: u32,
) -> Result<u64, Error> {
    let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
    let deleted = user_session::delete_created_before(db, cutoff).await?;
    info!("Removed {deleted} sessions created before {cutoff}");
    Ok(deleted)
}

pub async fn get_session_stats(
    db: &impl ConnectionTrait,
    user_id: Id,
) -> Result<SessionStats, Error> {
    let sessions = user_session::find_by_user_id(db, user_id).await?;
    Ok(SessionStats::from_sessions(&sessions))
}

/// Starts tracking the session described by a `session.created` event.
///
/// The owning user has to exist locally already; when it does not the event
/// fails with a not-found error and is left for a retry.
pub async fn start_from_event(
    db: &impl ConnectionTrait,
    data: &SessionEventData,
) -> Result<SessionStartOutcome, Error> {
    let Some(owner) = user::find_by_clerk_id(db, &data.user_id).await? else {
        return Err(Error::not_found(format!(
            "User {} not found for session {}",
            data.user_id, data.id
        )));
    };

    if get_session_by_external_id(db, &data.id).await?.is_some() {
        debug!("Session {} is already tracked", data.id);
        return Ok(SessionStartOutcome::AlreadyTracked);
    }

    let now = Utc::now();
    let activity = data.last_active_at.as_ref();
    let session = user_sessions::Model {
        id: Id::default(),
        clerk_session_id: data.id.clone(),
        user_id: owner.id,
        created_at: data
            .created_at
            .and_then(timestamp_to_datetime)
            .unwrap_or(now)
            .into(),
        ended_at: None,
        last_activity: Some(
            activity
                .and_then(|activity| activity.timestamp)
                .and_then(timestamp_to_datetime)
                .unwrap_or(now)
                .into(),
        ),
        ip_address: activity.and_then(|activity| activity.ip_address.clone()),
        user_agent: activity.and_then(|activity| activity.user_agent.clone()),
        session_metadata: Some(data.metadata()),
        updated_at: now.into(),
    };

    match create_session(db, session).await {
        Ok(session) => Ok(SessionStartOutcome::Created(session)),
        Err(err) if err.is_already_exists() => {
            info!("Session {} was created concurrently, treating as applied", data.id);
            Ok(SessionStartOutcome::AlreadyTracked)
        }
        Err(err) => Err(err),
    }
}

pub async fn end_from_event(
    db: &impl ConnectionTrait,
    data: &SessionEventData,
) -> Result<user_sessions::Model, Error> {
    end_session(db, &data.id).await
}
