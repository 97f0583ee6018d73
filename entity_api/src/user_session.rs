//! Persistence operations for the user_sessions table.

use super::error::Error;
use super::mutate::{self, IntoUpdateMap};
use chrono::{DateTime, Utc};
use entity::user_sessions::{ActiveModel, Column, Entity, Model};
use entity::Id;
use log::*;
use sea_orm::{
    entity::prelude::*,
    sea_query::Expr,
    ActiveValue::{Set, Unchanged},
    ConnectionTrait, IntoActiveModel, QueryOrder,
};

/// Inserts a new session record. `id` and `updated_at` on the passed model are ignored.
pub async fn create(db: &impl ConnectionTrait, session_model: Model) -> Result<Model, Error> {
    debug!(
        "Creating user session {} for user {}",
        session_model.clerk_session_id, session_model.user_id
    );

    let active_model = ActiveModel {
        clerk_session_id: Set(session_model.clerk_session_id),
        user_id: Set(session_model.user_id),
        created_at: Set(session_model.created_at),
        ended_at: Set(session_model.ended_at),
        last_activity: Set(session_model.last_activity),
        ip_address: Set(session_model.ip_address),
        user_agent: Set(session_model.user_agent),
        session_metadata: Set(session_model.session_metadata),
        updated_at: Set(Utc::now().into()),
        ..Default::default()
    };

    Ok(active_model.insert(db).await?)
}

pub async fn find_by_clerk_session_id(
    db: &impl ConnectionTrait,
    clerk_session_id: &str,
) -> Result<Option<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::ClerkSessionId.eq(clerk_session_id))
        .one(db)
        .await?)
}

/// Active sessions (no `ended_at`) for a user, newest first.
pub async fn find_active_by_user_id(
    db: &impl ConnectionTrait,
    user_id: Id,
) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::UserId.eq(user_id))
        .filter(Column::EndedAt.is_null())
        .order_by_desc(Column::CreatedAt)
        .all(db)
        .await?)
}

pub async fn find_by_user_id(db: &impl ConnectionTrait, user_id: Id) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::UserId.eq(user_id))
        .order_by_desc(Column::CreatedAt)
        .all(db)
        .await?)
}

/// Applies a partial update to the session identified by its external id.
pub async fn update_by_clerk_session_id(
    db: &impl ConnectionTrait,
    clerk_session_id: &str,
    params: impl IntoUpdateMap,
) -> Result<Model, Error> {
    let existing = find_by_clerk_session_id(db, clerk_session_id)
        .await?
        .ok_or_else(Error::not_found)?;

    let mut update_map = params.into_update_map();
    update_map.insert(
        Column::UpdatedAt.to_string(),
        Some(DateTimeWithTimeZone::from(Utc::now()).into()),
    );

    mutate::update::<ActiveModel, Column>(db, existing.into_active_model(), update_map).await
}

/// Marks a session as ended. A session that already ended keeps its original `ended_at`.
pub async fn end(db: &impl ConnectionTrait, existing: Model) -> Result<Model, Error> {
    if existing.ended_at.is_some() {
        debug!(
            "User session {} already ended, leaving it unchanged",
            existing.clerk_session_id
        );
        return Ok(existing);
    }

    let now = Utc::now();
    let active_model = ActiveModel {
        id: Unchanged(existing.id),
        clerk_session_id: Unchanged(existing.clerk_session_id),
        user_id: Unchanged(existing.user_id),
        created_at: Unchanged(existing.created_at),
        ended_at: Set(Some(now.into())),
        last_activity: Unchanged(existing.last_activity),
        ip_address: Unchanged(existing.ip_address),
        user_agent: Unchanged(existing.user_agent),
        session_metadata: Unchanged(existing.session_metadata),
        updated_at: Set(now.into()),
    };

    Ok(active_model.update(db).await?)
}

/// Sets `last_activity` without loading the row first. Returns the number of rows touched.
pub async fn touch_last_activity(
    db: &impl ConnectionTrait,
    clerk_session_id: &str,
    at: DateTime<Utc>,
) -> Result<u64, Error> {
    let at: DateTimeWithTimeZone = at.into();
    let result = Entity::update_many()
        .col_expr(Column::LastActivity, Expr::value(at))
        .col_expr(Column::UpdatedAt, Expr::value(at))
        .filter(Column::ClerkSessionId.eq(clerk_session_id))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

/// Hard deletes every session created before `cutoff`, active or not.
pub async fn delete_created_before(
    db: &impl ConnectionTrait,
    cutoff: DateTime<Utc>,
) -> Result<u64, Error> {
    let cutoff: DateTimeWithTimeZone = cutoff.into();
    let result = Entity::delete_many()
        .filter(Column::CreatedAt.lt(cutoff))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}
