use super::error::{EntityApiErrorKind, Error};
use super::mutate::{self, IntoUpdateMap};
use chrono::Utc;

use entity::users::{ActiveModel, Column, Entity, Model};
use entity::Id;
use log::*;
use sea_orm::{entity::prelude::*, ConnectionTrait, IntoActiveModel, Set};

pub async fn create(db: &impl ConnectionTrait, user_model: Model) -> Result<Model, Error> {
    debug!("New User Model to be inserted: {user_model:?}");

    let now = Utc::now();
    let user_active_model: ActiveModel = ActiveModel {
        clerk_id: Set(user_model.clerk_id),
        email: Set(user_model.email),
        first_name: Set(user_model.first_name),
        last_name: Set(user_model.last_name),
        username: Set(user_model.username),
        image_url: Set(user_model.image_url),
        public_metadata: Set(user_model.public_metadata),
        banned: Set(user_model.banned),
        locked: Set(user_model.locked),
        clerk_created_at: Set(user_model.clerk_created_at),
        clerk_updated_at: Set(user_model.clerk_updated_at),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        ..Default::default()
    };

    Ok(user_active_model.insert(db).await?)
}

pub async fn find_by_clerk_id(
    db: &impl ConnectionTrait,
    clerk_id: &str,
) -> Result<Option<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::ClerkId.eq(clerk_id))
        .one(db)
        .await?)
}

pub async fn find_by_id(db: &impl ConnectionTrait, id: Id) -> Result<Model, Error> {
    Entity::find_by_id(id).one(db).await?.ok_or(Error {
        source: None,
        error_kind: EntityApiErrorKind::RecordNotFound,
    })
}

/// Applies the given column changes to an already loaded user. `updated_at` is
/// always refreshed.
pub async fn update(
    db: &impl ConnectionTrait,
    existing: Model,
    params: impl IntoUpdateMap,
) -> Result<Model, Error> {
    let mut update_map = params.into_update_map();
    update_map.insert(
        Column::UpdatedAt.to_string(),
        Some(DateTimeWithTimeZone::from(Utc::now()).into()),
    );

    debug!("Updating user {} ({})", existing.id, existing.clerk_id);

    mutate::update::<ActiveModel, Column>(db, existing.into_active_model(), update_map).await
}

pub async fn delete(db: &impl ConnectionTrait, user_id: Id) -> Result<(), Error> {
    Entity::delete_by_id(user_id).exec(db).await?;
    Ok(())
}
