//! SeaORM Entity for the users table.
//! Local mirror of identity provider users, keyed by their external `clerk_id`.

use crate::Id;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(schema_name = "sync_platform", table_name = "users")]
pub struct Model {
    #[serde(skip_deserializing)]
    #[sea_orm(primary_key)]
    pub id: Id,

    /// The identity provider's user id (e.g. `user_2abc...`)
    #[sea_orm(unique)]
    pub clerk_id: String,

    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub image_url: Option<String>,
    pub public_metadata: Option<Json>,
    pub banned: bool,
    pub locked: bool,

    /// Creation time as reported by the identity provider
    pub clerk_created_at: Option<DateTimeWithTimeZone>,
    /// Last update time as reported by the identity provider
    pub clerk_updated_at: Option<DateTimeWithTimeZone>,

    #[serde(skip_deserializing)]
    pub created_at: DateTimeWithTimeZone,
    #[serde(skip_deserializing)]
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user_sessions::Entity")]
    UserSessions,
}

impl Related<super::user_sessions::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserSessions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
