//! SeaORM Entity for the user_sessions table.
//! Tracks identity provider sessions correlated with local users. A row with
//! `ended_at = NULL` is an active session.

use crate::Id;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(schema_name = "sync_platform", table_name = "user_sessions")]
pub struct Model {
    #[serde(skip_deserializing)]
    #[sea_orm(primary_key)]
    pub id: Id,

    /// The identity provider's session id (e.g. `sess_2abc...`)
    #[sea_orm(unique)]
    pub clerk_session_id: String,

    pub user_id: Id,

    pub created_at: DateTimeWithTimeZone,

    /// Set once when the session ends, never cleared afterwards
    pub ended_at: Option<DateTimeWithTimeZone>,

    pub last_activity: Option<DateTimeWithTimeZone>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_metadata: Option<Json>,

    #[serde(skip_deserializing)]
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Users,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
