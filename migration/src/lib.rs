pub use sea_orm_migration::prelude::*;

mod m20240210_153056_create_schema_and_base_db_setup;
mod m20240211_120000_create_users_and_sessions;
mod m20240212_090000_create_webhook_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240210_153056_create_schema_and_base_db_setup::Migration),
            Box::new(m20240211_120000_create_users_and_sessions::Migration),
            Box::new(m20240212_090000_create_webhook_events::Migration),
        ]
    }
}
