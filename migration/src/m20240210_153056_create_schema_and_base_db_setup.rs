use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create the platform's schema
        manager
            .get_connection()
            .execute_unprepared("CREATE SCHEMA IF NOT EXISTS sync_platform;")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("SET search_path TO sync_platform, public;")
            .await?;

        // Grant the service's DB user access to everything created in the schema
        manager
            .get_connection()
            .execute_unprepared(r#"
                DO $$ BEGIN
                    GRANT ALL PRIVILEGES ON DATABASE sync TO sync;
                    GRANT ALL ON SCHEMA sync_platform TO sync;

                    ALTER DEFAULT PRIVILEGES IN SCHEMA sync_platform GRANT ALL ON TABLES TO sync;
                    ALTER DEFAULT PRIVILEGES IN SCHEMA sync_platform GRANT ALL ON SEQUENCES TO sync;
                END $$;
            "#)
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(r#"
                DO $$ BEGIN
                    ALTER DEFAULT PRIVILEGES IN SCHEMA sync_platform REVOKE ALL ON SEQUENCES FROM sync;
                    ALTER DEFAULT PRIVILEGES IN SCHEMA sync_platform REVOKE ALL ON TABLES FROM sync;
                    REVOKE ALL ON SCHEMA sync_platform FROM sync;
                    REVOKE ALL PRIVILEGES ON DATABASE sync FROM sync;
                END $$;
            "#)
            .await?;

        // CASCADE removes every table and type in the schema
        manager
            .get_connection()
            .execute_unprepared("DROP SCHEMA IF EXISTS sync_platform CASCADE;")
            .await?;

        Ok(())
    }
}
