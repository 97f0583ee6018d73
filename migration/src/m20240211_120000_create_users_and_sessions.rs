use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE TABLE sync_platform.users (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    clerk_id VARCHAR(255) NOT NULL UNIQUE,
                    email VARCHAR(255) NOT NULL,
                    first_name VARCHAR(255),
                    last_name VARCHAR(255),
                    username VARCHAR(255),
                    image_url TEXT,
                    public_metadata JSONB,
                    banned BOOLEAN NOT NULL DEFAULT FALSE,
                    locked BOOLEAN NOT NULL DEFAULT FALSE,
                    clerk_created_at TIMESTAMPTZ,
                    clerk_updated_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                "CREATE TABLE sync_platform.user_sessions (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    clerk_session_id VARCHAR(255) NOT NULL UNIQUE,
                    user_id UUID NOT NULL REFERENCES sync_platform.users(id) ON DELETE CASCADE,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    ended_at TIMESTAMPTZ,
                    last_activity TIMESTAMPTZ,
                    ip_address VARCHAR(64),
                    user_agent TEXT,
                    session_metadata JSONB,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )",
            )
            .await?;

        // Active-session lookups filter on (user_id, ended_at IS NULL)
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX idx_user_sessions_user_id_ended_at
                 ON sync_platform.user_sessions (user_id, ended_at)",
            )
            .await?;

        // Session cleanup deletes by age
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX idx_user_sessions_created_at
                 ON sync_platform.user_sessions (created_at)",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS sync_platform.user_sessions")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS sync_platform.users")
            .await?;

        Ok(())
    }
}
