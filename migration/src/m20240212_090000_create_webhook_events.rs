use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE TYPE sync_platform.webhook_event_status AS ENUM (
                    'processing',
                    'success',
                    'failed',
                    'retrying'
                )",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                "CREATE TABLE sync_platform.webhook_events (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    event_type VARCHAR(255) NOT NULL,
                    clerk_id VARCHAR(255),
                    payload JSONB NOT NULL,
                    status sync_platform.webhook_event_status NOT NULL DEFAULT 'processing',
                    error_message TEXT,
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    processed_at TIMESTAMPTZ,
                    webhook_id VARCHAR(255),
                    webhook_timestamp VARCHAR(64),
                    processing_duration_ms BIGINT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )",
            )
            .await?;

        for (index, column) in [
            ("idx_webhook_events_event_type", "event_type"),
            ("idx_webhook_events_clerk_id", "clerk_id"),
            ("idx_webhook_events_status", "status"),
            ("idx_webhook_events_processed_at", "processed_at"),
        ] {
            manager
                .get_connection()
                .execute_unprepared(&format!(
                    "CREATE INDEX {index} ON sync_platform.webhook_events ({column})"
                ))
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS sync_platform.webhook_events")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP TYPE IF EXISTS sync_platform.webhook_event_status")
            .await?;

        Ok(())
    }
}
