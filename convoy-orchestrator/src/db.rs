use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use convoy_core::domain::job_definition::EXECUTION_SEMAPHORE_NAME;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    migrate_job_infos(pool).await?;
    migrate_job_definitions(pool).await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

/// Creates the job execution table and its indexes.
///
/// The unique `name_state` index is what carries mutual exclusion: a second
/// QUEUED or RUNNING insert for the same name fails with a unique violation,
/// while finished records never collide because each one holds a fresh
/// `FINISHED_<uuid>` token.
pub async fn migrate_job_infos(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_infos (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            host VARCHAR(255) NOT NULL,
            thread VARCHAR(255) NOT NULL,
            creation_time TIMESTAMPTZ NOT NULL,
            start_time TIMESTAMPTZ,
            finish_time TIMESTAMPTZ,
            last_modification_time TIMESTAMPTZ NOT NULL,
            running_state VARCHAR(64) NOT NULL,
            result_state VARCHAR(32),
            result_message TEXT,
            status_message TEXT,
            execution_priority VARCHAR(32) NOT NULL,
            max_execution_time BIGINT NOT NULL,
            max_idle_time BIGINT,
            parameters JSONB NOT NULL DEFAULT '{}',
            additional_data JSONB NOT NULL DEFAULT '{}',
            log_lines JSONB NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_infos_name ON job_infos(name)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_infos_last_modification_time \
         ON job_infos(last_modification_time)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_infos_running_state_creation_time \
         ON job_infos(running_state, creation_time)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_infos_name_creation_time \
         ON job_infos(name, creation_time)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_job_infos_name_state \
         ON job_infos(name, running_state)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn migrate_job_definitions(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_definitions (
            name VARCHAR(255) PRIMARY KEY,
            timeout_period BIGINT NOT NULL DEFAULT 0,
            polling_interval BIGINT NOT NULL DEFAULT 0,
            remote BOOLEAN NOT NULL DEFAULT FALSE,
            disabled BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Well-known sentinel acting as the repository-wide execution semaphore.
    sqlx::query(
        "INSERT INTO job_definitions (name, timeout_period, polling_interval) \
         VALUES ($1, 0, 0) ON CONFLICT (name) DO NOTHING",
    )
    .bind(EXECUTION_SEMAPHORE_NAME)
    .execute(pool)
    .await?;

    Ok(())
}
