//! Job Definition Repository
//!
//! Stores one row of metadata per job name. The well-known `JOBS` sentinel
//! acts as the repository-wide execution semaphore: disabling it turns off
//! execution of every job at once.

use sqlx::PgPool;
use tracing::info;

use convoy_core::domain::job_definition::EXECUTION_SEMAPHORE_NAME;
use convoy_core::domain::JobDefinition;

/// Saves a job definition, updating timeout, polling interval and remote flag
/// on conflict. The disabled flag is administrative state and survives
/// re-registration.
pub async fn save(pool: &PgPool, definition: &JobDefinition) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_definitions (name, timeout_period, polling_interval, remote, disabled)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (name) DO UPDATE
            SET timeout_period = EXCLUDED.timeout_period,
                polling_interval = EXCLUDED.polling_interval,
                remote = EXCLUDED.remote
        "#,
    )
    .bind(&definition.name)
    .bind(definition.timeout_period)
    .bind(definition.polling_interval)
    .bind(definition.remote)
    .bind(definition.disabled)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a job definition by name.
pub async fn find(pool: &PgPool, name: &str) -> Result<Option<JobDefinition>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobDefinitionRow>(
        "SELECT name, timeout_period, polling_interval, remote, disabled \
         FROM job_definitions WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Returns all job definitions.
pub async fn find_all(pool: &PgPool) -> Result<Vec<JobDefinition>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobDefinitionRow>(
        "SELECT name, timeout_period, polling_interval, remote, disabled \
         FROM job_definitions ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Enables or disables execution of the job with the given name.
///
/// # Returns
/// `true` iff a definition was updated.
pub async fn set_disabled(pool: &PgPool, name: &str, disabled: bool) -> Result<bool, sqlx::Error> {
    info!("setting job definition {} disabled={}", name, disabled);
    let result = sqlx::query("UPDATE job_definitions SET disabled = $1 WHERE name = $2")
        .bind(disabled)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Checks the execution semaphore. Execution is enabled as long as the
/// sentinel is absent or not disabled.
pub async fn is_execution_enabled(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let disabled: Option<bool> =
        sqlx::query_scalar("SELECT disabled FROM job_definitions WHERE name = $1")
            .bind(EXECUTION_SEMAPHORE_NAME)
            .fetch_optional(pool)
            .await?;

    Ok(!disabled.unwrap_or(false))
}

/// Inserts the execution semaphore sentinel if it is missing.
pub async fn ensure_execution_semaphore(pool: &PgPool) -> Result<(), sqlx::Error> {
    let semaphore = JobDefinition::execution_semaphore();
    sqlx::query(
        "INSERT INTO job_definitions (name, timeout_period, polling_interval, remote, disabled) \
         VALUES ($1, $2, $3, $4, $5) ON CONFLICT (name) DO NOTHING",
    )
    .bind(&semaphore.name)
    .bind(semaphore.timeout_period)
    .bind(semaphore.polling_interval)
    .bind(semaphore.remote)
    .bind(semaphore.disabled)
    .execute(pool)
    .await?;

    Ok(())
}

/// Removes all job definitions, then restores the execution semaphore.
pub async fn clear(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM job_definitions").execute(pool).await?;
    ensure_execution_semaphore(pool).await
}

#[derive(sqlx::FromRow)]
struct JobDefinitionRow {
    name: String,
    timeout_period: i64,
    polling_interval: i64,
    remote: bool,
    disabled: bool,
}

impl From<JobDefinitionRow> for JobDefinition {
    fn from(row: JobDefinitionRow) -> Self {
        JobDefinition {
            name: row.name,
            timeout_period: row.timeout_period,
            polling_interval: row.polling_interval,
            remote: row.remote,
            disabled: row.disabled,
        }
    }
}
