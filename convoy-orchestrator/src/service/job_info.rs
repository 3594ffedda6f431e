//! Job Info Service
//!
//! Read-only projection over the job info repository for UI consumers.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use convoy_core::domain::{JobInfo, ResultCode};

use crate::repository::job_info;
use crate::service::job::JobError;

/// Get a job execution by id.
pub async fn job_by_id(pool: &PgPool, id: Uuid) -> Result<Option<JobInfo>, JobError> {
    Ok(job_info::find_by_id(pool, id).await?)
}

/// List executions of a job, newest first, optionally limited.
pub async fn jobs_by_name(
    pool: &PgPool,
    name: &str,
    limit: Option<i64>,
) -> Result<Vec<JobInfo>, JobError> {
    Ok(job_info::find_by_name(pool, name, limit).await?)
}

/// List executions of a job created inside a time range, optionally filtered
/// by result state.
pub async fn jobs_by_name_and_time_range(
    pool: &PgPool,
    name: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    result_code: Option<ResultCode>,
) -> Result<Vec<JobInfo>, JobError> {
    Ok(job_info::find_by_name_and_time_range(pool, name, start, end, result_code).await?)
}

/// The most recent execution of a job, regardless of state.
pub async fn most_recent_job(pool: &PgPool, name: &str) -> Result<Option<JobInfo>, JobError> {
    Ok(job_info::find_most_recent(pool, name).await?)
}

/// The most recent finished execution of a job.
pub async fn most_recent_finished_job(
    pool: &PgPool,
    name: &str,
) -> Result<Option<JobInfo>, JobError> {
    Ok(job_info::find_most_recent_finished(pool, name).await?)
}

/// The most recent execution of a job with one of the given result states.
pub async fn most_recent_job_with_result(
    pool: &PgPool,
    name: &str,
    result_states: &[ResultCode],
) -> Result<Option<JobInfo>, JobError> {
    Ok(job_info::find_most_recent_by_name_and_result_state(pool, name, result_states).await?)
}

/// The most recent execution per distinct job name.
pub async fn most_recent_jobs(pool: &PgPool) -> Result<Vec<JobInfo>, JobError> {
    Ok(job_info::find_most_recent_per_name(pool).await?)
}

/// All distinct job names known to the repository.
pub async fn job_names(pool: &PgPool) -> Result<Vec<String>, JobError> {
    Ok(job_info::distinct_job_names(pool).await?)
}
