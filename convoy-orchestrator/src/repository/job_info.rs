//! Job Info Repository
//!
//! Persists one record per job execution. For each distinct job name only one
//! record can be queued and only one running; the unique `(name,
//! running_state)` index enforces this across every process sharing the
//! database, and `cleanup_timed_out_jobs` must run regularly so dead jobs
//! cannot block that slot forever.
//!
//! There are two write classes. State transitions and inserts are ordinary
//! acknowledged writes. Telemetry updates (log lines, status message,
//! additional data, host/thread refresh) run with `synchronous_commit` off
//! and swallow errors, so runnables never block on durability for progress
//! reporting.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use convoy_core::domain::{JobExecutionPriority, JobInfo, LogLine, ResultCode, RunningState};

/// Meta-job under which the old-history sweep runs
pub const JOB_HISTORY_CLEANUP_JOB: &str = "job_history_cleanup";
/// Meta-job under which the timeout sweep runs
pub const TIMED_OUT_JOB_CLEANUP_JOB: &str = "timed_out_job_cleanup";
/// Meta-job under which the not-executed sweep runs
pub const NOT_EXECUTED_JOB_CLEANUP_JOB: &str = "not_executed_job_cleanup";

/// Max execution time granted to a sweep meta-job.
const SWEEP_MAX_EXECUTION_TIME_MS: i64 = 5 * 60 * 1000;

const JOB_INFO_COLUMNS: &str = "id, name, host, thread, creation_time, start_time, finish_time, \
     last_modification_time, running_state, result_state, result_message, status_message, \
     execution_priority, max_execution_time, max_idle_time, parameters, additional_data, log_lines";

// =============================================================================
// Create
// =============================================================================

/// Creates a new job execution record.
///
/// # Returns
/// The id of the record, or `None` if a record with the same name and active
/// state already exists somewhere in the cluster.
#[allow(clippy::too_many_arguments)]
pub async fn create(
    pool: &PgPool,
    name: &str,
    host: &str,
    thread: &str,
    max_execution_time: i64,
    running_state: RunningState,
    execution_priority: JobExecutionPriority,
    parameters: HashMap<String, String>,
    additional_data: HashMap<String, String>,
) -> Result<Option<Uuid>, sqlx::Error> {
    info!("creating job {} in state {}", name, running_state);
    let job = JobInfo::new(
        name,
        host,
        thread,
        max_execution_time,
        running_state,
        execution_priority,
        parameters,
        additional_data,
    );

    match insert(pool, &job).await {
        Ok(()) => Ok(Some(job.id)),
        Err(err) if is_unique_violation(&err) => {
            warn!(
                "job {} already has an active record in state {}, creation skipped",
                name, job.running_state
            );
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

async fn insert(pool: &PgPool, job: &JobInfo) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_infos (id, name, host, thread, creation_time, start_time, finish_time,
            last_modification_time, running_state, result_state, result_message, status_message,
            execution_priority, max_execution_time, max_idle_time, parameters, additional_data,
            log_lines)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(job.id)
    .bind(&job.name)
    .bind(&job.host)
    .bind(&job.thread)
    .bind(job.creation_time)
    .bind(job.start_time)
    .bind(job.finish_time)
    .bind(job.last_modification_time)
    .bind(job.running_state.to_string())
    .bind(job.result_state.map(|code| code.as_str()))
    .bind(&job.result_message)
    .bind(&job.status_message)
    .bind(job.execution_priority.as_str())
    .bind(job.max_execution_time)
    .bind(job.max_idle_time)
    .bind(Json(&job.parameters))
    .bind(Json(&job.additional_data))
    .bind(Json(&job.log_lines))
    .execute(pool)
    .await?;

    Ok(())
}

// =============================================================================
// Queries
// =============================================================================

/// Returns the job with the given name and active state, if any.
pub async fn find_by_name_and_running_state(
    pool: &PgPool,
    name: &str,
    running_state: &RunningState,
) -> Result<Option<JobInfo>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobInfoRow>(&format!(
        "SELECT {JOB_INFO_COLUMNS} FROM job_infos WHERE name = $1 AND running_state = $2"
    ))
    .bind(name)
    .bind(running_state.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Checks whether a job with the given name and state exists.
pub async fn has_job(
    pool: &PgPool,
    name: &str,
    running_state: &RunningState,
) -> Result<bool, sqlx::Error> {
    Ok(find_by_name_and_running_state(pool, name, running_state)
        .await?
        .is_some())
}

/// Find a job by its id.
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<JobInfo>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobInfoRow>(&format!(
        "SELECT {JOB_INFO_COLUMNS} FROM job_infos WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Returns jobs with the given name sorted descending by creation time,
/// optionally limited.
pub async fn find_by_name(
    pool: &PgPool,
    name: &str,
    limit: Option<i64>,
) -> Result<Vec<JobInfo>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobInfoRow>(&format!(
        "SELECT {JOB_INFO_COLUMNS} FROM job_infos WHERE name = $1 \
         ORDER BY creation_time DESC LIMIT $2"
    ))
    .bind(name)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Returns jobs with the given name created inside the supplied time range,
/// optionally restricted to one result state, sorted descending by creation
/// time. Open bounds are skipped.
pub async fn find_by_name_and_time_range(
    pool: &PgPool,
    name: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    result_code: Option<ResultCode>,
) -> Result<Vec<JobInfo>, sqlx::Error> {
    let mut query = QueryBuilder::<Postgres>::new(format!(
        "SELECT {JOB_INFO_COLUMNS} FROM job_infos WHERE name = "
    ));
    query.push_bind(name);
    if let Some(start) = start {
        query.push(" AND creation_time >= ").push_bind(start);
    }
    if let Some(end) = end {
        query.push(" AND creation_time <= ").push_bind(end);
    }
    if let Some(result_code) = result_code {
        query.push(" AND result_state = ").push_bind(result_code.as_str());
    }
    query.push(" ORDER BY creation_time DESC");

    let rows = query.build_query_as::<JobInfoRow>().fetch_all(pool).await?;
    Ok(rows.into_iter().map(Into::into).collect())
}

/// Returns the most recently created job with the given name regardless of
/// its state.
pub async fn find_most_recent(pool: &PgPool, name: &str) -> Result<Option<JobInfo>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobInfoRow>(&format!(
        "SELECT {JOB_INFO_COLUMNS} FROM job_infos WHERE name = $1 \
         ORDER BY creation_time DESC LIMIT 1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Returns the most recently created finished job with the given name.
///
/// Finished records carry suffixed `FINISHED_<uuid>` tokens, so the filter
/// excludes the active states instead of comparing against a literal.
pub async fn find_most_recent_finished(
    pool: &PgPool,
    name: &str,
) -> Result<Option<JobInfo>, sqlx::Error> {
    let row = sqlx::query_as::<_, JobInfoRow>(&format!(
        "SELECT {JOB_INFO_COLUMNS} FROM job_infos \
         WHERE name = $1 AND running_state NOT IN ($2, $3) \
         ORDER BY creation_time DESC LIMIT 1"
    ))
    .bind(name)
    .bind(RunningState::Running.to_string())
    .bind(RunningState::Queued.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Returns the most recently created job with the given name whose result
/// state is one of the supplied codes.
pub async fn find_most_recent_by_name_and_result_state(
    pool: &PgPool,
    name: &str,
    result_states: &[ResultCode],
) -> Result<Option<JobInfo>, sqlx::Error> {
    let states: Vec<&str> = result_states.iter().map(ResultCode::as_str).collect();
    let row = sqlx::query_as::<_, JobInfoRow>(&format!(
        "SELECT {JOB_INFO_COLUMNS} FROM job_infos \
         WHERE name = $1 AND result_state = ANY($2) \
         ORDER BY creation_time DESC LIMIT 1"
    ))
    .bind(name)
    .bind(states)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Returns all queued jobs sorted ascending by creation time, the order in
/// which the queue drain activates them.
pub async fn find_queued_jobs_sorted_asc_by_creation_time(
    pool: &PgPool,
) -> Result<Vec<JobInfo>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobInfoRow>(&format!(
        "SELECT {JOB_INFO_COLUMNS} FROM job_infos WHERE running_state = $1 \
         ORDER BY creation_time ASC"
    ))
    .bind(RunningState::Queued.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Returns, for every distinct job name, the most recently created record.
pub async fn find_most_recent_per_name(pool: &PgPool) -> Result<Vec<JobInfo>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobInfoRow>(&format!(
        "SELECT DISTINCT ON (name) {JOB_INFO_COLUMNS} FROM job_infos \
         ORDER BY name, creation_time DESC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Returns all distinct job names present in the repository.
pub async fn distinct_job_names(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT DISTINCT name FROM job_infos ORDER BY name")
        .fetch_all(pool)
        .await
}

async fn find_running_jobs(pool: &PgPool) -> Result<Vec<JobInfo>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobInfoRow>(&format!(
        "SELECT {JOB_INFO_COLUMNS} FROM job_infos WHERE running_state = $1"
    ))
    .bind(RunningState::Running.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

// =============================================================================
// State transitions
// =============================================================================

/// Promotes the queued job with the given name to running, stamping its start
/// time.
///
/// # Returns
/// `true` iff exactly one record was updated. Losing the activation race to
/// another process (its RUNNING record makes the update violate the unique
/// index) yields `false`.
pub async fn activate_queued_job(pool: &PgPool, name: &str) -> Result<bool, sqlx::Error> {
    info!("activating queued job {}", name);
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE job_infos SET running_state = $1, start_time = $2, last_modification_time = $2 \
         WHERE name = $3 AND running_state = $4",
    )
    .bind(RunningState::Running.to_string())
    .bind(now)
    .bind(name)
    .bind(RunningState::Queued.to_string())
    .execute(pool)
    .await;

    match result {
        Ok(done) => Ok(done.rows_affected() == 1),
        Err(err) if is_unique_violation(&err) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Marks the running job with the given name as finished.
///
/// The running state is rewritten to a fresh `FINISHED_<uuid>` token so the
/// record drops out of the active slot while staying under the unique index.
/// An absent message leaves any previous result message untouched.
///
/// # Returns
/// `true` iff a running record was found and transitioned.
pub async fn mark_running_as_finished(
    pool: &PgPool,
    name: &str,
    result_code: ResultCode,
    result_message: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE job_infos SET running_state = $1, result_state = $2, \
             result_message = COALESCE($3, result_message), finish_time = $4, \
             last_modification_time = $4 \
         WHERE name = $5 AND running_state = $6",
    )
    .bind(RunningState::finished().to_string())
    .bind(result_code.as_str())
    .bind(result_message)
    .bind(now)
    .bind(name)
    .bind(RunningState::Running.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Marks the running job with the given id as finished; the result message is
/// rendered from the error's chain when one is supplied.
pub async fn mark_as_finished_by_id(
    pool: &PgPool,
    id: Uuid,
    result_code: ResultCode,
    error: Option<&anyhow::Error>,
) -> Result<bool, sqlx::Error> {
    let message = error.map(failure_message);
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE job_infos SET running_state = $1, result_state = $2, \
             result_message = COALESCE($3, result_message), finish_time = $4, \
             last_modification_time = $4 \
         WHERE id = $5 AND running_state = $6",
    )
    .bind(RunningState::finished().to_string())
    .bind(result_code.as_str())
    .bind(message)
    .bind(now)
    .bind(id)
    .bind(RunningState::Running.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Marks the running job with the given name as FAILED, storing the rendered
/// error chain as result message.
pub async fn mark_running_as_finished_with_error(
    pool: &PgPool,
    name: &str,
    error: &anyhow::Error,
) -> Result<bool, sqlx::Error> {
    mark_running_as_finished(pool, name, ResultCode::Failed, Some(&failure_message(error))).await
}

/// Marks the running job with the given name as SUCCESSFUL.
pub async fn mark_running_as_finished_successfully(
    pool: &PgPool,
    name: &str,
) -> Result<bool, sqlx::Error> {
    mark_running_as_finished(pool, name, ResultCode::Successful, None).await
}

/// Marks the queued job with the given name as finished with NOT_EXECUTED.
pub async fn mark_queued_as_not_executed(pool: &PgPool, name: &str) -> Result<bool, sqlx::Error> {
    let now = Utc::now();
    let result = sqlx::query(
        "UPDATE job_infos SET running_state = $1, result_state = $2, finish_time = $3, \
             last_modification_time = $3 \
         WHERE name = $4 AND running_state = $5",
    )
    .bind(RunningState::finished().to_string())
    .bind(ResultCode::NotExecuted.as_str())
    .bind(now)
    .bind(name)
    .bind(RunningState::Queued.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Flags the running job with the given name as TIMED_OUT if its last
/// modification is older than its max execution time. A no-op when no running
/// record exists.
pub async fn remove_job_if_timed_out(
    pool: &PgPool,
    name: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    if let Some(job) = find_by_name_and_running_state(pool, name, &RunningState::Running).await? {
        if job.is_timed_out(now) {
            mark_running_as_finished(pool, &job.name, ResultCode::TimedOut, None).await?;
        }
    }
    Ok(())
}

// =============================================================================
// Best-effort telemetry updates
// =============================================================================

/// Updates host and thread information on the running job with the given
/// name. Best-effort: failures are logged, not surfaced.
pub async fn update_host_thread_information(pool: &PgPool, name: &str, host: &str, thread: &str) {
    let outcome = async {
        let mut tx = relaxed_transaction(pool).await?;
        sqlx::query(
            "UPDATE job_infos SET host = $1, thread = $2 WHERE name = $3 AND running_state = $4",
        )
        .bind(host)
        .bind(thread)
        .bind(name)
        .bind(RunningState::Running.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }
    .await;

    if let Err(err) = outcome {
        warn!("could not update host/thread of job {}: {}", name, err);
    }
}

/// Sets one additional-data entry on the running job with the given name,
/// overwriting an existing value for the key and refreshing the last
/// modification time. Best-effort.
pub async fn add_additional_data(pool: &PgPool, name: &str, key: &str, value: &str) {
    let outcome = async {
        let mut tx = relaxed_transaction(pool).await?;
        sqlx::query(
            "UPDATE job_infos SET additional_data = jsonb_set(additional_data, $1, to_jsonb($2::text), true), \
                 last_modification_time = $3 \
             WHERE name = $4 AND running_state = $5",
        )
        .bind(vec![key.to_string()])
        .bind(value)
        .bind(Utc::now())
        .bind(name)
        .bind(RunningState::Running.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }
    .await;

    if let Err(err) = outcome {
        warn!("could not store additional data {} for job {}: {}", key, name, err);
    }
}

/// Sets the status message of the running job with the given name, refreshing
/// the last modification time. Best-effort.
pub async fn set_status_message(pool: &PgPool, name: &str, message: &str) {
    let outcome = async {
        let mut tx = relaxed_transaction(pool).await?;
        sqlx::query(
            "UPDATE job_infos SET status_message = $1, last_modification_time = $2 \
             WHERE name = $3 AND running_state = $4",
        )
        .bind(message)
        .bind(Utc::now())
        .bind(name)
        .bind(RunningState::Running.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }
    .await;

    if let Err(err) = outcome {
        warn!("could not set status message of job {}: {}", name, err);
    }
}

/// Appends one log line to the running job with the given name, refreshing
/// the last modification time. Best-effort.
pub async fn add_log_line(pool: &PgPool, name: &str, line: &str) {
    let now = Utc::now();
    let entry = vec![LogLine {
        timestamp: now,
        line: line.to_string(),
    }];

    let outcome = async {
        let mut tx = relaxed_transaction(pool).await?;
        sqlx::query(
            "UPDATE job_infos SET log_lines = log_lines || $1, last_modification_time = $2 \
             WHERE name = $3 AND running_state = $4",
        )
        .bind(Json(entry))
        .bind(now)
        .bind(name)
        .bind(RunningState::Running.to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await
    }
    .await;

    if let Err(err) = outcome {
        warn!("could not append log line to job {}: {}", name, err);
    }
}

/// Appends log lines to the running job with the given name in one atomic,
/// durable write.
///
/// # Returns
/// `true` iff a running record was found.
pub async fn append_log_lines(
    pool: &PgPool,
    name: &str,
    lines: &[String],
) -> Result<bool, sqlx::Error> {
    let now = Utc::now();
    let entries: Vec<LogLine> = lines
        .iter()
        .map(|line| LogLine {
            timestamp: now,
            line: line.clone(),
        })
        .collect();

    let result = sqlx::query(
        "UPDATE job_infos SET log_lines = log_lines || $1, last_modification_time = $2 \
         WHERE name = $3 AND running_state = $4",
    )
    .bind(Json(entries))
    .bind(now)
    .bind(name)
    .bind(RunningState::Running.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

// =============================================================================
// Admin and retention
// =============================================================================

/// Clears all job execution records. With `drop_table`, the table is dropped
/// and recreated including its indexes.
pub async fn clear(pool: &PgPool, drop_table: bool) -> Result<(), sqlx::Error> {
    info!("clearing all job infos (drop_table={})", drop_table);
    if drop_table {
        sqlx::query("DROP TABLE IF EXISTS job_infos").execute(pool).await?;
        crate::db::migrate_job_infos(pool).await?;
    } else {
        sqlx::query("DELETE FROM job_infos").execute(pool).await?;
    }
    Ok(())
}

/// Removes the record with the given id.
pub async fn remove(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM job_infos WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Counts all job execution records.
pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM job_infos")
        .fetch_one(pool)
        .await
}

/// Flags every running job whose last modification is older than its max
/// execution time as TIMED_OUT.
///
/// The sweep publishes itself as a meta-job, so across the whole cluster only
/// one process performs it at a time.
///
/// # Returns
/// The number of jobs flagged.
pub async fn cleanup_timed_out_jobs(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let now = Utc::now();
    remove_job_if_timed_out(pool, TIMED_OUT_JOB_CLEANUP_JOB, now).await?;
    if has_job(pool, TIMED_OUT_JOB_CLEANUP_JOB, &RunningState::Running).await? {
        return Ok(0);
    }
    if !claim_sweep(pool, TIMED_OUT_JOB_CLEANUP_JOB).await? {
        return Ok(0);
    }

    let mut removed_jobs = Vec::new();
    for job in find_running_jobs(pool).await? {
        if job.is_timed_out(now)
            && mark_running_as_finished(pool, &job.name, ResultCode::TimedOut, None).await?
        {
            removed_jobs.push(format!("{} - {}", job.name, job.id));
        }
    }

    let removed = removed_jobs.len() as u64;
    add_additional_data(
        pool,
        TIMED_OUT_JOB_CLEANUP_JOB,
        "numberOfRemovedJobs",
        &removed.to_string(),
    )
    .await;
    if !removed_jobs.is_empty() {
        add_additional_data(
            pool,
            TIMED_OUT_JOB_CLEANUP_JOB,
            "removedJobs",
            &removed_jobs.join(", "),
        )
        .await;
    }
    mark_running_as_finished_successfully(pool, TIMED_OUT_JOB_CLEANUP_JOB).await?;
    Ok(removed)
}

/// Deletes every non-running record created before the cutoff.
///
/// # Returns
/// The number of records deleted.
pub async fn cleanup_old_jobs(
    pool: &PgPool,
    hours_after_which_old_jobs_are_deleted: i64,
) -> Result<u64, sqlx::Error> {
    let now = Utc::now();
    remove_job_if_timed_out(pool, JOB_HISTORY_CLEANUP_JOB, now).await?;
    if has_job(pool, JOB_HISTORY_CLEANUP_JOB, &RunningState::Running).await? {
        return Ok(0);
    }
    if !claim_sweep(pool, JOB_HISTORY_CLEANUP_JOB).await? {
        return Ok(0);
    }

    let cutoff = now - chrono::Duration::hours(hours_after_which_old_jobs_are_deleted);
    info!("deleting non-running jobs created before {}", cutoff);
    let result = sqlx::query(
        "DELETE FROM job_infos WHERE creation_time < $1 AND running_state <> $2",
    )
    .bind(cutoff)
    .bind(RunningState::Running.to_string())
    .execute(pool)
    .await?;
    let removed = result.rows_affected();

    add_additional_data(
        pool,
        JOB_HISTORY_CLEANUP_JOB,
        "numberOfRemovedJobs",
        &removed.to_string(),
    )
    .await;
    mark_running_as_finished_successfully(pool, JOB_HISTORY_CLEANUP_JOB).await?;
    Ok(removed)
}

/// Deletes every NOT_EXECUTED record created before the cutoff.
///
/// # Returns
/// The number of records deleted.
pub async fn cleanup_not_executed_jobs(
    pool: &PgPool,
    hours_after_which_not_executed_jobs_are_deleted: i64,
) -> Result<u64, sqlx::Error> {
    let now = Utc::now();
    remove_job_if_timed_out(pool, NOT_EXECUTED_JOB_CLEANUP_JOB, now).await?;
    if has_job(pool, NOT_EXECUTED_JOB_CLEANUP_JOB, &RunningState::Running).await? {
        return Ok(0);
    }
    if !claim_sweep(pool, NOT_EXECUTED_JOB_CLEANUP_JOB).await? {
        return Ok(0);
    }

    let cutoff = now - chrono::Duration::hours(hours_after_which_not_executed_jobs_are_deleted);
    info!("deleting not-executed jobs created before {}", cutoff);
    let result = sqlx::query(
        r"DELETE FROM job_infos WHERE creation_time < $1 AND result_state = $2 AND running_state LIKE 'FINISHED\_%'",
    )
    .bind(cutoff)
    .bind(ResultCode::NotExecuted.as_str())
    .execute(pool)
    .await?;
    let removed = result.rows_affected();

    add_additional_data(
        pool,
        NOT_EXECUTED_JOB_CLEANUP_JOB,
        "numberOfRemovedJobs",
        &removed.to_string(),
    )
    .await;
    mark_running_as_finished_successfully(pool, NOT_EXECUTED_JOB_CLEANUP_JOB).await?;
    Ok(removed)
}

/// Registers a sweep meta-job as running. Returns `false` when another
/// process holds the sweep's running slot.
async fn claim_sweep(pool: &PgPool, sweep_name: &str) -> Result<bool, sqlx::Error> {
    let claimed = create(
        pool,
        sweep_name,
        &current_host(),
        &current_thread(),
        SWEEP_MAX_EXECUTION_TIME_MS,
        RunningState::Running,
        JobExecutionPriority::CheckPreconditions,
        HashMap::new(),
        HashMap::new(),
    )
    .await?;
    Ok(claimed.is_some())
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Canonical hostname of this machine, `"N/A"` when it cannot be determined.
pub fn current_host() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "N/A".to_string())
}

/// Name of the current thread, falling back to its id for unnamed workers.
pub fn current_thread() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

/// Renders an error chain into the stored result message.
pub fn failure_message(error: &anyhow::Error) -> String {
    format!("Problem: {}, Stack-Trace: {:?}", error, error)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
    )
}

/// Starts a transaction for telemetry-class writes: acknowledged but not
/// flushed, so progress reporting never waits on the WAL.
async fn relaxed_transaction(pool: &PgPool) -> Result<Transaction<'_, Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET LOCAL synchronous_commit = off")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobInfoRow {
    id: Uuid,
    name: String,
    host: String,
    thread: String,
    creation_time: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    finish_time: Option<DateTime<Utc>>,
    last_modification_time: DateTime<Utc>,
    running_state: String,
    result_state: Option<String>,
    result_message: Option<String>,
    status_message: Option<String>,
    execution_priority: String,
    max_execution_time: i64,
    max_idle_time: Option<i64>,
    parameters: Json<HashMap<String, String>>,
    additional_data: Json<HashMap<String, String>>,
    log_lines: Json<Vec<LogLine>>,
}

impl From<JobInfoRow> for JobInfo {
    fn from(row: JobInfoRow) -> Self {
        JobInfo {
            id: row.id,
            name: row.name,
            host: row.host,
            thread: row.thread,
            creation_time: row.creation_time,
            start_time: row.start_time,
            finish_time: row.finish_time,
            last_modification_time: row.last_modification_time,
            running_state: RunningState::from(row.running_state),
            result_state: row.result_state.as_deref().and_then(ResultCode::parse),
            result_message: row.result_message,
            status_message: row.status_message,
            execution_priority: JobExecutionPriority::parse(&row.execution_priority)
                .unwrap_or_default(),
            max_execution_time: row.max_execution_time,
            max_idle_time: row.max_idle_time,
            parameters: row.parameters.0,
            additional_data: row.additional_data.0,
            log_lines: row.log_lines.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_carries_chain() {
        let error = anyhow::anyhow!("connection refused").context("starting import feed");
        let message = failure_message(&error);
        assert!(message.starts_with("Problem: starting import feed"));
        assert!(message.contains("Stack-Trace:"));
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn test_current_host_is_never_empty() {
        assert!(!current_host().is_empty());
    }

    #[test]
    fn test_current_thread_names_test_thread() {
        // Rust test threads carry the test name.
        assert!(current_thread().contains("current_thread_names_test_thread"));
    }

    #[test]
    fn test_sweep_meta_job_names_are_distinct() {
        let names = [
            JOB_HISTORY_CLEANUP_JOB,
            TIMED_OUT_JOB_CLEANUP_JOB,
            NOT_EXECUTED_JOB_CLEANUP_JOB,
        ];
        for (i, a) in names.iter().enumerate() {
            for b in names.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
