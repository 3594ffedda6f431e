//! Job Service
//!
//! Dispatch and lifecycle orchestration. All scheduling state lives in the
//! database: accepting an execution request means creating a RUNNING or
//! QUEUED record under the unique active-state index, and every process
//! sharing the store drains the queue and sweeps timeouts independently.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use convoy_core::domain::{JobExecutionPriority, JobInfo, ResultCode, RunningState};
use convoy_core::dto::{RemoteJob, RemoteJobStatus};
use convoy_worker_client::{ArchiveProvider, WorkerClient};

use crate::repository::{job_definition, job_info};
use crate::service::runnable::{JobExecutionContext, JobRunnable};

/// Additional-data key under which the status URL of a remote execution is
/// recorded.
pub const RESULT_HASH_KEY: &str = "resultHash";
/// Additional-data key tracking how many remote log lines were persisted.
pub const LOG_LINE_OFFSET_KEY: &str = "logLineOffset";

/// Errors surfaced from execution requests
#[derive(Debug, Error)]
pub enum JobError {
    #[error("no job runnable registered under the name {0}")]
    NotRegistered(String),

    #[error("a job runnable is already registered under the name {0}")]
    AlreadyRegistered(String),

    #[error("job {0} is already running")]
    AlreadyRunning(String),

    #[error("job {0} is already queued")]
    AlreadyQueued(String),

    #[error("execution of job {0} is disabled")]
    ExecutionDisabled(String),

    #[error("execution of job {0} is not necessary")]
    ExecutionNotNecessary(String),

    #[error("remote execution of job {name} failed: {reason}")]
    RemoteExecutionFailed { name: String, reason: String },

    #[error("job persistence failed: {0}")]
    Persistence(#[from] sqlx::Error),
}

struct RemoteExecutor {
    client: WorkerClient,
    archiver: Arc<dyn ArchiveProvider>,
}

/// Orchestrates job execution across all processes sharing one database
pub struct JobService {
    pool: PgPool,
    runnables: RwLock<HashMap<String, Arc<dyn JobRunnable>>>,
    remote: Option<RemoteExecutor>,
    hours_after_which_old_jobs_are_deleted: i64,
    hours_after_which_not_executed_jobs_are_deleted: i64,
}

impl JobService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            runnables: RwLock::new(HashMap::new()),
            remote: None,
            hours_after_which_old_jobs_are_deleted: 7 * 24,
            hours_after_which_not_executed_jobs_are_deleted: 4,
        }
    }

    /// Attaches the remote executor used for definitions flagged remote.
    pub fn with_remote_executor(
        mut self,
        client: WorkerClient,
        archiver: Arc<dyn ArchiveProvider>,
    ) -> Self {
        self.remote = Some(RemoteExecutor { client, archiver });
        self
    }

    /// Overrides the retention windows of the history sweeps.
    pub fn with_retention(mut self, old_jobs_hours: i64, not_executed_jobs_hours: i64) -> Self {
        self.hours_after_which_old_jobs_are_deleted = old_jobs_hours;
        self.hours_after_which_not_executed_jobs_are_deleted = not_executed_jobs_hours;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // =============================================================================
    // Registration
    // =============================================================================

    /// Registers a runnable under its definition's name and persists the
    /// definition. A second registration under the same name is rejected.
    pub async fn register_job(&self, runnable: Arc<dyn JobRunnable>) -> Result<(), JobError> {
        let definition = runnable.definition();
        if self.registered(&definition.name).is_some() {
            return Err(JobError::AlreadyRegistered(definition.name));
        }

        job_definition::save(&self.pool, &definition).await?;

        let mut registry = self.runnables.write().expect("runnable registry poisoned");
        match registry.entry(definition.name.clone()) {
            Entry::Occupied(_) => Err(JobError::AlreadyRegistered(definition.name)),
            Entry::Vacant(slot) => {
                slot.insert(runnable);
                info!("registered job {}", definition.name);
                Ok(())
            }
        }
    }

    fn registered(&self, name: &str) -> Option<Arc<dyn JobRunnable>> {
        self.runnables
            .read()
            .expect("runnable registry poisoned")
            .get(name)
            .cloned()
    }

    // =============================================================================
    // Execution
    // =============================================================================

    /// Requests execution of the job with the given name.
    ///
    /// If the job is already running the request is enqueued instead; a
    /// second queued request fails. Under CHECK_PRECONDITIONS the runnable's
    /// precondition may turn the request down.
    ///
    /// # Returns
    /// The id of the RUNNING or QUEUED record created for this request.
    pub async fn execute_job(
        &self,
        name: &str,
        priority: JobExecutionPriority,
        parameters: HashMap<String, String>,
    ) -> Result<Uuid, JobError> {
        let runnable = self
            .registered(name)
            .ok_or_else(|| JobError::NotRegistered(name.to_string()))?;
        let definition = job_definition::find(&self.pool, name)
            .await?
            .ok_or_else(|| JobError::NotRegistered(name.to_string()))?;

        if definition.disabled || !job_definition::is_execution_enabled(&self.pool).await? {
            return Err(JobError::ExecutionDisabled(name.to_string()));
        }

        let host = job_info::current_host();
        let thread = job_info::current_thread();

        if job_info::has_job(&self.pool, name, &RunningState::Running).await? {
            return match job_info::create(
                &self.pool,
                name,
                &host,
                &thread,
                definition.timeout_period,
                RunningState::Queued,
                priority,
                parameters,
                HashMap::new(),
            )
            .await?
            {
                Some(id) => {
                    info!("job {} is running elsewhere, request queued as {}", name, id);
                    Ok(id)
                }
                None => Err(JobError::AlreadyQueued(name.to_string())),
            };
        }

        if priority == JobExecutionPriority::CheckPreconditions
            && !runnable.is_execution_necessary().await
        {
            return Err(JobError::ExecutionNotNecessary(name.to_string()));
        }

        match job_info::create(
            &self.pool,
            name,
            &host,
            &thread,
            definition.timeout_period,
            RunningState::Running,
            priority,
            parameters.clone(),
            HashMap::new(),
        )
        .await?
        {
            Some(id) => {
                if definition.remote {
                    self.start_remote(name, id, parameters).await?;
                } else {
                    self.spawn_local_execution(name.to_string(), runnable);
                }
                Ok(id)
            }
            // Lost the insert race against another process.
            None => Err(JobError::AlreadyRunning(name.to_string())),
        }
    }

    /// Runs the runnable on its own task and persists the outcome, capturing
    /// errors and panics as FAILED.
    fn spawn_local_execution(&self, name: String, runnable: Arc<dyn JobRunnable>) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let context = JobExecutionContext::new(pool.clone(), name.clone());
            let execution = tokio::spawn({
                let runnable = Arc::clone(&runnable);
                async move { runnable.execute(context).await }
            });

            let transition = match execution.await {
                Ok(Ok(result_code)) => {
                    job_info::mark_running_as_finished(&pool, &name, result_code, None).await
                }
                Ok(Err(err)) => {
                    warn!("job {} failed: {:#}", name, err);
                    job_info::mark_running_as_finished_with_error(&pool, &name, &err).await
                }
                Err(join_err) => {
                    error!("job {} execution task aborted: {}", name, join_err);
                    job_info::mark_running_as_finished(
                        &pool,
                        &name,
                        ResultCode::Failed,
                        Some(&format!("execution task aborted: {}", join_err)),
                    )
                    .await
                }
            };

            match transition {
                Ok(true) => info!("job {} finished", name),
                Ok(false) => warn!(
                    "job {} was no longer running when its execution completed",
                    name
                ),
                Err(err) => error!("could not persist completion of job {}: {}", name, err),
            }
        });
    }

    /// Starts a remote execution and records the worker's status URL on the
    /// job record. A rejected or failed start marks the record FAILED.
    async fn start_remote(
        &self,
        name: &str,
        record_id: Uuid,
        parameters: HashMap<String, String>,
    ) -> Result<(), JobError> {
        let Some(remote) = &self.remote else {
            return self
                .fail_remote_start(name, "no remote executor configured".to_string())
                .await;
        };

        let remote_job = RemoteJob::new(name, record_id, parameters);
        let archive = match remote.archiver.create_archive(&remote_job) {
            Ok(archive) => archive,
            Err(err) => return self.fail_remote_start(name, err.to_string()).await,
        };

        match remote.client.start_job(&remote_job, archive).await {
            Ok(status_url) => {
                info!("remote job {} started, status at {}", name, status_url);
                job_info::add_additional_data(&self.pool, name, RESULT_HASH_KEY, &status_url)
                    .await;
                Ok(())
            }
            Err(err) => self.fail_remote_start(name, err.to_string()).await,
        }
    }

    async fn fail_remote_start(&self, name: &str, reason: String) -> Result<(), JobError> {
        warn!("remote start of job {} failed: {}", name, reason);
        job_info::mark_running_as_finished(&self.pool, name, ResultCode::Failed, Some(&reason))
            .await?;
        Err(JobError::RemoteExecutionFailed {
            name: name.to_string(),
            reason,
        })
    }

    // =============================================================================
    // Queue draining
    // =============================================================================

    /// Activates queued jobs whose running slot is free, oldest first.
    /// Queued jobs whose precondition fails become NOT_EXECUTED; jobs
    /// registered on other hosts or currently disabled stay queued.
    pub async fn execute_queued_jobs(&self) -> Result<(), JobError> {
        if !job_definition::is_execution_enabled(&self.pool).await? {
            return Ok(());
        }

        for job in job_info::find_queued_jobs_sorted_asc_by_creation_time(&self.pool).await? {
            if let Err(err) = self.activate_and_run(&job).await {
                warn!("could not activate queued job {}: {}", job.name, err);
            }
        }
        Ok(())
    }

    async fn activate_and_run(&self, job: &JobInfo) -> Result<(), JobError> {
        let Some(runnable) = self.registered(&job.name) else {
            return Ok(());
        };
        let Some(definition) = job_definition::find(&self.pool, &job.name).await? else {
            return Ok(());
        };
        if definition.disabled {
            return Ok(());
        }
        if job_info::has_job(&self.pool, &job.name, &RunningState::Running).await? {
            return Ok(());
        }

        if job.execution_priority == JobExecutionPriority::CheckPreconditions
            && !runnable.is_execution_necessary().await
        {
            job_info::mark_queued_as_not_executed(&self.pool, &job.name).await?;
            return Ok(());
        }

        if job_info::activate_queued_job(&self.pool, &job.name).await? {
            info!("activated queued job {}", job.name);
            // The queued record still carries the origin of the enqueuing
            // process.
            job_info::update_host_thread_information(
                &self.pool,
                &job.name,
                &job_info::current_host(),
                &job_info::current_thread(),
            )
            .await;
            if definition.remote {
                self.start_remote(&job.name, job.id, job.parameters.clone()).await?;
            } else {
                self.spawn_local_execution(job.name.clone(), runnable);
            }
        }
        Ok(())
    }

    // =============================================================================
    // Remote polling
    // =============================================================================

    /// Polls every running remote job once.
    pub async fn poll_remote_jobs(&self) -> Result<(), JobError> {
        for definition in job_definition::find_all(&self.pool).await? {
            if !definition.remote {
                continue;
            }
            if let Err(err) = self.poll_remote_job(&definition.name).await {
                warn!("poll of remote job {} failed: {}", definition.name, err);
            }
        }
        Ok(())
    }

    /// Polls the running remote job with the given name, appending log lines
    /// the worker reported since the last poll and reconciling completion.
    ///
    /// Connection errors are logged and left for the next polling tick; a
    /// worker that stays unreachable past the job's max execution time is
    /// reconciled by the timeout sweep.
    pub async fn poll_remote_job(&self, name: &str) -> Result<(), JobError> {
        let Some(remote) = &self.remote else {
            return Ok(());
        };
        let Some(job) =
            job_info::find_by_name_and_running_state(&self.pool, name, &RunningState::Running)
                .await?
        else {
            return Ok(());
        };
        let Some(status_url) = job.additional_data.get(RESULT_HASH_KEY) else {
            // start still in flight, nothing to poll yet
            return Ok(());
        };

        let status = match remote.client.poll_job(status_url).await {
            Ok(status) => status,
            Err(err) => {
                warn!("polling remote job {} failed, retrying next tick: {}", name, err);
                return Ok(());
            }
        };

        let offset = job
            .additional_data
            .get(LOG_LINE_OFFSET_KEY)
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(0);
        let fresh = lines_after_offset(&status.log_lines, offset);
        if !fresh.is_empty() {
            job_info::append_log_lines(&self.pool, name, fresh).await?;
            job_info::add_additional_data(
                &self.pool,
                name,
                LOG_LINE_OFFSET_KEY,
                &status.log_lines.len().to_string(),
            )
            .await;
        }

        if status.is_finished() {
            let result_code = completion_code(&status);
            // Another poller may have reconciled this finish already; losing
            // that race is a no-op.
            if job_info::mark_running_as_finished(
                &self.pool,
                name,
                result_code,
                status.message.as_deref(),
            )
            .await?
            {
                info!("remote job {} finished with {:?}", name, result_code);
            }
        }
        Ok(())
    }

    // =============================================================================
    // Sweeps
    // =============================================================================

    /// Flags running jobs whose last modification is older than their max
    /// execution time as TIMED_OUT.
    pub async fn cleanup_timed_out_jobs(&self) -> Result<u64, JobError> {
        Ok(job_info::cleanup_timed_out_jobs(&self.pool).await?)
    }

    /// Deletes finished and queued history older than the configured
    /// retention window.
    pub async fn cleanup_old_jobs(&self) -> Result<u64, JobError> {
        Ok(job_info::cleanup_old_jobs(&self.pool, self.hours_after_which_old_jobs_are_deleted)
            .await?)
    }

    /// Deletes NOT_EXECUTED records older than the configured retention
    /// window.
    pub async fn cleanup_not_executed_jobs(&self) -> Result<u64, JobError> {
        Ok(job_info::cleanup_not_executed_jobs(
            &self.pool,
            self.hours_after_which_not_executed_jobs_are_deleted,
        )
        .await?)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Log lines the poller has not persisted yet.
fn lines_after_offset(lines: &[String], offset: usize) -> &[String] {
    if offset >= lines.len() {
        &[]
    } else {
        &lines[offset..]
    }
}

/// Maps a terminal worker status to the stored result code. A worker that
/// finishes without reporting a result did not succeed.
fn completion_code(status: &RemoteJobStatus) -> ResultCode {
    status.result.unwrap_or(ResultCode::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_core::dto::RemoteExecutionState;

    fn lines(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_lines_after_offset() {
        let all = lines(&["a", "b", "c"]);
        assert_eq!(lines_after_offset(&all, 0), &all[..]);
        assert_eq!(lines_after_offset(&all, 1), &all[1..]);
        assert_eq!(lines_after_offset(&all, 3), &[] as &[String]);
        assert_eq!(lines_after_offset(&all, 7), &[] as &[String]);
    }

    #[test]
    fn test_completion_code_maps_reported_result() {
        let status = RemoteJobStatus {
            status: RemoteExecutionState::Finished,
            result: Some(ResultCode::TimedOut),
            message: None,
            log_lines: Vec::new(),
            finish_time: None,
        };
        assert_eq!(completion_code(&status), ResultCode::TimedOut);
    }

    #[test]
    fn test_completion_code_defaults_to_failed() {
        let status = RemoteJobStatus {
            status: RemoteExecutionState::Finished,
            result: None,
            message: Some("worker crashed".to_string()),
            log_lines: Vec::new(),
            finish_time: None,
        };
        assert_eq!(completion_code(&status), ResultCode::Failed);
    }
}
