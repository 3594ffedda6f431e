//! Job runnable contract
//!
//! A runnable is the external callable bound to a job name. The service
//! invokes it on a worker task and derives the stored result from its return
//! value; everything the runnable wants the outside world to see goes through
//! its execution context.

use async_trait::async_trait;
use sqlx::PgPool;

use convoy_core::domain::{JobDefinition, ResultCode};

use crate::repository::job_info;

/// The callable bound to a job name
#[async_trait]
pub trait JobRunnable: Send + Sync {
    /// Metadata under which this runnable is registered.
    fn definition(&self) -> JobDefinition;

    /// Precondition probe, consulted under CHECK_PRECONDITIONS priority.
    async fn is_execution_necessary(&self) -> bool {
        true
    }

    /// Performs the job. An error marks the execution FAILED with the
    /// rendered error chain as result message.
    async fn execute(&self, context: JobExecutionContext) -> anyhow::Result<ResultCode>;
}

/// Handle through which a running job reports progress
///
/// All writes are best-effort telemetry updates on the job's RUNNING record.
/// Each of them refreshes the record's last modification time, which is also
/// how a long-running job stays below its max execution time: touch the
/// context at intervals shorter than the timeout.
#[derive(Clone)]
pub struct JobExecutionContext {
    pool: PgPool,
    job_name: String,
}

impl JobExecutionContext {
    pub(crate) fn new(pool: PgPool, job_name: String) -> Self {
        Self { pool, job_name }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Appends one log line to the execution's transcript.
    pub async fn add_log_line(&self, line: &str) {
        job_info::add_log_line(&self.pool, &self.job_name, line).await;
    }

    /// Replaces the execution's progress message.
    pub async fn set_status_message(&self, message: &str) {
        job_info::set_status_message(&self.pool, &self.job_name, message).await;
    }

    /// Stores one key/value pair of additional data on the execution.
    pub async fn save_additional_data(&self, key: &str, value: &str) {
        job_info::add_additional_data(&self.pool, &self.job_name, key, value).await;
    }
}
