//! Job execution records
//!
//! A `JobInfo` is one document per execution. For every job name at most one
//! record may be QUEUED and at most one RUNNING at any moment; a unique index
//! on `(name, running_state)` in the backing store enforces this across hosts.
//! Finished executions rewrite their running state to a fresh
//! `FINISHED_<uuid>` token so any number of historical records per name can
//! coexist under that same index.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix shared by all finished-state tokens.
pub const FINISHED_STATE_PREFIX: &str = "FINISHED_";

/// Running state of a job execution
///
/// `Finished` carries the full stored token, e.g. `FINISHED_<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunningState {
    Queued,
    Running,
    Finished(String),
}

impl RunningState {
    /// Mints a finished state with a freshly unique token.
    ///
    /// Every call produces a distinct token; two finishes of the same job
    /// name never collide under the `(name, running_state)` unique index.
    pub fn finished() -> Self {
        RunningState::Finished(format!("{}{}", FINISHED_STATE_PREFIX, Uuid::new_v4()))
    }

    /// A job in this state counts against the per-name execution slot.
    pub fn is_active(&self) -> bool {
        matches!(self, RunningState::Queued | RunningState::Running)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, RunningState::Finished(_))
    }
}

impl From<String> for RunningState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "QUEUED" => RunningState::Queued,
            "RUNNING" => RunningState::Running,
            _ => RunningState::Finished(value),
        }
    }
}

impl From<RunningState> for String {
    fn from(state: RunningState) -> Self {
        state.to_string()
    }
}

impl fmt::Display for RunningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningState::Queued => f.write_str("QUEUED"),
            RunningState::Running => f.write_str("RUNNING"),
            RunningState::Finished(token) => f.write_str(token),
        }
    }
}

/// Final outcome of a job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Successful,
    Failed,
    TimedOut,
    NotExecuted,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Successful => "SUCCESSFUL",
            ResultCode::Failed => "FAILED",
            ResultCode::TimedOut => "TIMED_OUT",
            ResultCode::NotExecuted => "NOT_EXECUTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SUCCESSFUL" => Some(ResultCode::Successful),
            "FAILED" => Some(ResultCode::Failed),
            "TIMED_OUT" => Some(ResultCode::TimedOut),
            "NOT_EXECUTED" => Some(ResultCode::NotExecuted),
            _ => None,
        }
    }
}

/// Priority with which an execution request is evaluated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobExecutionPriority {
    IgnorePreconditions,
    #[default]
    CheckPreconditions,
    ForceExecution,
}

impl JobExecutionPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobExecutionPriority::IgnorePreconditions => "IGNORE_PRECONDITIONS",
            JobExecutionPriority::CheckPreconditions => "CHECK_PRECONDITIONS",
            JobExecutionPriority::ForceExecution => "FORCE_EXECUTION",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IGNORE_PRECONDITIONS" => Some(JobExecutionPriority::IgnorePreconditions),
            "CHECK_PRECONDITIONS" => Some(JobExecutionPriority::CheckPreconditions),
            "FORCE_EXECUTION" => Some(JobExecutionPriority::ForceExecution),
            _ => None,
        }
    }
}

/// One timestamped log entry of a job execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

impl LogLine {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            line: line.into(),
        }
    }
}

/// Job execution record
///
/// One document per execution, persisted by the job info repository and
/// mutated only through its operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub thread: String,
    pub creation_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub last_modification_time: DateTime<Utc>,
    pub running_state: RunningState,
    pub result_state: Option<ResultCode>,
    pub result_message: Option<String>,
    pub status_message: Option<String>,
    pub execution_priority: JobExecutionPriority,
    /// Milliseconds after which a running job with a stale
    /// `last_modification_time` is considered dead.
    pub max_execution_time: i64,
    pub max_idle_time: Option<i64>,
    pub parameters: HashMap<String, String>,
    pub additional_data: HashMap<String, String>,
    pub log_lines: Vec<LogLine>,
}

impl JobInfo {
    /// Creates a fresh execution record in the given state.
    ///
    /// `start_time` is stamped immediately when the record starts out RUNNING;
    /// queued records receive it on activation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        thread: impl Into<String>,
        max_execution_time: i64,
        running_state: RunningState,
        execution_priority: JobExecutionPriority,
        parameters: HashMap<String, String>,
        additional_data: HashMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        let start_time = match running_state {
            RunningState::Running => Some(now),
            _ => None,
        };
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            host: host.into(),
            thread: thread.into(),
            creation_time: now,
            start_time,
            finish_time: None,
            last_modification_time: now,
            running_state,
            result_state: None,
            result_message: None,
            status_message: None,
            execution_priority,
            max_execution_time,
            max_idle_time: None,
            parameters,
            additional_data,
            log_lines: Vec::new(),
        }
    }

    /// A running job not touched for longer than its max execution time is
    /// dead and eligible for the timeout sweep.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.last_modification_time + Duration::milliseconds(self.max_execution_time) < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_state_parse_and_display() {
        assert_eq!(RunningState::from("QUEUED".to_string()), RunningState::Queued);
        assert_eq!(RunningState::from("RUNNING".to_string()), RunningState::Running);
        assert_eq!(RunningState::Queued.to_string(), "QUEUED");
        assert_eq!(RunningState::Running.to_string(), "RUNNING");

        let token = "FINISHED_7c9e6679-7425-40de-944b-e07fc1f90ae7".to_string();
        let state = RunningState::from(token.clone());
        assert_eq!(state, RunningState::Finished(token.clone()));
        assert_eq!(state.to_string(), token);
    }

    #[test]
    fn test_finished_tokens_are_unique() {
        let a = RunningState::finished();
        let b = RunningState::finished();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with(FINISHED_STATE_PREFIX));
        assert!(a.is_finished());
        assert!(!a.is_active());
    }

    #[test]
    fn test_active_states() {
        assert!(RunningState::Queued.is_active());
        assert!(RunningState::Running.is_active());
        assert!(!RunningState::Queued.is_finished());
    }

    #[test]
    fn test_result_code_round_trip() {
        for code in [
            ResultCode::Successful,
            ResultCode::Failed,
            ResultCode::TimedOut,
            ResultCode::NotExecuted,
        ] {
            assert_eq!(ResultCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ResultCode::parse("UNKNOWN"), None);
        assert_eq!(ResultCode::TimedOut.as_str(), "TIMED_OUT");
    }

    #[test]
    fn test_priority_round_trip() {
        for priority in [
            JobExecutionPriority::IgnorePreconditions,
            JobExecutionPriority::CheckPreconditions,
            JobExecutionPriority::ForceExecution,
        ] {
            assert_eq!(JobExecutionPriority::parse(priority.as_str()), Some(priority));
        }
        assert_eq!(
            JobExecutionPriority::default(),
            JobExecutionPriority::CheckPreconditions
        );
    }

    #[test]
    fn test_new_running_job_has_start_time() {
        let job = JobInfo::new(
            "import",
            "host-1",
            "worker-1",
            60_000,
            RunningState::Running,
            JobExecutionPriority::CheckPreconditions,
            HashMap::new(),
            HashMap::new(),
        );
        assert_eq!(job.start_time, Some(job.creation_time));
        assert!(job.result_state.is_none());

        let queued = JobInfo::new(
            "import",
            "host-1",
            "worker-1",
            60_000,
            RunningState::Queued,
            JobExecutionPriority::CheckPreconditions,
            HashMap::new(),
            HashMap::new(),
        );
        assert!(queued.start_time.is_none());
    }

    #[test]
    fn test_is_timed_out() {
        let mut job = JobInfo::new(
            "import",
            "host-1",
            "worker-1",
            60_000,
            RunningState::Running,
            JobExecutionPriority::CheckPreconditions,
            HashMap::new(),
            HashMap::new(),
        );
        let now = Utc::now();
        job.last_modification_time = now - Duration::milliseconds(120_000);
        assert!(job.is_timed_out(now));

        job.last_modification_time = now;
        assert!(!job.is_timed_out(now));
    }

    #[test]
    fn test_job_info_serde_round_trip() {
        let mut job = JobInfo::new(
            "import",
            "host-1",
            "worker-1",
            60_000,
            RunningState::Running,
            JobExecutionPriority::ForceExecution,
            HashMap::from([("source".to_string(), "feed".to_string())]),
            HashMap::from([("resultHash".to_string(), "http://worker/x".to_string())]),
        );
        job.log_lines.push(LogLine::new("starting up"));
        job.status_message = Some("50%".to_string());

        let json = serde_json::to_string(&job).unwrap();
        let parsed: JobInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, job);
    }
}
