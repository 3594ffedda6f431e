//! Remote worker wire types
//!
//! The worker speaks JSON with camelCase keys and SCREAMING_SNAKE_CASE state
//! tokens; the renames below pin the wire format independently of our field
//! naming.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ResultCode;

/// Payload describing a job start request to the remote worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJob {
    pub name: String,
    /// Id of the local execution record this start belongs to.
    pub client_id: Uuid,
    pub parameters: HashMap<String, String>,
}

impl RemoteJob {
    pub fn new(name: impl Into<String>, client_id: Uuid, parameters: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            client_id,
            parameters,
        }
    }
}

/// Lifecycle state reported by the worker for one remote execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RemoteExecutionState {
    Starting,
    Running,
    Finished,
}

/// Status document returned by polling a remote execution's status URL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJobStatus {
    pub status: RemoteExecutionState,
    #[serde(default)]
    pub result: Option<ResultCode>,
    #[serde(default)]
    pub message: Option<String>,
    /// Full transcript so far; pollers keep their own offset and append only
    /// the lines they have not persisted yet.
    #[serde(default)]
    pub log_lines: Vec<String>,
    /// Finish timestamp as reported by the worker, informational only.
    #[serde(default)]
    pub finish_time: Option<String>,
}

impl RemoteJobStatus {
    pub fn is_finished(&self) -> bool {
        self.status == RemoteExecutionState::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_running_status() {
        let status: RemoteJobStatus =
            serde_json::from_str(r#"{"status": "RUNNING", "logLines": ["a", "b"]}"#).unwrap();
        assert_eq!(status.status, RemoteExecutionState::Running);
        assert_eq!(status.log_lines, vec!["a".to_string(), "b".to_string()]);
        assert!(status.result.is_none());
        assert!(status.message.is_none());
        assert!(!status.is_finished());
    }

    #[test]
    fn test_parse_finished_status() {
        let status: RemoteJobStatus = serde_json::from_str(
            r#"{"status": "FINISHED", "result": "SUCCESSFUL", "finishTime": "2024-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(status.is_finished());
        assert_eq!(status.result, Some(ResultCode::Successful));
        assert_eq!(status.finish_time.as_deref(), Some("2024-03-01T10:00:00Z"));
        assert!(status.log_lines.is_empty());
    }

    #[test]
    fn test_parse_failed_status_with_message() {
        let status: RemoteJobStatus = serde_json::from_str(
            r#"{"status": "FINISHED", "result": "TIMED_OUT", "message": "killed after 60s"}"#,
        )
        .unwrap();
        assert_eq!(status.result, Some(ResultCode::TimedOut));
        assert_eq!(status.message.as_deref(), Some("killed after 60s"));
    }

    #[test]
    fn test_remote_job_serializes_camel_case() {
        let job = RemoteJob::new("import_live", Uuid::new_v4(), HashMap::new());
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("clientId").is_some());
        assert!(json.get("parameters").is_some());
    }
}
