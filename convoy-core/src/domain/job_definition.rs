//! Per-name job metadata

use serde::{Deserialize, Serialize};

/// Name of the well-known definition acting as the repository-wide execution
/// semaphore. Disabling it turns off execution of every job at once.
pub const EXECUTION_SEMAPHORE_NAME: &str = "JOBS";

/// Stored metadata for one job name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    /// Milliseconds after which an untouched running execution is timed out.
    pub timeout_period: i64,
    /// Milliseconds between status polls for remote executions.
    pub polling_interval: i64,
    pub remote: bool,
    pub disabled: bool,
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, timeout_period: i64, polling_interval: i64) -> Self {
        Self {
            name: name.into(),
            timeout_period,
            polling_interval,
            remote: false,
            disabled: false,
        }
    }

    pub fn remote(mut self) -> Self {
        self.remote = true;
        self
    }

    /// The global execution semaphore, with zero timeout and interval.
    pub fn execution_semaphore() -> Self {
        Self::new(EXECUTION_SEMAPHORE_NAME, 0, 0)
    }

    pub fn is_execution_semaphore(&self) -> bool {
        self.name == EXECUTION_SEMAPHORE_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_semaphore() {
        let semaphore = JobDefinition::execution_semaphore();
        assert_eq!(semaphore.name, "JOBS");
        assert_eq!(semaphore.timeout_period, 0);
        assert_eq!(semaphore.polling_interval, 0);
        assert!(!semaphore.remote);
        assert!(!semaphore.disabled);
        assert!(semaphore.is_execution_semaphore());
    }

    #[test]
    fn test_remote_builder() {
        let definition = JobDefinition::new("import", 60_000, 5_000).remote();
        assert!(definition.remote);
        assert!(!definition.is_execution_semaphore());
    }
}
