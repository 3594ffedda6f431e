//! Job domain types

pub mod job_definition;
pub mod job_info;

pub use job_definition::JobDefinition;
pub use job_info::{JobExecutionPriority, JobInfo, LogLine, ResultCode, RunningState};
