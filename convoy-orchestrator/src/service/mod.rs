//! Service Module
//!
//! Business logic layer of the coordination core.
//! Services orchestrate between repositories and contain domain logic.

pub mod job;
pub mod job_info;
pub mod runnable;

// Re-export for convenience
pub use job as job_service;
pub use job_info as job_info_service;

pub use job::{JobError, JobService};
pub use runnable::{JobExecutionContext, JobRunnable};
