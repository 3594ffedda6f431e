//! Wire types for communication with remote job workers

pub mod remote;

pub use remote::{RemoteExecutionState, RemoteJob, RemoteJobStatus};
