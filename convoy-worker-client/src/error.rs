//! Error types for the worker client

use thiserror::Error;

/// Result type alias for worker client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the remote job worker
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The worker answered a start request with an unexpected status
    #[error("worker rejected job start (status {status}): {message}")]
    StartRejected {
        /// HTTP status code
        status: u16,
        /// Response body from the worker
        message: String,
    },

    /// The worker API returned an error status code
    #[error("worker API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the worker
        message: String,
    },

    /// A started/seen-other response carried no Location header
    #[error("worker response carried no usable Location header")]
    MissingLocation,

    /// A URL could not be parsed or resolved
    #[error("invalid worker URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse a response body
    #[error("failed to parse worker response: {0}")]
    ParseError(String),

    /// Building the job archive failed
    #[error("failed to build job archive: {0}")]
    Archive(#[from] std::io::Error),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Create a start-rejection error from status code and message
    pub fn start_rejected(status: u16, message: impl Into<String>) -> Self {
        Self::StartRejected {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ApiError { status: 404, .. })
    }

    /// Check if this error is a server error (5xx status)
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::ApiError { status, .. } | Self::StartRejected { status, .. } if *status >= 500
        )
    }
}
