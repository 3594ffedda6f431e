//! Convoy Worker Client
//!
//! HTTP client for the external job worker. The orchestrator starts a remote
//! execution by POSTing the job's artifact archive, then drives it to
//! completion by polling the status URL the worker hands back.
//!
//! # Example
//!
//! ```no_run
//! use convoy_core::dto::RemoteJob;
//! use convoy_worker_client::WorkerClient;
//! use std::collections::HashMap;
//! use uuid::Uuid;
//!
//! # async fn example() -> convoy_worker_client::Result<()> {
//! let client = WorkerClient::new("http://worker:5000/jobs");
//!
//! let job = RemoteJob::new("import_live", Uuid::new_v4(), HashMap::new());
//! let status_url = client.start_job(&job, vec![]).await?;
//! let status = client.poll_job(&status_url).await?;
//! println!("remote job is {:?}", status.status);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod error;

pub use archive::{ArchiveProvider, DirectoryArchiveProvider};
pub use error::{ClientError, Result};

use convoy_core::dto::{RemoteJob, RemoteJobStatus};
use reqwest::multipart::{Form, Part};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode, Url};

/// HTTP client for the remote job worker
///
/// Start requests answer `201 Created` (started) or `303 See Other` (already
/// running); both carry the status URL in the `Location` header, so the
/// underlying client is built with redirect following disabled to keep the
/// 303 observable.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    /// Base URL of the worker's job endpoint (e.g. "http://worker:5000/jobs")
    base_url: String,
    client: Client,
}

impl WorkerClient {
    /// Create a new worker client
    pub fn new(base_url: impl Into<String>) -> Self {
        // Same panic-on-TLS-failure contract as reqwest::Client::new.
        let client = Client::builder()
            .redirect(Policy::none())
            .build()
            .expect("failed to initialize HTTP client");
        Self::with_client(base_url, client)
    }

    /// Create a worker client with a custom HTTP client
    ///
    /// The supplied client must not follow redirects, otherwise the
    /// `303 See Other` answer of an already-running job is consumed before
    /// its `Location` header can be read.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the worker
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Wire operations
    // =============================================================================

    /// Start a remote job
    ///
    /// POSTs a multipart body carrying the job's artifact archive and its
    /// parameters to `<base>/<jobName>`.
    ///
    /// # Returns
    /// The status URL under which the execution can be polled and stopped.
    /// An already-running job (303) counts as started and yields its
    /// status URL as well.
    pub async fn start_job(&self, job: &RemoteJob, archive: Vec<u8>) -> Result<String> {
        let url = format!("{}/{}", self.base_url, job.name);

        let parameters = serde_json::to_string(&job.parameters)
            .map_err(|e| ClientError::ParseError(e.to_string()))?;
        let form = Form::new()
            .part(
                "archive",
                Part::bytes(archive)
                    .file_name(format!("{}.tar.gz", job.name))
                    .mime_str("application/x-gzip")
                    .map_err(ClientError::RequestFailed)?,
            )
            .text("parameters", parameters)
            .text("client_id", job.client_id.to_string());

        let response = self.client.post(&url).multipart(form).send().await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::SEE_OTHER => self.status_url(&url, &response),
            status => {
                let message = response.text().await.unwrap_or_default();
                Err(ClientError::start_rejected(status.as_u16(), message))
            }
        }
    }

    /// Poll the status of a remote job
    pub async fn poll_job(&self, status_url: &str) -> Result<RemoteJobStatus> {
        let response = self.client.get(status_url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::api_error(status.as_u16(), message));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("status document: {}", e)))
    }

    /// Stop a remote job
    ///
    /// Idempotent: a 404 means the execution is already gone and counts as
    /// stopped.
    pub async fn stop_job(&self, status_url: &str) -> Result<()> {
        let response = self.client.delete(status_url).send().await?;
        let status = response.status();

        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(ClientError::api_error(status.as_u16(), message))
    }

    /// Extract the status URL from a start response's Location header,
    /// resolving relative values against the request URL.
    fn status_url(&self, request_url: &str, response: &reqwest::Response) -> Result<String> {
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ClientError::MissingLocation)?;

        let base = Url::parse(request_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        let resolved = base
            .join(location)
            .map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        Ok(resolved.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = WorkerClient::new("http://worker:5000/jobs");
        assert_eq!(client.base_url(), "http://worker:5000/jobs");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = WorkerClient::new("http://worker:5000/jobs/");
        assert_eq!(client.base_url(), "http://worker:5000/jobs");
    }

    #[test]
    fn test_location_resolution() {
        let base = Url::parse("http://worker:5000/jobs/import").unwrap();
        assert_eq!(
            base.join("/jobs/import/42").unwrap().to_string(),
            "http://worker:5000/jobs/import/42"
        );
        assert_eq!(
            base.join("http://other:8000/jobs/import/42").unwrap().to_string(),
            "http://other:8000/jobs/import/42"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(ClientError::api_error(404, "gone").is_not_found());
        assert!(!ClientError::api_error(500, "boom").is_not_found());
        assert!(ClientError::api_error(500, "boom").is_server_error());
        assert!(ClientError::start_rejected(503, "busy").is_server_error());
        assert!(!ClientError::start_rejected(409, "conflict").is_server_error());
    }
}
