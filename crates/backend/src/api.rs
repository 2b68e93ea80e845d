//! REST client for the render service's batch API.
//!
//! [`RenderBackend`] is the seam the dispatch workers program against;
//! [`RenderApi`] implements it over HTTP with [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;

use crate::messages::{BatchRequest, JobStatusResponse, SubmitResponse};

/// Connect timeout for every request.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Total timeout of a batch submission.
pub const SUBMIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Total timeout of a single status poll.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default path prefix under which the service mounts its batch API.
pub const DEFAULT_API_PREFIX: &str = "/deforum_api";

/// Errors from the render API layer.
#[derive(Debug, thiserror::Error)]
pub enum BackendApiError {
    /// The HTTP request itself failed (connect, timeout, decode, ...).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Render API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Operations a dispatch worker needs from its backend.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Queue a batch of jobs. Returns the service-assigned job ids.
    async fn submit_batch(&self, request: &BatchRequest) -> Result<SubmitResponse, BackendApiError>;

    /// Fetch the current status of one job.
    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, BackendApiError>;
}

/// HTTP client for a single render service instance.
pub struct RenderApi {
    client: reqwest::Client,
    api_url: String,
}

impl RenderApi {
    /// Create a client for the service at `base_url` (e.g.
    /// `http://127.0.0.1:52361`) with its API mounted under `api_prefix`.
    pub fn new(base_url: &str, api_prefix: &str) -> Result<Self, BackendApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, base_url, api_prefix))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: &str, api_prefix: &str) -> Self {
        let api_url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            api_prefix.trim_matches('/')
        );
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Root URL of the batch API.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise capture the
    /// status and body in a [`BackendApiError::ApiError`].
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BackendApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RenderBackend for RenderApi {
    async fn submit_batch(&self, request: &BatchRequest) -> Result<SubmitResponse, BackendApiError> {
        let response = self
            .client
            .post(format!("{}/batches", self.api_url))
            .timeout(SUBMIT_TIMEOUT)
            .json(request)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, BackendApiError> {
        let response = self
            .client
            .get(format!("{}/jobs/{}", self.api_url, job_id))
            .timeout(POLL_TIMEOUT)
            .send()
            .await?;

        Self::parse_response(response).await
    }
}
