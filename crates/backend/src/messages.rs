//! Request and response bodies of the render service's batch API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /batches`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest {
    /// One merged settings document per job.
    pub job_configs: Vec<Value>,
    /// Service-wide option overrides applied for the duration of the batch.
    pub option_overrides: Value,
}

/// Response of `POST /batches`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub job_ids: Vec<String>,
}

/// Lifecycle state of one submitted job.
///
/// Unknown strings map to [`JobStatus::Pending`] so that polling continues
/// when the service reports an intermediate state we do not model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

impl JobStatus {
    /// Whether polling can stop.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of `GET /jobs/{job_id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatusResponse {
    pub status: JobStatus,
    /// Directory the service rendered into. Present once the job succeeded.
    #[serde(default)]
    pub outdir: Option<String>,
    /// Error detail reported by the service, if any.
    #[serde(default)]
    pub message: Option<String>,
}
