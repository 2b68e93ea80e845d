use std::path::PathBuf;

/// Failure modes of a dispatch run.
///
/// `Configuration` and `BackendLaunch` are fatal and surface before any task
/// is processed. `Submission` and `Poll` are transient and retried by the
/// worker. `JobFailed` is terminal for one job but never aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to launch backend for slot {slot} on port {port}: {reason}")]
    BackendLaunch { slot: u32, port: u16, reason: String },

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Status poll failed for job {job_id}: {reason}")]
    Poll { job_id: String, reason: String },

    #[error("Job {job_id} finished with status {status}")]
    JobFailed { job_id: String, status: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DispatchError {
    /// Whether the worker should keep retrying after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Submission(_) | Self::Poll { .. })
    }
}
