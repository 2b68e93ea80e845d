//! Per-slot dispatch worker.
//!
//! Each worker pulls one task at a time from the shared queue and drives it
//! to a terminal state against its own backend:
//!
//! 1. skip it if the expected output directory already holds a render,
//! 2. submit the merged settings, retrying transport failures forever,
//! 3. poll every returned job until `SUCCEEDED` or `FAILED`,
//! 4. copy the task's asset next to successful renders,
//!
//! then acknowledge it. A job the backend accepted but failed is a final
//! negative result and is not resubmitted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use framefarm_backend::api::{BackendApiError, RenderBackend};
use framefarm_backend::messages::{BatchRequest, JobStatus, JobStatusResponse};
use framefarm_backend::payload::SettingsTemplate;
use framefarm_core::error::DispatchError;
use framefarm_core::naming;
use framefarm_core::retry::RetryPolicy;
use framefarm_core::types::{Task, WorkerSlot};

use crate::queue::{Dequeued, TaskQueue};

/// Run-wide settings shared by every worker.
#[derive(Debug)]
pub struct WorkerContext {
    pub settings: SettingsTemplate,
    /// Root under which the backend writes `batch_{n}` directories.
    pub output_root: PathBuf,
    /// Wait between failed submission attempts.
    pub submit_retry: RetryPolicy,
    /// Wait between status polls (also applied after a failed poll).
    pub poll_interval: RetryPolicy,
}

/// How one task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A render already existed; nothing was sent to the backend.
    AlreadyRendered,
    /// The task's configuration document could not be used.
    Invalid,
    /// Submitted and every returned job reached a terminal status.
    Resolved {
        submit_attempts: usize,
        succeeded: usize,
        failed: usize,
        assets_copied: usize,
    },
}

/// Counters accumulated by one worker over its lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub submit_attempts: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub assets_copied: usize,
}

impl WorkerReport {
    pub fn record(&mut self, outcome: &TaskOutcome) {
        self.processed += 1;
        match *outcome {
            TaskOutcome::AlreadyRendered => self.skipped += 1,
            TaskOutcome::Invalid => self.invalid += 1,
            TaskOutcome::Resolved {
                submit_attempts,
                succeeded,
                failed,
                assets_copied,
            } => {
                self.submit_attempts += submit_attempts;
                self.jobs_succeeded += succeeded;
                self.jobs_failed += failed;
                self.assets_copied += assets_copied;
            }
        }
    }

    pub fn merge(&mut self, other: &WorkerReport) {
        self.processed += other.processed;
        self.skipped += other.skipped;
        self.invalid += other.invalid;
        self.submit_attempts += other.submit_attempts;
        self.jobs_succeeded += other.jobs_succeeded;
        self.jobs_failed += other.jobs_failed;
        self.assets_copied += other.assets_copied;
    }
}

/// Dispatch worker bound to one slot and its backend.
pub struct DispatchWorker<B> {
    slot: WorkerSlot,
    backend: B,
    queue: Arc<TaskQueue>,
    ctx: Arc<WorkerContext>,
}

impl<B: RenderBackend> DispatchWorker<B> {
    pub fn new(slot: WorkerSlot, backend: B, queue: Arc<TaskQueue>, ctx: Arc<WorkerContext>) -> Self {
        Self {
            slot,
            backend,
            queue,
            ctx,
        }
    }

    pub fn slot(&self) -> WorkerSlot {
        self.slot
    }

    /// Process tasks until the queue sends a close signal.
    pub async fn run(self) -> WorkerReport {
        tracing::info!(slot = self.slot.device, port = self.slot.port, "Worker started");
        let mut report = WorkerReport::default();

        loop {
            match self.queue.get().await {
                Dequeued::Closed => break,
                Dequeued::Task(task) => {
                    let outcome = self.process(&task).await;
                    report.record(&outcome);
                    self.queue.ack();
                }
            }
        }

        tracing::info!(
            slot = self.slot.device,
            processed = report.processed,
            skipped = report.skipped,
            "Worker exiting",
        );
        report
    }

    /// Drive one task to a terminal state. Never gives up on a submission.
    pub async fn process(&self, task: &Task) -> TaskOutcome {
        let n = task.number();
        let output_dir = naming::expected_output_dir(&self.ctx.output_root, n);

        if has_rendered_output(&output_dir).await {
            tracing::info!(
                task_index = task.index,
                dir = %output_dir.display(),
                "Already rendered, skipping",
            );
            return TaskOutcome::AlreadyRendered;
        }

        let request = match self.build_request(task).await {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(task_index = task.index, error = %e, "Unusable task configuration");
                return TaskOutcome::Invalid;
            }
        };

        let (job_ids, submit_attempts) = self.submit_until_accepted(task, &request).await;
        if job_ids.is_empty() {
            tracing::warn!(task_index = task.index, "Backend accepted the batch but returned no job ids");
        } else {
            tracing::info!(task_index = task.index, slot = self.slot.device, ?job_ids, "Batch submitted");
        }

        let mut succeeded = 0;
        let mut failed = 0;
        let mut assets_copied = 0;

        for job_id in &job_ids {
            let status = self.poll_until_terminal(task, job_id).await;
            if status.status == JobStatus::Succeeded {
                succeeded += 1;
                tracing::info!(task_index = task.index, job_id = %job_id, "Job succeeded");
                match status.outdir.as_deref() {
                    Some(outdir) => match copy_asset(task, Path::new(outdir)).await {
                        Ok(target) => {
                            assets_copied += 1;
                            tracing::info!(
                                task_index = task.index,
                                target = %target.display(),
                                "Asset copied next to render",
                            );
                        }
                        Err(e) => {
                            tracing::error!(task_index = task.index, error = %e, "Failed to copy asset");
                        }
                    },
                    None => {
                        tracing::warn!(
                            task_index = task.index,
                            job_id = %job_id,
                            "Job succeeded without reporting an output directory",
                        );
                    }
                }
            } else {
                failed += 1;
                let err = DispatchError::JobFailed {
                    job_id: job_id.clone(),
                    status: status.status.to_string(),
                };
                tracing::error!(
                    task_index = task.index,
                    error = %err,
                    message = status.message.as_deref().unwrap_or(""),
                    "Job did not succeed",
                );
            }
        }

        TaskOutcome::Resolved {
            submit_attempts,
            succeeded,
            failed,
            assets_copied,
        }
    }

    /// Read the task's schedule and merge it into the settings template.
    async fn build_request(&self, task: &Task) -> Result<BatchRequest, DispatchError> {
        let raw = tokio::fs::read_to_string(&task.config_path)
            .await
            .map_err(|source| DispatchError::Io {
                path: task.config_path.clone(),
                source,
            })?;
        let schedule: Value = serde_json::from_str(&raw).map_err(|e| {
            DispatchError::Configuration(format!(
                "{} is not valid JSON: {e}",
                task.config_path.display()
            ))
        })?;
        self.ctx.settings.batch_request(task.number(), &schedule)
    }

    /// Post `request` until the backend accepts it. Returns the job ids and
    /// the number of attempts made.
    async fn submit_until_accepted(&self, task: &Task, request: &BatchRequest) -> (Vec<String>, usize) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.backend.submit_batch(request).await {
                Ok(response) => return (response.job_ids, attempt),
                Err(e) => {
                    let err = submission_error(e);
                    tracing::warn!(
                        task_index = task.index,
                        slot = self.slot.device,
                        port = self.slot.port,
                        attempt,
                        error = %err,
                        "Submission failed, retrying",
                    );
                    self.ctx.submit_retry.wait().await;
                }
            }
        }
    }

    /// Poll `job_id` until it reaches a terminal status. Transport failures
    /// are retried on the poll interval.
    async fn poll_until_terminal(&self, task: &Task, job_id: &str) -> JobStatusResponse {
        loop {
            match self.backend.job_status(job_id).await {
                Ok(status) if status.status.is_terminal() => return status,
                Ok(status) => {
                    tracing::debug!(task_index = task.index, job_id, status = %status.status, "Job not finished");
                }
                Err(e) => {
                    let err = poll_error(job_id, e);
                    tracing::warn!(task_index = task.index, error = %err, "Status poll failed, retrying");
                }
            }
            self.ctx.poll_interval.wait().await;
        }
    }
}

fn submission_error(e: BackendApiError) -> DispatchError {
    DispatchError::Submission(e.to_string())
}

fn poll_error(job_id: &str, e: BackendApiError) -> DispatchError {
    DispatchError::Poll {
        job_id: job_id.to_string(),
        reason: e.to_string(),
    }
}

/// Whether `dir` already contains a finished render.
pub async fn has_rendered_output(dir: &Path) -> bool {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return false,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        // Follows symlinks, so a linked render still counts.
        let is_file = tokio::fs::metadata(entry.path())
            .await
            .is_ok_and(|meta| meta.is_file());
        if is_file && naming::is_rendered_output(&entry.file_name().to_string_lossy()) {
            return true;
        }
    }
    false
}

/// Copy the task's auxiliary asset into `outdir`. Returns the target path.
pub async fn copy_asset(task: &Task, outdir: &Path) -> Result<PathBuf, DispatchError> {
    let target = outdir.join(naming::asset_file_name(task.number()));
    tokio::fs::create_dir_all(outdir)
        .await
        .map_err(|source| DispatchError::Io {
            path: outdir.to_path_buf(),
            source,
        })?;
    tokio::fs::copy(&task.asset_path, &target)
        .await
        .map_err(|source| DispatchError::Io {
            path: task.asset_path.clone(),
            source,
        })?;
    Ok(target)
}
