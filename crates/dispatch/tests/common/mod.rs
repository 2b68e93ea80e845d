//! Shared fixtures for dispatch integration tests: a scripted in-memory
//! render backend and an on-disk dataset builder.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use framefarm_backend::api::{BackendApiError, RenderBackend};
use framefarm_backend::messages::{BatchRequest, JobStatus, JobStatusResponse, SubmitResponse};
use framefarm_backend::payload::SettingsTemplate;
use framefarm_core::naming;
use framefarm_core::retry::RetryPolicy;
use framefarm_core::shard::{self, NodeConfig};
use framefarm_core::types::Task;
use framefarm_dispatch::worker::WorkerContext;

/// How the fake backend behaves.
#[derive(Debug, Clone)]
pub struct Script {
    /// Submissions rejected before the first one is accepted.
    pub failing_submits: usize,
    /// Status polls answered with an error before real answers start.
    pub failing_polls: usize,
    /// `RUNNING` answers per job before the terminal status.
    pub running_polls: usize,
    pub terminal: JobStatus,
    /// Report an output directory on success.
    pub report_outdir: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            failing_submits: 0,
            failing_polls: 0,
            running_polls: 1,
            terminal: JobStatus::Succeeded,
            report_outdir: true,
        }
    }
}

/// In-memory render backend. Job ids equal the submitted batch name and
/// successful jobs report `{render_root}/{batch_name}` as output directory.
#[derive(Clone)]
pub struct FakeBackend {
    script: Script,
    render_root: PathBuf,
    pub submit_attempts: Arc<AtomicUsize>,
    pub accepted: Arc<Mutex<Vec<Value>>>,
    failed_polls: Arc<AtomicUsize>,
    polls: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeBackend {
    pub fn new(script: Script, render_root: &Path) -> Self {
        Self {
            script,
            render_root: render_root.to_path_buf(),
            submit_attempts: Arc::default(),
            accepted: Arc::default(),
            failed_polls: Arc::default(),
            polls: Arc::default(),
        }
    }

    /// Batch names of every accepted submission, in order.
    pub fn accepted_batches(&self) -> Vec<String> {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .map(|body| body["job_configs"][0]["batch_name"].as_str().unwrap().to_string())
            .collect()
    }

    pub fn attempts(&self) -> usize {
        self.submit_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderBackend for FakeBackend {
    async fn submit_batch(&self, request: &BatchRequest) -> Result<SubmitResponse, BackendApiError> {
        let attempt = self.submit_attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.script.failing_submits {
            return Err(BackendApiError::ApiError {
                status: 503,
                body: "backend starting".to_string(),
            });
        }
        let body = serde_json::to_value(request).unwrap();
        let batch = body["job_configs"][0]["batch_name"].as_str().unwrap().to_string();
        self.accepted.lock().unwrap().push(body);
        Ok(SubmitResponse {
            job_ids: vec![batch],
        })
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, BackendApiError> {
        if self.failed_polls.fetch_add(1, Ordering::SeqCst) < self.script.failing_polls {
            return Err(BackendApiError::ApiError {
                status: 500,
                body: "status unavailable".to_string(),
            });
        }

        let seen = {
            let mut polls = self.polls.lock().unwrap();
            let count = polls.entry(job_id.to_string()).or_default();
            *count += 1;
            *count
        };

        if seen <= self.script.running_polls {
            return Ok(JobStatusResponse {
                status: JobStatus::Running,
                outdir: None,
                message: None,
            });
        }

        let outdir = (self.script.terminal == JobStatus::Succeeded && self.script.report_outdir)
            .then(|| self.render_root.join(job_id).to_string_lossy().into_owned());
        Ok(JobStatusResponse {
            status: self.script.terminal,
            outdir,
            message: None,
        })
    }
}

/// Write `count` tasks (schedule + asset) under `root` using the dataset
/// naming convention and return them in index order.
pub fn build_dataset(root: &Path, count: usize) -> Vec<Task> {
    let tasks = shard::plan(count, NodeConfig::single(), root).unwrap();
    for task in &tasks {
        std::fs::create_dir_all(naming::task_dir(root, task.number())).unwrap();
        std::fs::write(
            &task.config_path,
            json!({ "keyframes": [{ "frame": 0, "strength": 0.85 }] }).to_string(),
        )
        .unwrap();
        std::fs::write(&task.asset_path, format!("asset {}", task.number())).unwrap();
    }
    tasks
}

/// Worker context with millisecond-scale retry and poll delays.
pub fn fast_context(output_root: &Path) -> Arc<WorkerContext> {
    Arc::new(WorkerContext {
        settings: SettingsTemplate::from_value(json!({ "W": 512, "H": 512 })).unwrap(),
        output_root: output_root.to_path_buf(),
        submit_retry: RetryPolicy::fixed(Duration::from_millis(1)),
        poll_interval: RetryPolicy::fixed(Duration::from_millis(1)),
    })
}
