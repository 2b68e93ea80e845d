//! End-to-end tests of the worker pool wiring with in-memory backends.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use clap::Parser;

use framefarm_backend::api::{BackendApiError, RenderBackend};
use framefarm_backend::messages::{BatchRequest, JobStatusResponse, SubmitResponse};
use framefarm_core::error::DispatchError;
use framefarm_core::naming;
use framefarm_core::shard::NodeConfig;
use framefarm_core::types::WorkerSlot;
use framefarm_dispatch::config::{Cli, DispatchConfig};
use framefarm_dispatch::orchestrator::{dispatch, Orchestrator};

use common::{build_dataset, fast_context, FakeBackend, Script};

fn slots(n: u32) -> Vec<WorkerSlot> {
    (0..n)
        .map(|device| WorkerSlot {
            device,
            port: 52361 + device as u16,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Test: every task is processed exactly once across all workers
// ---------------------------------------------------------------------------

/// Three workers over 25 tasks submit every batch exactly once and copy
/// every asset.
#[tokio::test]
async fn every_task_is_dispatched_exactly_once() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let tasks = build_dataset(data.path(), 25);

    let backends: Vec<_> = slots(3)
        .into_iter()
        .map(|slot| (slot, FakeBackend::new(Script::default(), out.path())))
        .collect();
    let fakes: Vec<FakeBackend> = backends.iter().map(|(_, b)| b.clone()).collect();

    let summary = tokio::time::timeout(
        Duration::from_secs(30),
        dispatch(tasks, backends, fast_context(out.path()), 2),
    )
    .await
    .expect("dispatch should finish")
    .unwrap();

    assert!(summary.drained());
    assert_eq!(summary.workers, 3);
    assert_eq!(summary.workers_lost, 0);
    assert_eq!(summary.totals.processed, 25);
    assert_eq!(summary.totals.jobs_succeeded, 25);
    assert_eq!(summary.totals.assets_copied, 25);

    let batches: Vec<String> = fakes.iter().flat_map(|f| f.accepted_batches()).collect();
    let unique: HashSet<&String> = batches.iter().collect();
    assert_eq!(batches.len(), 25);
    assert_eq!(unique.len(), 25);

    for n in 1..=25 {
        let copied = out.path().join(naming::batch_name(n)).join(naming::asset_file_name(n));
        assert!(copied.exists(), "missing asset for task {n}");
    }
}

// ---------------------------------------------------------------------------
// Test: a second run over the same output skips everything already rendered
// ---------------------------------------------------------------------------

/// Tasks with an existing render are skipped; only the rest are submitted.
#[tokio::test]
async fn rerun_skips_finished_tasks() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let tasks = build_dataset(data.path(), 6);

    for n in [1, 2, 5] {
        let dir = naming::expected_output_dir(out.path(), n);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("render.mp4"), b"").unwrap();
    }

    let backends: Vec<_> = slots(2)
        .into_iter()
        .map(|slot| (slot, FakeBackend::new(Script::default(), out.path())))
        .collect();
    let fakes: Vec<FakeBackend> = backends.iter().map(|(_, b)| b.clone()).collect();

    let summary = dispatch(tasks, backends, fast_context(out.path()), 10).await.unwrap();

    assert_eq!(summary.totals.processed, 6);
    assert_eq!(summary.totals.skipped, 3);
    let mut submitted: Vec<String> = fakes.iter().flat_map(|f| f.accepted_batches()).collect();
    submitted.sort();
    assert_eq!(submitted, vec!["batch_3", "batch_4", "batch_6"]);
}

// ---------------------------------------------------------------------------
// Test: a slow-starting backend delays but does not lose its tasks
// ---------------------------------------------------------------------------

/// A backend that rejects its first submissions delays its worker without
/// losing any task.
#[tokio::test]
async fn slow_backend_startup_is_absorbed_by_retries() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let tasks = build_dataset(data.path(), 8);

    let mut backends = Vec::new();
    for (i, slot) in slots(2).into_iter().enumerate() {
        let script = Script {
            failing_submits: if i == 0 { 5 } else { 0 },
            ..Default::default()
        };
        backends.push((slot, FakeBackend::new(script, out.path())));
    }

    let summary = dispatch(tasks, backends, fast_context(out.path()), 1).await.unwrap();

    assert!(summary.drained());
    assert_eq!(summary.totals.jobs_succeeded, 8);
    assert_eq!(summary.totals.submit_attempts, 8 + 5);
}

// ---------------------------------------------------------------------------
// Test: an empty pool is rejected instead of blocking forever
// ---------------------------------------------------------------------------

/// An empty worker pool is rejected instead of blocking forever.
#[tokio::test]
async fn dispatch_without_slots_is_configuration_error() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let tasks = build_dataset(data.path(), 1);

    let result = dispatch::<FakeBackend>(tasks, Vec::new(), fast_context(out.path()), 1).await;
    assert_matches!(result, Err(DispatchError::Configuration(_)));
}

// ---------------------------------------------------------------------------
// Test: an empty shard drains immediately
// ---------------------------------------------------------------------------

/// With no tasks the pool starts, closes and reports a drained shard.
#[tokio::test]
async fn empty_shard_drains_immediately() {
    let out = tempfile::tempdir().unwrap();
    let backends = vec![(slots(1)[0], FakeBackend::new(Script::default(), out.path()))];

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        dispatch(Vec::new(), backends, fast_context(out.path()), 1),
    )
    .await
    .expect("no tasks means no waiting")
    .unwrap();

    assert!(summary.drained());
    assert_eq!(summary.totals.processed, 0);
}

// ---------------------------------------------------------------------------
// Test: a crashing worker ends the run as not drained instead of hanging
// ---------------------------------------------------------------------------

/// Backend whose submissions bring down the calling worker.
struct CrashingBackend;

#[async_trait]
impl RenderBackend for CrashingBackend {
    async fn submit_batch(&self, _request: &BatchRequest) -> Result<SubmitResponse, BackendApiError> {
        panic!("render client crashed");
    }

    async fn job_status(&self, _job_id: &str) -> Result<JobStatusResponse, BackendApiError> {
        panic!("render client crashed");
    }
}

/// A worker that dies mid-task is reported as lost and the shard as not
/// drained, so the caller can fail the run.
#[tokio::test]
async fn crashed_worker_is_reported_not_drained() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let tasks = build_dataset(data.path(), 1);

    let backends = vec![(slots(1)[0], CrashingBackend)];

    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        dispatch(tasks, backends, fast_context(out.path()), 1),
    )
    .await
    .expect("dispatch must return after the worker dies")
    .unwrap();

    assert_eq!(summary.workers, 1);
    assert_eq!(summary.workers_lost, 1);
    assert_eq!(summary.totals.processed, 0);
    assert!(!summary.drained());
}

// ---------------------------------------------------------------------------
// Test: a backend that cannot be started aborts the whole run
// ---------------------------------------------------------------------------

/// `Orchestrator::run` loads the settings, derives slots and surfaces a
/// spawn failure as `BackendLaunch` for the first slot.
#[tokio::test]
async fn unlaunchable_backend_aborts_run() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    build_dataset(data.path(), 2);
    let settings = data.path().join("settings.json");
    std::fs::write(&settings, r#"{ "W": 512, "H": 512 }"#).unwrap();

    let cli = Cli::try_parse_from([
        "framefarm",
        "--local",
        "--dataset-path",
        data.path().to_str().unwrap(),
        "--settings-path",
        settings.to_str().unwrap(),
        "--path",
        out.path().to_str().unwrap(),
        "--count",
        "2",
        "--backend-command",
        "/nonexistent/framefarm-render-service",
    ])
    .unwrap();
    let config = DispatchConfig::from_cli(cli, NodeConfig::single()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(30), Orchestrator::new(config).run())
        .await
        .expect("launch failure must not hang");

    assert_matches!(result, Err(DispatchError::BackendLaunch { slot: 0, .. }));
}

/// A settings template that is not a JSON object is rejected before any
/// backend is started.
#[tokio::test]
async fn invalid_settings_template_aborts_run() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let settings = data.path().join("settings.json");
    std::fs::write(&settings, "[1, 2, 3]").unwrap();

    let cli = Cli::try_parse_from([
        "framefarm",
        "--local",
        "--dataset-path",
        data.path().to_str().unwrap(),
        "--settings-path",
        settings.to_str().unwrap(),
        "--path",
        out.path().to_str().unwrap(),
        "--count",
        "2",
        "--backend-command",
        "/nonexistent/framefarm-render-service",
    ])
    .unwrap();
    let config = DispatchConfig::from_cli(cli, NodeConfig::single()).unwrap();

    let result = Orchestrator::new(config).run().await;
    assert_matches!(result, Err(DispatchError::Configuration(_)));
}
