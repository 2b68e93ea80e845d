//! Wires planning, backend supervision and the worker pool together.
//!
//! Sequence of one run: compute this node's shard, launch one backend per
//! slot, start one worker per slot, feed the shard through the queue, wait
//! until every task is acknowledged, close the queue once per worker, join
//! the workers, stop the backends. The orchestrator performs no retries;
//! all resilience lives in the workers.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};

use framefarm_backend::api::{RenderApi, RenderBackend};
use framefarm_backend::device::DeviceTopology;
use framefarm_backend::payload::SettingsTemplate;
use framefarm_backend::supervisor::BackendSupervisor;
use framefarm_core::error::DispatchError;
use framefarm_core::shard;
use framefarm_core::types::{Task, WorkerSlot};

use crate::config::DispatchConfig;
use crate::queue::TaskQueue;
use crate::worker::{DispatchWorker, WorkerContext, WorkerReport};

/// Totals of one orchestrator run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Tasks in this node's shard.
    pub shard_size: usize,
    /// Workers that ran.
    pub workers: usize,
    /// Workers whose task panicked instead of returning a report.
    pub workers_lost: usize,
    pub totals: WorkerReport,
}

impl RunSummary {
    /// Whether every task of the shard was acknowledged by a worker.
    pub fn drained(&self) -> bool {
        self.totals.processed == self.shard_size
    }
}

pub struct Orchestrator {
    config: DispatchConfig,
}

impl Orchestrator {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    /// Execute one full run on this node.
    pub async fn run(&self) -> Result<RunSummary, DispatchError> {
        let config = &self.config;

        let tasks = shard::plan(config.total_count, config.node, &config.dataset_path)?;
        tracing::info!(
            node_id = config.node.node_id,
            node_count = config.node.node_count,
            per_node = shard::entries_per_node(config.total_count, config.node.node_count),
            shard_size = tasks.len(),
            first = ?tasks.first().map(|t| t.index),
            last = ?tasks.last().map(|t| t.index),
            "Shard computed",
        );
        if tasks.is_empty() {
            tracing::info!("Shard is empty, nothing to dispatch");
            return Ok(RunSummary::default());
        }

        let settings = SettingsTemplate::load(&config.settings_path).await?;

        let topology = DeviceTopology::detect();
        let slots = topology.slots(config.base_port)?;

        let backends = slots
            .iter()
            .map(|slot| {
                RenderApi::new(&slot.base_url(), &config.api_prefix)
                    .map(|api| (*slot, api))
                    .map_err(|e| {
                        DispatchError::Configuration(format!("cannot build HTTP client: {e}"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut supervisor = BackendSupervisor::new(config.backend.clone());
        if let Err(e) = supervisor.launch_all(&slots) {
            supervisor.shutdown().await;
            return Err(e);
        }

        let ctx = Arc::new(WorkerContext {
            settings,
            output_root: config.output_path.clone(),
            submit_retry: config.submit_retry,
            poll_interval: config.poll_interval,
        });

        let summary = dispatch(tasks, backends, ctx, config.queue_capacity).await;
        supervisor.shutdown().await;
        summary
    }
}

/// Run the worker pool over `tasks`, one worker per `(slot, backend)` pair.
pub async fn dispatch<B>(
    tasks: Vec<Task>,
    backends: Vec<(WorkerSlot, B)>,
    ctx: Arc<WorkerContext>,
    queue_capacity: usize,
) -> Result<RunSummary, DispatchError>
where
    B: RenderBackend + 'static,
{
    if backends.is_empty() {
        return Err(DispatchError::Configuration(
            "at least one worker slot is required".to_string(),
        ));
    }

    let queue = Arc::new(TaskQueue::new(queue_capacity));
    let mut summary = RunSummary {
        shard_size: tasks.len(),
        workers: backends.len(),
        ..Default::default()
    };

    let mut workers: FuturesUnordered<_> = backends
        .into_iter()
        .map(|(slot, backend)| {
            let worker = DispatchWorker::new(slot, backend, Arc::clone(&queue), Arc::clone(&ctx));
            tokio::spawn(worker.run())
        })
        .collect();

    // A dead worker never acks its in-flight task, so the feed is raced
    // against worker exits instead of awaited on its own.
    let feed = async {
        for task in tasks {
            queue.put(task).await;
        }
        queue.join_all().await;
    };
    tokio::pin!(feed);

    loop {
        tokio::select! {
            _ = &mut feed => {
                tracing::info!(tasks = summary.shard_size, "All tasks acknowledged, closing queue");
                break;
            }
            joined = workers.next() => match joined {
                Some(Ok(report)) => summary.totals.merge(&report),
                Some(Err(e)) => {
                    summary.workers_lost += 1;
                    tracing::error!(error = %e, "Worker task failed, abandoning the rest of the shard");
                    break;
                }
                None => break,
            },
        }
    }

    // Live workers finish what is already queued, then see the close signal.
    queue.close(workers.len()).await;

    while let Some(joined) = workers.next().await {
        match joined {
            Ok(report) => summary.totals.merge(&report),
            Err(e) => {
                summary.workers_lost += 1;
                tracing::error!(error = %e, "Worker task failed");
            }
        }
    }

    tracing::info!(
        processed = summary.totals.processed,
        workers_lost = summary.workers_lost,
        skipped = summary.totals.skipped,
        invalid = summary.totals.invalid,
        succeeded = summary.totals.jobs_succeeded,
        failed = summary.totals.jobs_failed,
        submit_attempts = summary.totals.submit_attempts,
        "Dispatch complete",
    );
    Ok(summary)
}
