//! Run configuration: command-line flags plus the node's cluster position.
//!
//! The cluster position comes from the job array environment and is read
//! exactly once at startup; no flag alters the shard math.
//!
//! | Variable                 | Required          | Description                  |
//! |--------------------------|-------------------|------------------------------|
//! | `SLURM_ARRAY_TASK_COUNT` | yes (no `--local`) | Total number of nodes        |
//! | `SLURM_ARRAY_TASK_ID`    | yes (no `--local`) | This node's 0-based id       |

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use framefarm_backend::api::DEFAULT_API_PREFIX;
use framefarm_backend::device::DEFAULT_BASE_PORT;
use framefarm_backend::supervisor::{BackendCommand, DEFAULT_BACKEND_ARGS, DEFAULT_BACKEND_PROGRAM};
use framefarm_core::error::DispatchError;
use framefarm_core::retry::RetryPolicy;
use framefarm_core::shard::NodeConfig;

use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Environment variable holding the total node count.
pub const NODE_COUNT_VAR: &str = "SLURM_ARRAY_TASK_COUNT";

/// Environment variable holding this node's 0-based id.
pub const NODE_ID_VAR: &str = "SLURM_ARRAY_TASK_ID";

/// Default total number of tasks across the cluster.
pub const DEFAULT_TASK_COUNT: usize = 40_000;

/// Distribute pre-built render jobs across local render backends.
#[derive(Debug, Clone, Parser)]
#[command(name = "framefarm", version)]
pub struct Cli {
    /// Run on a single machine when the node environment is absent.
    #[arg(long)]
    pub local: bool,

    /// Root of the dataset holding `midi_parseq_{n}` directories.
    #[arg(long)]
    pub dataset_path: PathBuf,

    /// Render settings template (JSON object) shared by every job.
    #[arg(long)]
    pub settings_path: PathBuf,

    /// Root the backend renders `batch_{n}` directories into.
    #[arg(long = "path", visible_alias = "output-path")]
    pub output_path: PathBuf,

    /// Total number of tasks across all nodes.
    #[arg(long, default_value_t = DEFAULT_TASK_COUNT)]
    pub count: usize,

    /// Port of the first backend; later slots use consecutive ports.
    #[arg(long, default_value_t = DEFAULT_BASE_PORT)]
    pub base_port: u16,

    /// Number of tasks buffered ahead of the workers.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Seconds to wait before retrying a failed submission.
    #[arg(long, default_value_t = 5)]
    pub retry_delay_secs: u64,

    /// Upper bound of random extra delay added to each retry, in milliseconds.
    #[arg(long, default_value_t = 0)]
    pub retry_jitter_ms: u64,

    /// Seconds between job status polls.
    #[arg(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Path prefix of the backend's batch API.
    #[arg(long, default_value = DEFAULT_API_PREFIX)]
    pub api_prefix: String,

    /// Program started once per slot as the render backend.
    #[arg(long, default_value = DEFAULT_BACKEND_PROGRAM)]
    pub backend_command: String,

    /// Backend argument (repeatable). `{port}` and `{device}` are substituted.
    #[arg(long = "backend-arg", allow_hyphen_values = true)]
    pub backend_args: Vec<String>,

    /// Extra backend environment variable as `KEY=VALUE` (repeatable).
    #[arg(long = "backend-env", value_parser = parse_env_pair)]
    pub backend_env: Vec<(String, String)>,

    /// Working directory of the backend processes.
    #[arg(long)]
    pub backend_dir: Option<String>,

    /// Forward backend stdout/stderr instead of discarding it.
    #[arg(long)]
    pub backend_logs: bool,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

/// Read this node's cluster position from the process environment.
pub fn node_from_env(local: bool) -> Result<NodeConfig, DispatchError> {
    node_from_lookup(local, |key| std::env::var(key).ok())
}

/// Resolve the cluster position through `lookup`.
///
/// With `local` set and neither variable present, the run is a single node.
pub fn node_from_lookup(
    local: bool,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<NodeConfig, DispatchError> {
    let count = lookup(NODE_COUNT_VAR);
    let id = lookup(NODE_ID_VAR);

    if local && count.is_none() && id.is_none() {
        return Ok(NodeConfig::single());
    }

    let node_count = parse_var(NODE_COUNT_VAR, count)?;
    let node_id = parse_var(NODE_ID_VAR, id)?;
    NodeConfig::new(node_count, node_id)
}

fn parse_var(name: &str, value: Option<String>) -> Result<usize, DispatchError> {
    let raw = value.ok_or_else(|| {
        DispatchError::Configuration(format!("{name} environment variable is required"))
    })?;
    raw.trim().parse::<usize>().map_err(|_| {
        DispatchError::Configuration(format!(
            "{name} must be a non-negative integer, got `{raw}`"
        ))
    })
}

/// Fully resolved configuration of one orchestrator run.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub node: NodeConfig,
    pub total_count: usize,
    pub dataset_path: PathBuf,
    pub settings_path: PathBuf,
    pub output_path: PathBuf,
    pub base_port: u16,
    pub queue_capacity: usize,
    pub submit_retry: RetryPolicy,
    pub poll_interval: RetryPolicy,
    pub api_prefix: String,
    pub backend: BackendCommand,
}

impl DispatchConfig {
    /// Combine parsed flags with the node position and validate them.
    pub fn from_cli(cli: Cli, node: NodeConfig) -> Result<Self, DispatchError> {
        if cli.count == 0 {
            return Err(DispatchError::Configuration(
                "--count must be at least 1".to_string(),
            ));
        }
        if cli.queue_capacity == 0 {
            return Err(DispatchError::Configuration(
                "--queue-capacity must be at least 1".to_string(),
            ));
        }

        let args = if cli.backend_args.is_empty() {
            DEFAULT_BACKEND_ARGS.iter().map(|a| a.to_string()).collect()
        } else {
            cli.backend_args
        };

        Ok(Self {
            node,
            total_count: cli.count,
            dataset_path: cli.dataset_path,
            settings_path: cli.settings_path,
            output_path: cli.output_path,
            base_port: cli.base_port,
            queue_capacity: cli.queue_capacity,
            submit_retry: RetryPolicy::fixed(Duration::from_secs(cli.retry_delay_secs))
                .with_jitter(Duration::from_millis(cli.retry_jitter_ms)),
            poll_interval: RetryPolicy::fixed(Duration::from_secs(cli.poll_interval_secs)),
            api_prefix: cli.api_prefix,
            backend: BackendCommand {
                program: cli.backend_command,
                args,
                env: cli.backend_env,
                working_directory: cli.backend_dir,
                inherit_output: cli.backend_logs,
            },
        })
    }
}
