//! `framefarm` -- render job dispatcher for one cluster node.
//!
//! Computes this node's shard of the task range, starts one render backend
//! per local accelerator, and drains the shard through them. See
//! [`framefarm_dispatch::config`] for flags and environment variables.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use framefarm_dispatch::config::{self, Cli, DispatchConfig};
use framefarm_dispatch::orchestrator::Orchestrator;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framefarm_dispatch=info,framefarm_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let node = config::node_from_env(cli.local).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid node configuration");
        std::process::exit(1);
    });

    let config = DispatchConfig::from_cli(cli, node).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        node_id = config.node.node_id,
        node_count = config.node.node_count,
        total_count = config.total_count,
        dataset = %config.dataset_path.display(),
        output = %config.output_path.display(),
        "Starting framefarm",
    );

    match Orchestrator::new(config).run().await {
        Ok(summary) if summary.drained() => {
            tracing::info!(processed = summary.totals.processed, "Shard drained");
        }
        Ok(summary) => {
            tracing::error!(
                processed = summary.totals.processed,
                shard_size = summary.shard_size,
                "Shard not fully drained",
            );
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "Dispatch aborted");
            std::process::exit(1);
        }
    }
}
