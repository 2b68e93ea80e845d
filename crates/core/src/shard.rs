//! Static, size-based split of the global task range across nodes.
//!
//! Every node gets `ceil(total / node_count)` consecutive indices; the last
//! non-empty shard is truncated at `total`. With more nodes than that split
//! needs, trailing nodes receive an empty shard.

use std::ops::Range;
use std::path::Path;

use crate::error::DispatchError;
use crate::naming;
use crate::types::Task;

/// This node's position in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub node_count: usize,
    pub node_id: usize,
}

impl NodeConfig {
    /// Validate and build a node configuration.
    pub fn new(node_count: usize, node_id: usize) -> Result<Self, DispatchError> {
        if node_count == 0 {
            return Err(DispatchError::Configuration(
                "node count must be at least 1".to_string(),
            ));
        }
        if node_id >= node_count {
            return Err(DispatchError::Configuration(format!(
                "node id {node_id} is outside [0, {node_count})"
            )));
        }
        Ok(Self {
            node_count,
            node_id,
        })
    }

    /// Configuration for a single-machine run.
    pub fn single() -> Self {
        Self {
            node_count: 1,
            node_id: 0,
        }
    }
}

/// Number of tasks every node is responsible for (the last may get fewer).
pub fn entries_per_node(total_count: usize, node_count: usize) -> usize {
    total_count.div_ceil(node_count)
}

/// Index range owned by `node`.
pub fn shard_range(total_count: usize, node: NodeConfig) -> Result<Range<usize>, DispatchError> {
    if total_count == 0 {
        return Err(DispatchError::Configuration(
            "total task count must be at least 1".to_string(),
        ));
    }
    // Re-validate in case the struct was built by hand.
    let node = NodeConfig::new(node.node_count, node.node_id)?;

    let per_node = entries_per_node(total_count, node.node_count);
    let start = (node.node_id * per_node).min(total_count);
    let end = (start + per_node).min(total_count);
    Ok(start..end)
}

/// Build this node's tasks, in index order.
pub fn plan(
    total_count: usize,
    node: NodeConfig,
    dataset_root: &Path,
) -> Result<Vec<Task>, DispatchError> {
    let range = shard_range(total_count, node)?;
    Ok(range
        .map(|index| {
            let n = index + 1;
            Task {
                index,
                config_path: naming::config_path(dataset_root, n),
                asset_path: naming::asset_path(dataset_root, n),
            }
        })
        .collect())
}
