//! Shared value types passed between the planner, the queue and the workers.

use std::path::PathBuf;

/// Zero-based position of a task in the global task range.
pub type TaskIndex = usize;

/// One unit of render work.
///
/// Immutable once created by the shard planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub index: TaskIndex,
    /// Ready-made job configuration document (the animation schedule).
    pub config_path: PathBuf,
    /// Input asset copied next to the rendered output on success.
    pub asset_path: PathBuf,
}

impl Task {
    /// One-based number used by the on-disk naming convention.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// Pairing of one local accelerator, one backend port and one dispatch worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerSlot {
    /// Accelerator index handed to the backend process.
    pub device: u32,
    /// Local port the slot's backend listens on.
    pub port: u16,
}

impl WorkerSlot {
    /// Base URL of the slot's backend on the loopback interface.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}
