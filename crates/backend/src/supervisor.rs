//! Per-slot render backend processes.
//!
//! [`BackendSupervisor`] spawns one render service per worker slot, bound to
//! the slot's port and accelerator. Each child is owned by a monitor task
//! that reports an unexpected exit and kills the child when the supervisor
//! shuts down (or is dropped). Crashed backends are not restarted: the
//! bound worker keeps retrying submission against the dead port.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use framefarm_core::error::DispatchError;
use framefarm_core::types::WorkerSlot;

/// Placeholder replaced by the slot's port in backend arguments.
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Placeholder replaced by the slot's accelerator index in backend arguments.
pub const DEVICE_PLACEHOLDER: &str = "{device}";

/// Default launch line of the render service, relative to its checkout.
pub const DEFAULT_BACKEND_PROGRAM: &str = "python";
pub const DEFAULT_BACKEND_ARGS: &[&str] = &[
    "launch.py",
    "--api",
    "--port",
    PORT_PLACEHOLDER,
    "--device-id",
    DEVICE_PLACEHOLDER,
    "--opt-sdp-attention",
    "--disable-model-loading-ram-optimization",
    "--deforum-api",
    "--disable-console-progressbars",
];

/// How long shutdown waits for each monitor to kill its child.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Command line used to start one backend per slot.
#[derive(Debug, Clone)]
pub struct BackendCommand {
    pub program: String,
    /// Arguments; `{port}` and `{device}` are substituted per slot.
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// Working directory of the child (inherited if `None`).
    pub working_directory: Option<String>,
    /// Forward the child's stdout/stderr to ours instead of discarding it.
    pub inherit_output: bool,
}

impl Default for BackendCommand {
    fn default() -> Self {
        Self {
            program: DEFAULT_BACKEND_PROGRAM.to_string(),
            args: DEFAULT_BACKEND_ARGS.iter().map(|a| a.to_string()).collect(),
            env: Vec::new(),
            working_directory: None,
            inherit_output: false,
        }
    }
}

impl BackendCommand {
    /// Arguments with the slot's port and accelerator filled in.
    pub fn args_for(&self, slot: WorkerSlot) -> Vec<String> {
        let port = slot.port.to_string();
        let device = slot.device.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(PORT_PLACEHOLDER, &port)
                    .replace(DEVICE_PLACEHOLDER, &device)
            })
            .collect()
    }

    fn build(&self, slot: WorkerSlot) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args_for(slot))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if self.inherit_output {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }

        cmd
    }
}

/// A running backend process bound to one slot.
pub struct BackendInstance {
    pub slot: WorkerSlot,
    /// OS process id, if the child had not already exited when spawned.
    pub pid: Option<u32>,
    monitor: tokio::task::JoinHandle<()>,
}

impl BackendInstance {
    /// Whether the monitor task has observed the process exit.
    pub fn has_exited(&self) -> bool {
        self.monitor.is_finished()
    }
}

/// Launches and owns the backend processes of this node.
pub struct BackendSupervisor {
    command: BackendCommand,
    instances: Vec<BackendInstance>,
    /// Master cancellation token; cancelling it kills every child.
    cancel: CancellationToken,
}

impl BackendSupervisor {
    pub fn new(command: BackendCommand) -> Self {
        Self {
            command,
            instances: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the backend for `slot`.
    ///
    /// Readiness is not awaited; workers absorb startup latency by retrying
    /// their first submissions.
    pub fn launch(&mut self, slot: WorkerSlot) -> Result<&BackendInstance, DispatchError> {
        let child = self
            .command
            .build(slot)
            .spawn()
            .map_err(|e| DispatchError::BackendLaunch {
                slot: slot.device,
                port: slot.port,
                reason: format!("{}: {e}", self.command.program),
            })?;

        let pid = child.id();
        tracing::info!(
            slot = slot.device,
            port = slot.port,
            pid,
            program = %self.command.program,
            "Backend launched",
        );

        let cancel = self.cancel.child_token();
        let monitor = tokio::spawn(monitor_child(child, slot, cancel));

        let idx = self.instances.len();
        self.instances.push(BackendInstance { slot, pid, monitor });
        Ok(&self.instances[idx])
    }

    /// Spawn one backend per slot. The first failure aborts the launch and
    /// is returned; already started backends stay owned by the supervisor
    /// and are killed when it shuts down or is dropped.
    pub fn launch_all(&mut self, slots: &[WorkerSlot]) -> Result<(), DispatchError> {
        for &slot in slots {
            self.launch(slot)?;
        }
        Ok(())
    }

    pub fn instances(&self) -> &[BackendInstance] {
        &self.instances
    }

    /// Kill every backend and wait (bounded) for the monitors to finish.
    pub async fn shutdown(&mut self) {
        tracing::info!(count = self.instances.len(), "Stopping backends");
        self.cancel.cancel();

        for instance in self.instances.drain(..) {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, instance.monitor)
                .await
                .is_err()
            {
                tracing::warn!(
                    slot = instance.slot.device,
                    port = instance.slot.port,
                    "Backend did not stop in time",
                );
            }
        }
    }
}

impl Drop for BackendSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Own `child` until it exits or `cancel` fires.
async fn monitor_child(mut child: Child, slot: WorkerSlot, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                tracing::warn!(slot = slot.device, port = slot.port, error = %e, "Failed to kill backend");
            } else {
                tracing::debug!(slot = slot.device, port = slot.port, "Backend stopped");
            }
        }
        status = child.wait() => match status {
            Ok(status) => {
                tracing::error!(
                    slot = slot.device,
                    port = slot.port,
                    exit_code = status.code().unwrap_or(-1),
                    "Backend exited; its worker will keep retrying submissions",
                );
            }
            Err(e) => {
                tracing::error!(slot = slot.device, port = slot.port, error = %e, "Failed to wait on backend");
            }
        }
    }
}
