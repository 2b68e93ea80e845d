//! Local accelerator discovery.
//!
//! One worker slot is created per accelerator. NVIDIA GPUs are counted via
//! NVML; initialisation is gracefully optional, so a host without drivers
//! falls back to Apple MPS (on Apple silicon) or CPU with a fixed number of
//! slots instead of failing.

use nvml_wrapper::Nvml;

use framefarm_core::error::DispatchError;
use framefarm_core::types::WorkerSlot;

/// Slot count used when no discrete accelerator is present.
pub const DEFAULT_SLOT_COUNT: u32 = 4;

/// Port of slot 0; slot `k` listens on `DEFAULT_BASE_PORT + k`.
pub const DEFAULT_BASE_PORT: u16 = 52361;

/// Accelerator family found on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceleratorKind {
    Cuda,
    Mps,
    Cpu,
}

impl AcceleratorKind {
    /// Collective transport matching the accelerator family.
    pub fn transport(self) -> &'static str {
        match self {
            Self::Cuda => "nccl",
            Self::Mps | Self::Cpu => "gloo",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Mps => "mps",
            Self::Cpu => "cpu",
        }
    }
}

/// Number of local worker slots and the accelerator backing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTopology {
    pub kind: AcceleratorKind,
    pub slot_count: u32,
}

impl DeviceTopology {
    /// Query the host's accelerator inventory.
    pub fn detect() -> Self {
        let cuda_devices = match Nvml::init() {
            Ok(nvml) => nvml.device_count().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to query GPU device count");
                0
            }),
            Err(e) => {
                tracing::debug!(error = %e, "NVML unavailable, no CUDA devices");
                0
            }
        };
        let topology = Self::from_inventory(cuda_devices, mps_available());
        tracing::info!(
            kind = topology.kind.as_str(),
            transport = topology.kind.transport(),
            slot_count = topology.slot_count,
            "Device detection complete",
        );
        topology
    }

    /// Derive the topology from a known inventory.
    pub fn from_inventory(cuda_devices: u32, mps: bool) -> Self {
        if cuda_devices > 0 {
            Self {
                kind: AcceleratorKind::Cuda,
                slot_count: cuda_devices,
            }
        } else if mps {
            Self {
                kind: AcceleratorKind::Mps,
                slot_count: DEFAULT_SLOT_COUNT,
            }
        } else {
            Self {
                kind: AcceleratorKind::Cpu,
                slot_count: DEFAULT_SLOT_COUNT,
            }
        }
    }

    /// Assign consecutive ports starting at `base_port`, one slot per device.
    pub fn slots(&self, base_port: u16) -> Result<Vec<WorkerSlot>, DispatchError> {
        (0..self.slot_count)
            .map(|device| {
                u16::try_from(device)
                    .ok()
                    .and_then(|offset| base_port.checked_add(offset))
                    .map(|port| WorkerSlot { device, port })
                    .ok_or_else(|| {
                        DispatchError::Configuration(format!(
                            "base port {base_port} leaves no room for {} slots",
                            self.slot_count
                        ))
                    })
            })
            .collect()
    }
}

fn mps_available() -> bool {
    cfg!(all(target_os = "macos", target_arch = "aarch64"))
}
