//! Compute device selection

use std::fmt;

/// Device a rank computes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu { device_id: usize },
}

impl Device {
    /// Device for `rank` given `Global.use_gpu`.
    ///
    /// Each rank takes the accelerator matching its rank. Falls back to CPU
    /// with a warning when no accelerator is visible.
    pub fn resolve(use_gpu: bool, rank: usize) -> Self {
        if !use_gpu {
            return Self::Cpu;
        }
        if Self::gpu_available() {
            Self::Gpu { device_id: rank }
        } else {
            tracing::warn!("Global.use_gpu is set but no accelerator is visible, using CPU");
            Self::Cpu
        }
    }

    /// Whether an accelerator is visible to this process.
    pub fn gpu_available() -> bool {
        match std::env::var("CUDA_VISIBLE_DEVICES") {
            Ok(devices) => !devices.trim().is_empty() && devices.trim() != "-1",
            Err(_) => std::process::Command::new("nvidia-smi")
                .arg("--query-gpu=name")
                .arg("--format=csv,noheader")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false),
        }
    }

    pub const fn is_gpu(&self) -> bool {
        matches!(self, Self::Gpu { .. })
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu { device_id } => write!(f, "gpu:{device_id}"),
        }
    }
}
