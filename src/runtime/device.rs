//! Device selection for the native runtime
//!
//! Weights and input tensors are placed on the selected device at load time.
//! CUDA or Metal is used when compiled in and present, CPU otherwise.

use anyhow::Result;
use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Where a loaded model's weights live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Cuda,
    Metal,
}

impl DeviceKind {
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, DeviceKind::Cpu)
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Cuda => "cuda",
            DeviceKind::Metal => "metal",
        })
    }
}

/// Configured device preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// First available accelerator, falling back to CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" | "mps" => Ok(Self::Metal),
            other => Err(format!(
                "unsupported device '{}' (expected auto, cpu, cuda or metal)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub device: Device,
    pub kind: DeviceKind,
}

impl DeviceProfile {
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            kind: DeviceKind::Cpu,
        }
    }

    /// Pick the weight dtype from the checkpoint's `torch_dtype` hint.
    ///
    /// CPU and Metal always compute in F32; CUDA keeps half precision when the
    /// checkpoint was published that way.
    pub fn select_dtype(&self, requested: Option<&str>) -> DType {
        let dtype = match (self.kind, requested.unwrap_or("")) {
            (DeviceKind::Cuda, "bfloat16" | "bf16") => DType::BF16,
            (DeviceKind::Cuda, "float16" | "f16") => DType::F16,
            _ => DType::F32,
        };

        tracing::debug!(
            device = %self.kind,
            requested = ?requested,
            dtype = ?dtype,
            "Selected dtype"
        );

        dtype
    }
}

pub struct DeviceSelector;

impl DeviceSelector {
    fn try_cuda() -> Option<DeviceProfile> {
        let device = std::panic::catch_unwind(|| Device::cuda_if_available(0))
            .ok()?
            .ok()?;
        device.is_cuda().then_some(DeviceProfile {
            device,
            kind: DeviceKind::Cuda,
        })
    }

    fn try_metal() -> Option<DeviceProfile> {
        let device = std::panic::catch_unwind(|| Device::metal_if_available(0))
            .ok()?
            .ok()?;
        device.is_metal().then_some(DeviceProfile {
            device,
            kind: DeviceKind::Metal,
        })
    }

    /// First available accelerator, CPU otherwise
    pub fn detect() -> DeviceProfile {
        if let Some(profile) = Self::try_cuda() {
            tracing::info!("Using CUDA device for inference");
            return profile;
        }

        if let Some(profile) = Self::try_metal() {
            tracing::info!("Using Metal device for inference");
            return profile;
        }

        tracing::info!("Falling back to CPU for inference");
        DeviceProfile::cpu()
    }

    /// Honour an explicit preference, falling back to detection when the
    /// requested accelerator is unavailable
    pub fn detect_with_preference(preference: DevicePreference) -> Result<DeviceProfile> {
        let profile = match preference {
            DevicePreference::Auto => Self::detect(),
            DevicePreference::Cpu => DeviceProfile::cpu(),
            DevicePreference::Cuda => Self::try_cuda().unwrap_or_else(|| {
                tracing::warn!("CUDA requested but not available");
                Self::detect()
            }),
            DevicePreference::Metal => Self::try_metal().unwrap_or_else(|| {
                tracing::warn!("Metal requested but not available");
                Self::detect()
            }),
        };
        Ok(profile)
    }
}
