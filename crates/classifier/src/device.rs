use crate::error::ClassifierError;
use candle_core::Device;
use std::fmt;
use std::str::FromStr;

/// Requested compute target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// CUDA if available, then Metal, then CPU.
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
    Metal(usize),
}

impl FromStr for DevicePreference {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_lowercase();
        let (name, ordinal) = match value.split_once(':') {
            Some((name, ordinal)) => {
                let ordinal = ordinal.parse().map_err(|_| {
                    ClassifierError::Configuration(format!("invalid device ordinal in '{}'", s))
                })?;
                (name, ordinal)
            }
            None => (value.as_str(), 0),
        };

        match name {
            "auto" | "" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda(ordinal)),
            "metal" => Ok(DevicePreference::Metal(ordinal)),
            _ => Err(ClassifierError::Configuration(format!(
                "unknown device '{}', expected auto, cpu, cuda[:N] or metal[:N]",
                s
            ))),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Auto => write!(f, "auto"),
            DevicePreference::Cpu => write!(f, "cpu"),
            DevicePreference::Cuda(ordinal) => write!(f, "cuda:{}", ordinal),
            DevicePreference::Metal(ordinal) => write!(f, "metal:{}", ordinal),
        }
    }
}

/// Resolve a preference to a concrete device. Never fails: an unavailable
/// accelerator falls back to the CPU.
pub fn select_device(preference: DevicePreference) -> Device {
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Auto => match Device::cuda_if_available(0) {
            Ok(device) if !device.is_cpu() => device,
            _ => Device::metal_if_available(0).unwrap_or(Device::Cpu),
        },
        DevicePreference::Cuda(ordinal) => Device::new_cuda(ordinal).unwrap_or_else(|e| {
            tracing::warn!(ordinal, error = %e, "CUDA device unavailable, falling back to CPU");
            Device::Cpu
        }),
        DevicePreference::Metal(ordinal) => Device::new_metal(ordinal).unwrap_or_else(|e| {
            tracing::warn!(ordinal, error = %e, "Metal device unavailable, falling back to CPU");
            Device::Cpu
        }),
    };

    tracing::info!(%preference, device = ?device.location(), "Selected compute device");
    device
}
