use serde::{Deserialize, Serialize};

/// Compute device class a run executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Cuda,
    Mps,
    Cpu,
}

impl DeviceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Mps => "mps",
            Self::Cpu => "cpu",
        }
    }

    /// Prefer CUDA, then MPS, else CPU.
    #[must_use]
    pub fn select(available: &DeviceAvailability) -> Self {
        if available.cuda {
            Self::Cuda
        } else if available.mps {
            Self::Mps
        } else {
            Self::Cpu
        }
    }

    #[must_use]
    pub fn is_accelerator(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accelerators a backend reports as usable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceAvailability {
    pub cuda: bool,
    pub mps: bool,
}

impl DeviceAvailability {
    #[must_use]
    pub fn cpu_only() -> Self {
        Self::default()
    }
}

/// Numeric precision used when loading base weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Precision {
    Float32,
    /// 4-bit NormalFloat storage with a higher-precision compute dtype.
    Nf4 { compute_dtype: String, double_quant: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    pub device: DeviceKind,
    pub precision: Precision,
}

impl LoadOptions {
    /// Full precision on CPU; 4-bit quantized weights on accelerators.
    #[must_use]
    pub fn for_device(device: DeviceKind) -> Self {
        let precision = if device.is_accelerator() {
            Precision::Nf4 { compute_dtype: "float16".to_string(), double_quant: true }
        } else {
            Precision::Float32
        };
        Self { device, precision }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_order() {
        assert_eq!(DeviceKind::select(&DeviceAvailability { cuda: true, mps: true }), DeviceKind::Cuda);
        assert_eq!(DeviceKind::select(&DeviceAvailability { cuda: false, mps: true }), DeviceKind::Mps);
        assert_eq!(DeviceKind::select(&DeviceAvailability::cpu_only()), DeviceKind::Cpu);
    }

    #[test]
    fn test_load_options_by_device() {
        assert_eq!(LoadOptions::for_device(DeviceKind::Cpu).precision, Precision::Float32);
        assert!(matches!(
            LoadOptions::for_device(DeviceKind::Cuda).precision,
            Precision::Nf4 { double_quant: true, .. }
        ));
    }
}
