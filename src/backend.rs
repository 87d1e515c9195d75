//! Backends and device resolution.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};

use crate::config::RunConfig;
use crate::error::{ExecutorError, Result};

/// Backend used for training (NdArray on the CPU with autodiff)
pub type TrainBackend = Autodiff<NdArray<f32>>;

/// Maps a configured device name onto a concrete backend device
pub trait ResolveDevice: Backend {
    /// Returns `None` when the backend has no device by that name
    fn resolve_device(name: &str) -> Option<Self::Device>;
}

impl ResolveDevice for NdArray<f32> {
    fn resolve_device(name: &str) -> Option<Self::Device> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(NdArrayDevice::Cpu),
            _ => None,
        }
    }
}

impl<B: ResolveDevice> ResolveDevice for Autodiff<B> {
    fn resolve_device(name: &str) -> Option<Self::Device> {
        B::resolve_device(name)
    }
}

/// Resolve the `device` key (default `cpu`) for backend `B`
pub fn device_from_config<B: ResolveDevice>(config: &RunConfig) -> Result<B::Device> {
    let name = config.device_name()?;
    B::resolve_device(&name).ok_or(ExecutorError::UnsupportedDevice(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_resolves() {
        assert_eq!(
            TrainBackend::resolve_device("CPU"),
            Some(NdArrayDevice::Cpu)
        );
    }

    #[test]
    fn test_default_device_is_cpu() {
        let config = RunConfig::from_toml_str("").unwrap();
        let device = device_from_config::<TrainBackend>(&config).unwrap();
        assert_eq!(device, NdArrayDevice::Cpu);
    }

    #[test]
    fn test_unknown_device_is_config_error() {
        let config = RunConfig::from_toml_str("device = \"cuda:0\"").unwrap();
        let err = device_from_config::<TrainBackend>(&config).unwrap_err();

        assert!(err.is_config());
        assert!(err.to_string().contains("cuda:0"));
    }
}
