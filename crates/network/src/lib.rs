#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

//! Model instances on a device: configuration, the [`NetworkBackend`]
//! lifecycle, the accelerator-runtime backend for pre-compiled models and the
//! layer-graph backend that dispatches per-layer accelerators.

use compute::{ComputeError, Result};
use std::sync::Arc;

pub mod backend;
pub mod config;
pub mod graph;
pub mod layer_network;
pub mod npu;

pub use backend::{ForwardCallback, NetworkBackend, NetworkState};
pub use config::{InputShapesMap, ModelConfig, ModelType, NetworkConfig, NetworkType, ShareMemoryMode};
pub use graph::{GraphLayer, LayerGraph};
pub use layer_network::LayerNetwork;
pub use npu::{NpuNetwork, NpuRuntime};

/// Creates network instances for a configuration.
#[derive(Clone, Default)]
pub struct NetworkFactory {
    npu_runtime: Option<Arc<NpuRuntime>>,
}

impl NetworkFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime shared by every NPU network this factory creates.
    #[must_use]
    pub fn with_npu_runtime(mut self, runtime: Arc<NpuRuntime>) -> Self {
        self.npu_runtime = Some(runtime);
        self
    }

    pub fn create(&self, config: &NetworkConfig) -> Result<Box<dyn NetworkBackend>> {
        match config.resolved_network_type() {
            NetworkType::Npu => {
                let runtime = self
                    .npu_runtime
                    .clone()
                    .ok_or_else(|| ComputeError::NullParam("no npu runtime registered".into()))?;
                Ok(Box::new(NpuNetwork::new(runtime)))
            }
            NetworkType::Layer | NetworkType::Auto => Ok(Box::new(LayerNetwork::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compute::{DeviceType, ErrorKind};

    #[test]
    fn factory_picks_the_backend_from_the_config() {
        let factory = NetworkFactory::new();
        let cpu = factory.create(&NetworkConfig::new(DeviceType::Cpu)).unwrap();
        assert_eq!(cpu.state(), NetworkState::Uninitialized);
        let err = factory.create(&NetworkConfig::new(DeviceType::Npu)).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NullParam);

        let factory = factory.with_npu_runtime(NpuRuntime::new(Arc::new(npu::SimulatedNpu::new())));
        assert!(factory.create(&NetworkConfig::new(DeviceType::Npu)).is_ok());
    }
}
