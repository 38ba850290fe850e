//! Network and model configuration.

use compute::{ComputeError, DeviceType, Precision, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Requested input shapes by blob name.
pub type InputShapesMap = HashMap<String, Vec<usize>>;

#[derive(Serialize, Deserialize)]
#[serde(remote = "DeviceType", rename_all = "snake_case")]
enum DeviceTypeDef {
    #[serde(alias = "naive")]
    Cpu,
    Arm,
    #[serde(alias = "cuda")]
    Gpu,
    Shader,
    #[serde(alias = "atlas")]
    Npu,
}

#[derive(Serialize, Deserialize)]
#[serde(remote = "Precision", rename_all = "snake_case")]
enum PrecisionDef {
    High,
    Normal,
    Low,
    Auto,
}

/// Which backend implementation runs the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// Picked from the device type.
    #[default]
    Auto,
    /// Pre-compiled model executed by the accelerator runtime.
    Npu,
    /// Layer graph dispatched to per-layer accelerators.
    Layer,
}

/// How intermediate blob memory is provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareMemoryMode {
    /// Each instance allocates its own.
    #[default]
    Default,
    /// Instances on one thread may share one arena.
    ShareOneThread,
    /// The caller supplies the arena through `set_forward_memory`.
    SetFromExternal,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    #[serde(with = "DeviceTypeDef")]
    pub device_type: DeviceType,
    pub device_id: i32,
    #[serde(with = "PrecisionDef")]
    pub precision: Precision,
    pub network_type: NetworkType,
    pub share_memory_mode: ShareMemoryMode,
}

impl NetworkConfig {
    #[must_use]
    pub fn new(device_type: DeviceType) -> Self {
        Self { device_type, ..Self::default() }
    }

    /// Network type after resolving `Auto` against the device.
    #[must_use]
    pub fn resolved_network_type(&self) -> NetworkType {
        match (self.network_type, self.device_type) {
            (NetworkType::Auto, DeviceType::Npu) => NetworkType::Npu,
            (NetworkType::Auto, _) => NetworkType::Layer,
            (other, _) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Opaque pre-compiled artifact; `params[0]` is its path.
    #[default]
    Npu,
    /// JSON layer graph; `params[0]` is its path.
    LayerGraph,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_type: ModelType,
    pub params: Vec<String>,
}

impl ModelConfig {
    pub fn new(model_type: ModelType, path: impl AsRef<Path>) -> Self {
        Self { model_type, params: vec![path.as_ref().to_string_lossy().into_owned()] }
    }

    /// Path of the model artifact.
    pub fn model_path(&self) -> Result<&Path> {
        self.params
            .first()
            .map(Path::new)
            .ok_or_else(|| ComputeError::param("model config has no model path"))
    }

    pub(crate) fn expect(&self, model_type: ModelType) -> Result<()> {
        if self.model_type != model_type {
            return Err(ComputeError::Param(format!(
                "{model_type:?} network cannot load a {:?} model",
                self.model_type
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_config_reads_device_aliases_and_defaults() {
        let config: NetworkConfig = serde_json::from_str(r#"{"device_type": "atlas", "device_id": 1}"#).unwrap();
        assert_eq!(config.device_type, DeviceType::Npu);
        assert_eq!(config.device_id, 1);
        assert_eq!(config.precision, Precision::Normal);
        assert_eq!(config.resolved_network_type(), NetworkType::Npu);

        let config: NetworkConfig =
            serde_json::from_str(r#"{"device_type": "shader", "precision": "high", "share_memory_mode": "set_from_external"}"#)
                .unwrap();
        assert_eq!(config.precision, Precision::High);
        assert_eq!(config.share_memory_mode, ShareMemoryMode::SetFromExternal);
        assert_eq!(config.resolved_network_type(), NetworkType::Layer);
    }

    #[test]
    fn model_config_needs_a_path() {
        let config = ModelConfig::default();
        assert!(config.model_path().is_err());
        let config = ModelConfig::new(ModelType::LayerGraph, "graph.json");
        assert_eq!(config.model_path().unwrap(), Path::new("graph.json"));
        assert!(config.expect(ModelType::Npu).is_err());
    }
}
