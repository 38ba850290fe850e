//! Run configuration read from JSON.

use anyhow::{Context, Result};
use compute::DeviceType;
use network::{InputShapesMap, ModelConfig, NetworkConfig};
use serde::Deserialize;
use std::path::Path;

fn default_iterations() -> usize {
    1
}

fn default_input_fill() -> f32 {
    1.0
}

/// Everything needed to run one model.
///
/// ```json
/// {
///   "network": {"device_type": "cpu"},
///   "model": {"model_type": "layer_graph", "params": ["graph.json"]},
///   "input_shapes": {"x": [1, 3, 2, 2]},
///   "iterations": 10
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub input_shapes: InputShapesMap,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Value written into every element of every input.
    #[serde(default = "default_input_fill")]
    pub input_fill: f32,
}

impl RunConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid run config")
    }

    /// Reads a run config; a relative model path is taken relative to the
    /// config file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
        let mut config = Self::from_json(&json).with_context(|| format!("in {}", path.display()))?;
        if let (Some(model_path), Some(dir)) = (config.model.params.first_mut(), path.parent()) {
            if Path::new(model_path.as_str()).is_relative() {
                *model_path = dir.join(model_path.as_str()).to_string_lossy().into_owned();
            }
        }
        Ok(config)
    }

    /// Applies command-line overrides.
    pub fn override_with(&mut self, device: Option<DeviceType>, device_id: Option<i32>, iterations: Option<usize>) {
        if let Some(device) = device {
            self.network.device_type = device;
        }
        if let Some(device_id) = device_id {
            self.network.device_id = device_id;
        }
        if let Some(iterations) = iterations {
            self.iterations = iterations;
        }
    }
}
