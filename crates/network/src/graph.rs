//! Layer graphs: the model format of [`crate::LayerNetwork`].
//!
//! A graph is a JSON document listing its inputs, outputs, named constants
//! and layers in execution order:
//!
//! ```json
//! {
//!   "inputs": [{"name": "x", "dims": [1, 3, 2, 2]}],
//!   "outputs": ["y"],
//!   "constants": [{"name": "bias", "dims": [1, 3, 1, 1], "values": [1, 2, 3]}],
//!   "layers": [
//!     {"name": "add", "type": "Add", "inputs": ["x", "bias"], "outputs": ["t"]},
//!     {"name": "flat", "type": "Reshape", "inputs": ["t"], "outputs": ["y"], "shape": [0, -1]}
//!   ]
//! }
//! ```

use compute::layer::{BinaryParam, CumsumParam, ReshapeParam};
use compute::{
    ComputeError, ConstantResource, ConstantResourceFlag, DimsVector, LayerInfo, LayerParam, LayerResource,
    LayerType, RawBuffer, Result,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ConstantType {
    #[default]
    Float,
    Int32,
}

#[derive(Debug, Deserialize)]
struct TensorDef {
    name: String,
    dims: DimsVector,
}

#[derive(Debug, Deserialize)]
struct ConstantDef {
    #[serde(default)]
    name: String,
    dims: DimsVector,
    #[serde(default)]
    data_type: ConstantType,
    values: Vec<f64>,
    /// Values depend on the input shapes and are converted again on reshape.
    #[serde(default)]
    shape_dependent: bool,
}

impl ConstantDef {
    fn to_raw_buffer(&self) -> Result<RawBuffer> {
        if self.values.len() != compute::dims::count(&self.dims) {
            return Err(ComputeError::Model(format!(
                "constant {} has {} values for dims {:?}",
                self.name,
                self.values.len(),
                self.dims
            )));
        }
        Ok(match self.data_type {
            ConstantType::Float => {
                let values: Vec<f32> = self.values.iter().map(|&v| v as f32).collect();
                RawBuffer::from_f32(self.dims.clone(), &values)
            }
            ConstantType::Int32 => {
                let values: Vec<i32> = self.values.iter().map(|&v| v as i32).collect();
                RawBuffer::from_i32(self.dims.clone(), &values)
            }
        })
    }
}

fn default_weight_input_index() -> usize {
    1
}

#[derive(Debug, Deserialize)]
struct LayerDef {
    name: String,
    #[serde(rename = "type")]
    layer_type: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    #[serde(default = "default_weight_input_index")]
    weight_input_index: usize,
    #[serde(default)]
    element: Option<ConstantDef>,
    #[serde(default)]
    axis: i64,
    #[serde(default)]
    num_axes: Option<usize>,
    #[serde(default)]
    shape: Vec<i64>,
    #[serde(default)]
    reshape_type: u8,
    #[serde(default)]
    exclusive: bool,
    #[serde(default)]
    reverse: bool,
}

impl LayerDef {
    fn param(&self, layer_type: LayerType) -> Result<LayerParam> {
        let axis_error = || ComputeError::Model(format!("layer {} has axis {} out of range", self.name, self.axis));
        Ok(match layer_type {
            LayerType::Reshape => LayerParam::Reshape(ReshapeParam {
                axis: usize::try_from(self.axis).map_err(|_| axis_error())?,
                num_axes: self.num_axes.unwrap_or(self.shape.len()),
                shape: self.shape.clone(),
                reshape_type: self.reshape_type,
            }),
            LayerType::Cumsum => LayerParam::Cumsum(CumsumParam {
                axis: i32::try_from(self.axis).map_err(|_| axis_error())?,
                exclusive: self.exclusive,
                reverse: self.reverse,
            }),
            _ => LayerParam::Binary(BinaryParam { weight_input_index: self.weight_input_index }),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GraphDef {
    inputs: Vec<TensorDef>,
    outputs: Vec<String>,
    #[serde(default)]
    constants: Vec<ConstantDef>,
    layers: Vec<LayerDef>,
}

/// One operation of a graph with its baked-in constants.
#[derive(Debug, Clone)]
pub struct GraphLayer {
    pub info: LayerInfo,
    pub resource: LayerResource,
}

#[derive(Debug, Clone)]
pub struct LayerGraph {
    /// Graph inputs with their declared dims.
    pub inputs: Vec<(String, DimsVector)>,
    pub outputs: Vec<String>,
    pub layers: Vec<GraphLayer>,
    pub constants: Arc<ConstantResource>,
    /// Constants that are converted again whenever the input shapes change.
    pub constant_flags: Arc<ConstantResourceFlag>,
}

impl LayerGraph {
    pub fn from_json(json: &str) -> Result<Self> {
        let def: GraphDef =
            serde_json::from_str(json).map_err(|err| ComputeError::Model(format!("invalid layer graph: {err}")))?;

        let mut constants = ConstantResource::new();
        let mut constant_flags = ConstantResourceFlag::new();
        for constant in &def.constants {
            if constant.shape_dependent {
                constant_flags.insert(constant.name.clone());
            }
            constants.insert(constant.name.clone(), Arc::new(constant.to_raw_buffer()?));
        }

        let mut layers = Vec::with_capacity(def.layers.len());
        for layer in &def.layers {
            let layer_type: LayerType = layer.layer_type.parse()?;
            let element = layer.element.as_ref().map(ConstantDef::to_raw_buffer).transpose()?;
            layers.push(GraphLayer {
                info: LayerInfo {
                    name: layer.name.clone(),
                    layer_type,
                    param: layer.param(layer_type)?,
                    inputs: layer.inputs.clone(),
                    outputs: layer.outputs.clone(),
                },
                resource: LayerResource { element },
            });
        }

        let graph = Self {
            inputs: def.inputs.into_iter().map(|t| (t.name, t.dims)).collect(),
            outputs: def.outputs,
            layers,
            constants: Arc::new(constants),
            constant_flags: Arc::new(constant_flags),
        };
        graph.validate()?;
        Ok(graph)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|err| ComputeError::Model(format!("cannot read layer graph {}: {err}", path.display())))?;
        Self::from_json(&json)
    }

    #[must_use]
    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }

    #[must_use]
    pub fn is_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|(input, _)| input == name)
    }

    /// Every blob is produced before it is consumed and every output is produced.
    fn validate(&self) -> Result<()> {
        let mut known: std::collections::HashSet<&str> = self.inputs.iter().map(|(n, _)| n.as_str()).collect();
        known.extend(self.constants.keys().map(String::as_str));
        for layer in &self.layers {
            if let Some(missing) = layer.info.inputs.iter().find(|n| !known.contains(n.as_str())) {
                return Err(ComputeError::Model(format!(
                    "layer {} reads blob {missing} before it is produced",
                    layer.info.name
                )));
            }
            known.extend(layer.info.outputs.iter().map(String::as_str));
        }
        if let Some(missing) = self.outputs.iter().find(|n| !known.contains(n.as_str())) {
            return Err(ComputeError::Model(format!("graph output {missing} is never produced")));
        }
        Ok(())
    }
}
