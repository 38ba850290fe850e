//! Graph operations: kind, parameters, constant resources and static shape
//! inference.

use crate::dims::{self, DimsVector};
use crate::{ComputeError, Kernel, RawBuffer, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerType {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Reshape,
    Cumsum,
}

impl LayerType {
    /// Element-wise kernel behind a binary layer.
    #[must_use]
    pub const fn kernel(self) -> Option<Kernel> {
        match self {
            Self::Add => Some(Kernel::Add),
            Self::Sub => Some(Kernel::Sub),
            Self::Mul => Some(Kernel::Mul),
            Self::Div => Some(Kernel::Div),
            Self::Max => Some(Kernel::Max),
            Self::Min => Some(Kernel::Min),
            Self::Reshape | Self::Cumsum => None,
        }
    }
}

impl std::str::FromStr for LayerType {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "add" => Self::Add,
            "sub" => Self::Sub,
            "mul" => Self::Mul,
            "div" => Self::Div,
            "max" | "maximum" => Self::Max,
            "min" | "minimum" => Self::Min,
            "reshape" => Self::Reshape,
            "cumsum" => Self::Cumsum,
            other => return Err(ComputeError::Param(format!("unknown layer type `{other}`"))),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryParam {
    /// Operand slot taken by the resource constant when the layer has a
    /// single blob input.
    pub weight_input_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReshapeParam {
    pub axis: usize,
    pub num_axes: usize,
    /// Target shape; `0` copies the input dim, `-1` infers it.
    pub shape: Vec<i64>,
    /// 0: plain reshape over planar data; 1: reshape in channel-last order.
    pub reshape_type: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CumsumParam {
    /// Negative values count from the last dim.
    pub axis: i32,
    pub exclusive: bool,
    pub reverse: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerParam {
    Binary(BinaryParam),
    Reshape(ReshapeParam),
    Cumsum(CumsumParam),
}

/// Constants baked into a layer (not graph inputs).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerResource {
    pub element: Option<RawBuffer>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerInfo {
    pub name: String,
    pub layer_type: LayerType,
    pub param: LayerParam,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl LayerInfo {
    /// Output dims for the given input dims, before any runtime adjustment.
    pub fn infer_output_dims(&self, inputs: &[DimsVector], resource: &LayerResource) -> Result<Vec<DimsVector>> {
        let first = inputs
            .first()
            .ok_or_else(|| ComputeError::Model(format!("layer {} has no inputs", self.name)))?;
        let dims = match (&self.param, self.layer_type) {
            (LayerParam::Binary(_), lt) if lt.kernel().is_some() => {
                let mut out = first.clone();
                for other in &inputs[1..] {
                    out = dims::broadcast(&out, other)?;
                }
                if inputs.len() == 1 {
                    let constant = resource.element.as_ref().ok_or_else(|| {
                        ComputeError::Model(format!("binary layer {} has one input and no constant", self.name))
                    })?;
                    out = dims::broadcast(&out, constant.dims())?;
                }
                out
            }
            (LayerParam::Reshape(param), LayerType::Reshape) => {
                if param.shape.is_empty() {
                    // Shape comes from a runtime tensor; resolved by the accelerator.
                    first.clone()
                } else {
                    dims::reshape(first, &param.shape, param.axis, param.num_axes)?
                }
            }
            (LayerParam::Cumsum(_), LayerType::Cumsum) => first.clone(),
            (param, layer_type) => {
                return Err(ComputeError::Model(format!(
                    "layer {} of type {layer_type:?} carries mismatched param {param:?}",
                    self.name
                )))
            }
        };
        if dims.is_empty() {
            return Err(ComputeError::Model(format!("layer {} infers a rank-0 output", self.name)));
        }
        Ok(vec![dims; self.outputs.len().max(1)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(layer_type: LayerType, param: LayerParam, inputs: &[&str]) -> LayerInfo {
        LayerInfo {
            name: "l0".into(),
            layer_type,
            param,
            inputs: inputs.iter().map(|s| (*s).to_string()).collect(),
            outputs: vec!["out".into()],
        }
    }

    #[test]
    fn binary_layers_broadcast_inputs_and_constants() {
        let add = layer(LayerType::Add, LayerParam::Binary(BinaryParam::default()), &["a", "b"]);
        let dims = add.infer_output_dims(&[vec![1, 3, 4, 4], vec![1, 3, 1, 1]], &LayerResource::default()).unwrap();
        assert_eq!(dims, vec![vec![1, 3, 4, 4]]);

        let mul = layer(LayerType::Mul, LayerParam::Binary(BinaryParam::default()), &["a"]);
        assert!(mul.infer_output_dims(&[vec![2, 2]], &LayerResource::default()).is_err());
        let resource = LayerResource { element: Some(RawBuffer::from_f32(vec![2], &[1.0, 2.0])) };
        assert_eq!(mul.infer_output_dims(&[vec![2, 2]], &resource).unwrap(), vec![vec![2, 2]]);
    }

    #[test]
    fn reshape_layer_applies_its_shape() {
        let param = ReshapeParam { axis: 0, num_axes: 2, shape: vec![0, -1], reshape_type: 0 };
        let reshape = layer(LayerType::Reshape, LayerParam::Reshape(param), &["x"]);
        let dims = reshape.infer_output_dims(&[vec![2, 3, 4]], &LayerResource::default()).unwrap();
        assert_eq!(dims, vec![vec![2, 12]]);
    }

    #[test]
    fn mismatched_params_are_model_errors() {
        let bad = layer(LayerType::Cumsum, LayerParam::Binary(BinaryParam::default()), &["x"]);
        let err = bad.infer_output_dims(&[vec![4]], &LayerResource::default()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Model);
        assert_eq!("Maximum".parse::<LayerType>().unwrap(), LayerType::Max);
    }
}
