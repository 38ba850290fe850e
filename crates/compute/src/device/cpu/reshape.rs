use crate::acc::{AccBase, LayerAcc};
use crate::layer::ReshapeParam;
use crate::{
    dims, Blob, BlobType, ComputeError, DataFormat, DataType, DeviceContext, DeviceType, LayerInfo, LayerParam,
    LayerResource, Result,
};
use std::sync::Arc;
use tracing::error;

pub struct CpuReshapeAcc {
    base: AccBase,
    param: ReshapeParam,
}

impl CpuReshapeAcc {
    #[must_use]
    pub fn new() -> Self {
        Self { base: AccBase::new(DeviceType::Cpu), param: ReshapeParam::default() }
    }

    /// Current target shape, including any placeholders recovered at run time.
    #[must_use]
    pub fn shape(&self) -> &[i64] {
        &self.param.shape
    }
}

impl Default for CpuReshapeAcc {
    fn default() -> Self {
        Self::new()
    }
}

fn shape_tensor(blob: &Blob) -> Result<Vec<i64>> {
    if blob.desc().data_type != DataType::Int32 {
        return Err(ComputeError::param("Reshape input(shape) has invalid data type"));
    }
    Ok(blob.to_vec::<i32>()?.into_iter().map(i64::from).collect())
}

fn copy_into(output: &Blob, bytes: &[u8]) -> Result<()> {
    output.with_bytes_mut(|dst| {
        if dst.len() != bytes.len() {
            return Err(ComputeError::ShapeMismatch("reshape input and output hold different byte counts"));
        }
        dst.copy_from_slice(bytes);
        Ok(())
    })?
}

fn to_i64(dims: &[usize]) -> Vec<i64> {
    dims.iter().map(|&d| d as i64).collect()
}

/// Permutes planar (N, C, H, W) elements into channel-last order.
fn nchw_to_nhwc(src: &[u8], dims: &[usize], elem: usize) -> Vec<u8> {
    let d = dims::to_rank(dims, dims::CANONICAL_RANK);
    let (n, c, h, w) = (d[0], d[1], d[2], d[3]);
    let mut dst = vec![0u8; src.len()];
    for ni in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    let from = (((ni * c + ci) * h + hi) * w + wi) * elem;
                    let to = (((ni * h + hi) * w + wi) * c + ci) * elem;
                    dst[to..to + elem].copy_from_slice(&src[from..from + elem]);
                }
            }
        }
    }
    dst
}

/// Inverse of [`nchw_to_nhwc`] for data laid out channel-last over `dims`.
fn nhwc_to_nchw(src: &[u8], dims: &[usize], elem: usize) -> Vec<u8> {
    let d = dims::to_rank(dims, dims::CANONICAL_RANK);
    let (n, c, h, w) = (d[0], d[1], d[2], d[3]);
    let mut dst = vec![0u8; src.len()];
    for ni in 0..n {
        for hi in 0..h {
            for wi in 0..w {
                for ci in 0..c {
                    let from = (((ni * h + hi) * w + wi) * c + ci) * elem;
                    let to = (((ni * c + ci) * h + hi) * w + wi) * elem;
                    dst[to..to + elem].copy_from_slice(&src[from..from + elem]);
                }
            }
        }
    }
    dst
}

impl LayerAcc for CpuReshapeAcc {
    fn base(&self) -> &AccBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AccBase {
        &mut self.base
    }

    fn init(
        &mut self,
        context: Arc<dyn DeviceContext>,
        layer: &LayerInfo,
        _resource: &LayerResource,
        inputs: &mut [Blob],
        outputs: &mut [Blob],
    ) -> Result<()> {
        let LayerParam::Reshape(param) = &layer.param else {
            return Err(ComputeError::Model(format!("layer {} is not a reshape layer", layer.name)));
        };
        self.param = param.clone();
        self.base.init(context, layer, inputs, outputs)
    }

    fn support_data_type(&self, _dims_size: usize, _blob_type: BlobType) -> Vec<DataType> {
        vec![DataType::Float, DataType::Half, DataType::Int8, DataType::Int32]
    }

    fn support_data_format(&self, _data_type: DataType, _dims_size: usize, _blob_type: BlobType) -> Vec<DataFormat> {
        vec![DataFormat::Nchw]
    }

    fn infer_runtime_output_shape(&mut self, inputs: &[Blob], outputs: &mut [Blob]) -> Result<()> {
        let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) else {
            return Err(ComputeError::Model(format!("reshape {} needs an input and an output", self.base.layer_name())));
        };
        let input_dims = input.desc().dims.clone();

        let runtime_shape = inputs.get(1).map(shape_tensor).transpose()?;
        if let Some(target) = &runtime_shape {
            if self.param.shape.is_empty() {
                self.param.shape.clone_from(target);
            }
            self.param.num_axes = target.len();
            output.desc_mut().dims = dims::reshape(&input_dims, target, self.param.axis, target.len())?;
        }

        // Rewrite the stored shape with 0/-1 placeholders so it follows
        // later changes of the input dims.
        let mut shape = self.param.shape.clone();
        let output_dims = output.desc().dims.clone();
        if shape.len() != output_dims.len() {
            return Ok(());
        }
        for i in 0..output_dims.len().min(input_dims.len()) {
            if output_dims[i] > 0 && input_dims[i] == output_dims[i] && shape[i] != -1 {
                shape[i] = 0;
            }
        }

        if let Some(current) = &runtime_shape {
            if current.len() == shape.len() && *current != shape {
                let differing: Vec<usize> = (0..shape.len())
                    .filter(|&i| current[i] != shape[i] && current[i] != 0 && shape[i] != 0)
                    .collect();
                match differing.as_slice() {
                    [] => {}
                    [index] => {
                        shape = to_i64(&output_dims);
                        shape[*index] = -1;
                        self.param.shape.clone_from(&shape);
                    }
                    many => {
                        return Err(ComputeError::NotSupported(format!(
                            "reshape {}: shape tensor changed in dims {many:?}, cannot tell which one is inferred",
                            self.base.layer_name()
                        )));
                    }
                }
            }
        }

        let non_zero: Vec<usize> = (0..shape.len()).filter(|&i| shape[i] != 0).collect();
        if let [index] = non_zero.as_slice() {
            shape[*index] = -1;
        }

        let matches = dims::reshape(&input_dims, &shape, self.param.axis, shape.len())
            .is_ok_and(|inferred| inferred == output_dims);
        if matches && (inputs.len() == 1 || !self.param.shape.is_empty()) {
            self.param.shape = shape;
        }
        Ok(())
    }

    fn forward(&mut self, inputs: &[Blob], outputs: &[Blob]) -> Result<()> {
        let (Some(input), Some(output)) = (inputs.first(), outputs.first()) else {
            return Err(ComputeError::Model(format!("reshape {} needs an input and an output", self.base.layer_name())));
        };
        match self.param.reshape_type {
            0 => {
                if input.handle().same_memory(output.handle()) {
                    return Ok(());
                }
                let bytes = input.with_bytes(|bytes| bytes.to_vec())?;
                copy_into(output, &bytes)
            }
            1 => {
                let out_desc = output.desc();
                if out_desc.dims.len() > 4 {
                    error!("Error: Unsupported dim size({}) for reshape type(1)", out_desc.dims.len());
                    return Err(ComputeError::Model(format!("reshape {} failed", self.base.layer_name())));
                }
                let elem = out_desc.data_type.checked_byte_size().map_err(|_| {
                    ComputeError::Model(format!("Reshape does not support data type {:?}", out_desc.data_type))
                })?;
                let bytes = input.with_bytes(|bytes| bytes.to_vec())?;
                let nhwc = nchw_to_nhwc(&bytes, &input.desc().dims, elem);
                let nchw = nhwc_to_nchw(&nhwc, &out_desc.dims, elem);
                copy_into(output, &nchw)
            }
            other => {
                error!("Error: Unsupport reshape type({other})");
                Err(ComputeError::Model(format!("reshape {} failed", self.base.layer_name())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_last_permutation_round_trips() {
        let dims = [1, 2, 2, 3];
        let src: Vec<u8> = (0..12).collect();
        let nhwc = nchw_to_nhwc(&src, &dims, 1);
        assert_eq!(&nhwc[..4], &[0, 6, 1, 7]);
        assert_eq!(nhwc_to_nchw(&nhwc, &dims, 1), src);
    }
}
