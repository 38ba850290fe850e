use crate::acc::{AccBase, LayerAcc};
use crate::fp16::{f16_to_f32, f32_to_f16};
use crate::layer::CumsumParam;
use crate::{
    dims, Blob, BlobType, ComputeError, DataFormat, DataType, DeviceContext, DeviceType, LayerInfo, LayerParam,
    LayerResource, Result,
};
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::error;

pub struct CpuCumsumAcc {
    base: AccBase,
    param: CumsumParam,
}

impl CpuCumsumAcc {
    #[must_use]
    pub fn new() -> Self {
        Self { base: AccBase::new(DeviceType::Cpu), param: CumsumParam::default() }
    }
}

impl Default for CpuCumsumAcc {
    fn default() -> Self {
        Self::new()
    }
}

/// Scans `dim_curr` elements strided by `dim_post` for every (pre, post) pair.
fn cumsum<T: Copy + Default + AddAssign>(
    input: &[T],
    output: &mut [T],
    (dim_pre, dim_curr, dim_post): (usize, usize, usize),
    exclusive: bool,
    reverse: bool,
) {
    for i in 0..dim_pre {
        for j in 0..dim_post {
            let base = i * dim_curr * dim_post + j;
            let mut acc = T::default();
            for step in 0..dim_curr {
                let k = if reverse { dim_curr - 1 - step } else { step };
                let offset = base + k * dim_post;
                if exclusive {
                    output[offset] = acc;
                    acc += input[offset];
                } else {
                    acc += input[offset];
                    output[offset] = acc;
                }
            }
        }
    }
}

impl LayerAcc for CpuCumsumAcc {
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
        let LayerParam::Cumsum(param) = &layer.param else {
            error!("Error: CpuCumsumLayer forward load layer param failed");
            return Err(ComputeError::Model(format!("layer {} is not a cumsum layer", layer.name)));
        };
        self.param = param.clone();
        self.base.init(context, layer, inputs, outputs)
    }

    fn support_data_type(&self, _dims_size: usize, _blob_type: BlobType) -> Vec<DataType> {
        vec![DataType::Float, DataType::Half, DataType::Int32]
    }

    fn support_data_format(&self, _data_type: DataType, _dims_size: usize, _blob_type: BlobType) -> Vec<DataFormat> {
        vec![DataFormat::Nchw]
    }

    fn forward(&mut self, inputs: &[Blob], outputs: &[Blob]) -> Result<()> {
        let (Some(input), Some(output)) = (inputs.first(), outputs.first()) else {
            return Err(ComputeError::Model(format!("cumsum {} needs an input and an output", self.base.layer_name())));
        };
        let input_dims = &input.desc().dims;
        let rank = input_dims.len() as i32;
        let axis = if self.param.axis < 0 { self.param.axis + rank } else { self.param.axis };
        if axis < 0 || axis >= rank {
            return Err(ComputeError::Model(format!(
                "cumsum {} axis {} out of range for rank {rank}",
                self.base.layer_name(),
                self.param.axis
            )));
        }
        let axis = axis as usize;
        let shape = (
            dims::count_range(input_dims, 0, axis),
            input_dims[axis],
            dims::count_range(input_dims, axis + 1, input_dims.len()),
        );
        let (exclusive, reverse) = (self.param.exclusive, self.param.reverse);

        match input.desc().data_type {
            DataType::Float => {
                let src = input.to_vec::<f32>()?;
                let mut dst = vec![0f32; src.len()];
                cumsum(&src, &mut dst, shape, exclusive, reverse);
                output.write(&dst)
            }
            DataType::Half => {
                let src: Vec<f32> = input.to_vec::<u16>()?.into_iter().map(f16_to_f32).collect();
                let mut dst = vec![0f32; src.len()];
                cumsum(&src, &mut dst, shape, exclusive, reverse);
                let bits: Vec<u16> = dst.into_iter().map(f32_to_f16).collect();
                output.write(&bits)
            }
            DataType::Int32 => {
                let src = input.to_vec::<i32>()?;
                let mut dst = vec![0i32; src.len()];
                cumsum(&src, &mut dst, shape, exclusive, reverse);
                output.write(&dst)
            }
            other => {
                error!("Error: CpuCumsumLayerAcc don't support data type: {other:?}");
                Err(ComputeError::Model(format!("CpuCumsumLayerAcc don't support data type {other:?}")))
            }
        }
    }
}
