use crate::acc::{AccBase, LayerAcc};
use crate::kernels::binary_op;
use crate::layer::BinaryParam;
use crate::{
    dims, Blob, BlobType, ComputeError, DataFormat, DataType, DeviceContext, DeviceType, Kernel, LayerInfo,
    LayerParam, LayerResource, RawBuffer, Result,
};
use std::sync::Arc;

/// Host element-wise binary layer with numpy-style broadcasting.
pub struct CpuBinaryAcc {
    base: AccBase,
    kernel: Kernel,
    param: BinaryParam,
    /// Resource operand, decoded per forward to the output's element type.
    constant: Option<RawBuffer>,
}

impl CpuBinaryAcc {
    #[must_use]
    pub fn new(kernel: Kernel) -> Self {
        Self { base: AccBase::new(DeviceType::Cpu), kernel, param: BinaryParam::default(), constant: None }
    }
}

/// Maps each output element to the flat index of an operand broadcast into it.
pub(crate) fn broadcast_offsets(out: &[usize], operand: &[usize]) -> Result<Vec<usize>> {
    if operand.len() > out.len() {
        return Err(ComputeError::Param(format!("operand {operand:?} outranks output {out:?}")));
    }
    let pad = out.len() - operand.len();
    let mut strides = vec![0usize; out.len()];
    let mut stride = 1;
    for i in (0..operand.len()).rev() {
        let d = operand[i];
        if d != 1 && d != out[pad + i] {
            return Err(ComputeError::Param(format!("operand {operand:?} cannot broadcast into {out:?}")));
        }
        strides[pad + i] = if d == 1 { 0 } else { stride };
        stride *= d;
    }

    let total = dims::count(out);
    let mut offsets = Vec::with_capacity(total);
    let mut index = vec![0usize; out.len()];
    for _ in 0..total {
        offsets.push(index.iter().zip(&strides).map(|(i, s)| i * s).sum());
        for axis in (0..out.len()).rev() {
            index[axis] += 1;
            if index[axis] < out[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    Ok(offsets)
}

impl LayerAcc for CpuBinaryAcc {
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
        resource: &LayerResource,
        inputs: &mut [Blob],
        outputs: &mut [Blob],
    ) -> Result<()> {
        let LayerParam::Binary(param) = &layer.param else {
            return Err(ComputeError::Model(format!("layer {} is not a binary layer", layer.name)));
        };
        self.param = param.clone();
        self.base.init(context, layer, inputs, outputs)?;
        if inputs.len() == 1 {
            let element = resource.element.as_ref().ok_or_else(|| {
                ComputeError::Model(format!("binary layer {} has one input and no constant", layer.name))
            })?;
            self.constant = Some(element.clone());
        }
        Ok(())
    }

    fn support_data_type(&self, _dims_size: usize, _blob_type: BlobType) -> Vec<DataType> {
        vec![DataType::Float, DataType::Half, DataType::Int32]
    }

    fn support_data_format(&self, _data_type: DataType, _dims_size: usize, _blob_type: BlobType) -> Vec<DataFormat> {
        vec![DataFormat::Nchw]
    }

    fn forward(&mut self, inputs: &[Blob], outputs: &[Blob]) -> Result<()> {
        let output = outputs
            .first()
            .ok_or_else(|| ComputeError::Model(format!("layer {} has no output", self.base.layer_name())))?;
        let out_dims = &output.desc().dims;

        if output.desc().data_type == DataType::Int32 {
            if let Some(blob) = inputs.iter().find(|b| b.desc().data_type != DataType::Int32) {
                return Err(ComputeError::Param(format!(
                    "layer {} mixes int32 output with {:?} input {}",
                    self.base.layer_name(),
                    blob.desc().data_type,
                    blob.name()
                )));
            }
            let operands = self.operands(inputs, Blob::to_vec::<i32>, RawBuffer::to_i32)?;
            let kernel = self.kernel;
            let values = combine(out_dims, operands, |x, y| {
                binary_op::apply_i32(kernel, x, y)
                    .ok_or_else(|| ComputeError::Param(format!("int32 {kernel:?} of {x} by {y} is undefined")))
            })?;
            return output.write(&values);
        }

        let operands = self.operands(inputs, Blob::read_f32, RawBuffer::to_f32)?;
        let values = combine(out_dims, operands, |x, y| Ok(binary_op::apply(self.kernel, x, y)))?;
        output.write_f32(&values)
    }
}

impl CpuBinaryAcc {
    /// Both operands as (dims, values), the resource operand in its slot.
    fn operands<T>(
        &self,
        inputs: &[Blob],
        read: impl Fn(&Blob) -> Result<Vec<T>>,
        decode: impl FnOnce(&RawBuffer) -> Result<Vec<T>>,
    ) -> Result<[(Vec<usize>, Vec<T>); 2]> {
        let mut operands = Vec::with_capacity(2);
        for blob in inputs.iter().take(2) {
            operands.push((blob.desc().dims.clone(), read(blob)?));
        }
        if operands.len() == 1 {
            let constant = self.constant.as_ref().ok_or_else(|| {
                ComputeError::Model(format!("binary layer {} is missing its second operand", self.base.layer_name()))
            })?;
            let slot = self.param.weight_input_index.min(1);
            operands.insert(slot, (constant.dims().to_vec(), decode(constant)?));
        }
        <[_; 2]>::try_from(operands)
            .map_err(|_| ComputeError::Model(format!("layer {} needs two operands", self.base.layer_name())))
    }
}

fn combine<T: Copy>(
    out_dims: &[usize],
    [(a_dims, a), (b_dims, b)]: [(Vec<usize>, Vec<T>); 2],
    op: impl Fn(T, T) -> Result<T>,
) -> Result<Vec<T>> {
    let a_offsets = broadcast_offsets(out_dims, &a_dims)?;
    let b_offsets = broadcast_offsets(out_dims, &b_dims)?;
    a_offsets.iter().zip(&b_offsets).map(|(&ia, &ib)| op(a[ia], b[ib])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_repeat_broadcast_axes() {
        assert_eq!(broadcast_offsets(&[2, 3], &[3]).unwrap(), vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(broadcast_offsets(&[2, 3], &[2, 1]).unwrap(), vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(broadcast_offsets(&[2, 2], &[1]).unwrap(), vec![0; 4]);
        assert!(broadcast_offsets(&[2, 3], &[2]).is_err());
    }
}
