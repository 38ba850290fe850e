use crate::acc::{AccBase, LayerAcc};
use crate::kernels::BinaryConfig;
use crate::layer::BinaryParam;
use crate::{
    Blob, BlobDesc, BlobType, BufferView, CommandQueue, ComputeBackend, ComputeError, DataFormat, DataType,
    DeviceContext, DeviceType, Kernel, LayerInfo, LayerParam, LayerResource, Result,
};
use std::sync::Arc;
use tracing::debug;

const WORKGROUP_SIZE: u32 = 64;

/// Binary layer dispatched as a shader kernel.
pub struct ShaderBinaryAcc {
    base: AccBase,
    kernel: Kernel,
    param: BinaryParam,
    queue: Option<Arc<dyn ComputeBackend>>,
    constant: Option<Blob>,
}

impl ShaderBinaryAcc {
    #[must_use]
    pub fn new(kernel: Kernel, device_type: DeviceType) -> Self {
        Self {
            base: AccBase::new(device_type).with_precision_tuning().without_int32_constants(),
            kernel,
            param: BinaryParam::default(),
            queue: None,
            constant: None,
        }
    }

    fn queue(&self) -> Result<&Arc<dyn ComputeBackend>> {
        self.queue
            .as_ref()
            .ok_or_else(|| ComputeError::NullParam(format!("layer {} used before init", self.base.layer_name())))
    }
}

/// Resolves the kernel queue behind a shader-capable context.
fn dispatch_queue(context: &dyn DeviceContext) -> Result<Arc<dyn ComputeBackend>> {
    match context.command_queue()? {
        CommandQueue::Shader(backend) => Ok(backend),
        #[cfg(feature = "gpu")]
        CommandQueue::Gpu(gpu) => Ok(Arc::new(crate::WgpuBackend::from_queue(gpu))),
        other => Err(ComputeError::NullParam(format!("{other:?} cannot dispatch shader kernels"))),
    }
}

impl LayerAcc for ShaderBinaryAcc {
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
        debug!("Init {:?} Acc", self.kernel);
        let LayerParam::Binary(param) = &layer.param else {
            return Err(ComputeError::Model(format!("layer {} is not a binary layer", layer.name)));
        };
        self.param = param.clone();
        self.base.init(context.clone(), layer, inputs, outputs)?;
        self.queue = Some(dispatch_queue(context.as_ref())?);

        if inputs.len() == 1 {
            let element = resource.element.as_ref().ok_or_else(|| {
                ComputeError::Model(format!("binary layer {} has one input and no constant", layer.name))
            })?;
            let data_type = outputs.first().map_or(DataType::Float, |out| out.desc().data_type);
            let desc = BlobDesc::new(
                self.base.device_type(),
                data_type,
                DataFormat::Nchw,
                element.dims().to_vec(),
                format!("{}_element", layer.name),
            );
            let constant = Blob::alloc(desc)?;
            constant.write_f32(&element.to_f32()?)?;
            self.constant = Some(constant);
        }
        Ok(())
    }

    fn support_data_type(&self, _dims_size: usize, _blob_type: BlobType) -> Vec<DataType> {
        vec![DataType::Float, DataType::Half]
    }

    fn support_data_format(&self, _data_type: DataType, _dims_size: usize, _blob_type: BlobType) -> Vec<DataFormat> {
        vec![DataFormat::Nchw]
    }

    fn forward(&mut self, inputs: &[Blob], outputs: &[Blob]) -> Result<()> {
        let output = outputs
            .first()
            .ok_or_else(|| ComputeError::Model(format!("layer {} has no output", self.base.layer_name())))?;
        let mut operands: Vec<&Blob> = inputs.iter().take(2).collect();
        if operands.len() == 1 {
            let constant = self.constant.as_ref().ok_or_else(|| {
                ComputeError::Model(format!("binary layer {} is missing its second operand", self.base.layer_name()))
            })?;
            operands.insert(self.param.weight_input_index.min(1), constant);
        }
        let &[a, b] = operands.as_slice() else {
            return Err(ComputeError::Model(format!("layer {} needs two operands", self.base.layer_name())));
        };

        let data_type = output.desc().data_type;
        if a.desc().data_type != data_type || b.desc().data_type != data_type {
            return Err(ComputeError::Param(format!(
                "layer {} mixes {:?} and {:?} operands into a {data_type:?} output",
                self.base.layer_name(),
                a.desc().data_type,
                b.desc().data_type
            )));
        }
        let queue = self.queue()?;
        let half = data_type == DataType::Half;
        if half && !queue.supports_half() {
            return Err(ComputeError::DeviceNotSupported(format!("{} queue has no half kernels", queue.name())));
        }

        let out_dims = &output.desc().dims;
        let cfg = BinaryConfig::for_shapes(out_dims, &a.desc().dims, &b.desc().dims, half)?;
        let out_bytes = output.desc().byte_size()?;
        let binds = [
            BufferView::from_blob(a)?,
            BufferView::from_blob(b)?,
            BufferView::new(vec![0u8; out_bytes].into(), out_dims.clone(), data_type.checked_byte_size()?),
            BufferView::new(bytemuck::bytes_of(&cfg).to_vec().into(), vec![8], std::mem::size_of::<u32>()),
        ];
        let workgroups = [cfg.len.div_ceil(WORKGROUP_SIZE).max(1), 1, 1];

        let results = queue.dispatch(&self.kernel, &binds, workgroups)?;
        let result = results
            .first()
            .ok_or_else(|| ComputeError::runtime(format!("{} queue returned no output", queue.name())))?;
        output.with_bytes_mut(|dst| {
            if dst.len() != result.len() {
                return Err(ComputeError::ShapeMismatch("kernel output size differs from the output blob"));
            }
            dst.copy_from_slice(result);
            Ok(())
        })?
    }
}
