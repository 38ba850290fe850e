//! Layer accelerator contract.
//!
//! One [`LayerAcc`] executes one graph operation on one device. The lifecycle
//! is `init -> (reshape -> forward)*`; `reshape` must run before the first
//! `forward` and after every shape change. Shared behavior (context binding,
//! precision tuning, type/format negotiation and the constant-blob cache)
//! lives in [`AccBase`].

use crate::{
    Blob, BlobDesc, BlobType, ComputeError, ConstantBlobMap, ConstantResource, ConstantResourceFlag,
    DataFlag, DataFormat, DataType, DeviceContext, DeviceType, DimsVector, LayerInfo, LayerResource,
    Precision, RawBuffer, Result,
};
use std::sync::Arc;
use tracing::{debug, error};

pub trait LayerAcc: Send {
    fn base(&self) -> &AccBase;

    fn base_mut(&mut self) -> &mut AccBase;

    fn init(
        &mut self,
        context: Arc<dyn DeviceContext>,
        layer: &LayerInfo,
        _resource: &LayerResource,
        inputs: &mut [Blob],
        outputs: &mut [Blob],
    ) -> Result<()> {
        self.base_mut().init(context, layer, inputs, outputs)
    }

    /// Data types the accelerator accepts, most preferred first.
    fn support_data_type(&self, dims_size: usize, blob_type: BlobType) -> Vec<DataType>;

    /// Data formats the accelerator accepts for `data_type`, most preferred first.
    fn support_data_format(&self, data_type: DataType, dims_size: usize, blob_type: BlobType) -> Vec<DataFormat>;

    fn reshape(&mut self, inputs: &mut [Blob], outputs: &mut [Blob]) -> Result<()> {
        check_blobs(self, inputs, outputs)
    }

    /// Adjusts output dims from input values known only at run time.
    fn infer_runtime_output_shape(&mut self, _inputs: &[Blob], _outputs: &mut [Blob]) -> Result<()> {
        Ok(())
    }

    fn forward(&mut self, inputs: &[Blob], outputs: &[Blob]) -> Result<()>;

    fn set_constant_resource(
        &mut self,
        resource: Arc<ConstantResource>,
        flag: Option<Arc<ConstantResourceFlag>>,
    ) {
        self.base_mut().set_constant_resource(resource, flag);
    }

    fn reload_constant_blobs(&mut self, inputs: &mut [Blob], only_reload_shape_differ_blob: bool) -> Result<()> {
        self.base_mut().reload_constant_blobs(inputs, only_reload_shape_differ_blob)
    }

    fn device_type(&self) -> DeviceType {
        self.base().device_type()
    }
}

/// State every accelerator carries.
pub struct AccBase {
    device_type: DeviceType,
    tunes_precision: bool,
    hosts_int32: bool,
    layer_name: String,
    context: Option<Arc<dyn DeviceContext>>,
    input_dims: DimsVector,
    output_dims: DimsVector,
    const_resource: Option<Arc<ConstantResource>>,
    const_resource_flag: Option<Arc<ConstantResourceFlag>>,
    const_blob_map: ConstantBlobMap,
}

impl AccBase {
    #[must_use]
    pub fn new(device_type: DeviceType) -> Self {
        Self {
            device_type,
            tunes_precision: false,
            hosts_int32: true,
            layer_name: String::new(),
            context: None,
            input_dims: Vec::new(),
            output_dims: Vec::new(),
            const_resource: None,
            const_resource_flag: None,
            const_blob_map: ConstantBlobMap::new(),
        }
    }

    /// Floating-point blobs follow the context precision.
    #[must_use]
    pub fn with_precision_tuning(mut self) -> Self {
        self.tunes_precision = true;
        self
    }

    /// The device keeps int32 constants on the host only.
    #[must_use]
    pub fn without_int32_constants(mut self) -> Self {
        self.hosts_int32 = false;
        self
    }

    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    #[must_use]
    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    #[must_use]
    pub fn input_dims(&self) -> &[usize] {
        &self.input_dims
    }

    #[must_use]
    pub fn output_dims(&self) -> &[usize] {
        &self.output_dims
    }

    pub fn context(&self) -> Result<&Arc<dyn DeviceContext>> {
        self.context
            .as_ref()
            .ok_or_else(|| ComputeError::NullParam(format!("layer {} used before init", self.layer_name)))
    }

    fn precision(&self) -> Precision {
        self.context.as_ref().map_or(Precision::High, |ctx| ctx.precision())
    }

    /// Binds the context, tunes precision, caches dims and reloads constants.
    pub fn init(
        &mut self,
        context: Arc<dyn DeviceContext>,
        layer: &LayerInfo,
        inputs: &mut [Blob],
        outputs: &mut [Blob],
    ) -> Result<()> {
        if context.device_type() != self.device_type {
            return Err(ComputeError::NullParam(format!(
                "layer {} needs a {} context, got {}",
                layer.name,
                self.device_type,
                context.device_type()
            )));
        }
        self.layer_name.clone_from(&layer.name);
        self.context = Some(context);

        if self.tunes_precision {
            let precision = self.precision();
            debug!(layer = %self.layer_name, ?precision, "tuning blob precision");
            tune_precision(precision, inputs);
            tune_precision(precision, outputs);
        }

        let (Some(input), Some(output)) = (inputs.first(), outputs.first()) else {
            return Err(ComputeError::Model(format!("layer {} needs at least one input and output", layer.name)));
        };
        self.input_dims.clone_from(&input.desc().dims);
        self.output_dims.clone_from(&output.desc().dims);

        self.reload_constant_blobs(inputs, false)
    }

    pub fn set_constant_resource(&mut self, resource: Arc<ConstantResource>, flag: Option<Arc<ConstantResourceFlag>>) {
        self.const_resource = Some(resource);
        self.const_resource_flag = flag;
    }

    #[must_use]
    pub fn constant_blob(&self, name: &str) -> Option<&Blob> {
        self.const_blob_map.get(name)
    }

    /// Points every constant input at a device-resident converted copy.
    ///
    /// With `only_reload_shape_differ_blob`, constants outside the
    /// shape-dependent set are left alone and those inside it are converted
    /// again; otherwise a cached copy is reused when present.
    pub fn reload_constant_blobs(&mut self, inputs: &mut [Blob], only_reload_shape_differ_blob: bool) -> Result<()> {
        let Some(resource) = self.const_resource.clone() else {
            return Ok(());
        };
        for blob in inputs.iter_mut() {
            let name = blob.name().to_string();
            let Some(buffer) = resource.get(&name) else {
                continue;
            };
            if only_reload_shape_differ_blob {
                if let Some(flag) = &self.const_resource_flag {
                    if !flag.contains(&name) {
                        continue;
                    }
                }
            }
            if buffer.data_type() == DataType::Int32 && !self.hosts_int32 {
                continue;
            }

            let cached = if only_reload_shape_differ_blob { None } else { self.const_blob_map.get(&name).cloned() };
            let constant = match cached {
                Some(constant) => constant,
                None => {
                    let constant = self.convert_constant(&name, buffer)?;
                    self.const_blob_map.insert(name.clone(), constant.clone());
                    constant
                }
            };
            blob.set_handle(constant.handle().clone());
            blob.set_desc(constant.desc().clone());
            blob.set_flag(DataFlag::ChangeNever);
            debug!(layer = %self.layer_name, blob = %name, "Reload constant blob");
        }
        Ok(())
    }

    fn convert_constant(&self, name: &str, buffer: &RawBuffer) -> Result<Blob> {
        let data_type = match buffer.data_type() {
            dt if dt.is_tunable() && self.tunes_precision => precision_type(self.precision()),
            dt => dt,
        };
        let desc = BlobDesc::new(self.device_type, data_type, DataFormat::Nchw, buffer.dims().to_vec(), name);
        let mut blob = Blob::alloc(desc)?;
        if data_type == buffer.data_type() {
            blob.with_bytes_mut(|bytes| bytes.copy_from_slice(buffer.bytes()))?;
        } else {
            blob.write_f32(&buffer.to_f32()?)?;
        }
        blob.set_flag(DataFlag::ChangeNever);
        Ok(blob)
    }
}

fn precision_type(precision: Precision) -> DataType {
    if precision == Precision::High {
        DataType::Float
    } else {
        DataType::Half
    }
}

/// Sets tunable blobs to half precision unless `precision` is high.
pub fn tune_precision(precision: Precision, blobs: &mut [Blob]) {
    let target = precision_type(precision);
    for blob in blobs {
        if blob.desc().data_type.is_tunable() {
            blob.desc_mut().data_type = target;
        }
    }
}

/// Resolves every blob's format and type against the accelerator's support
/// lists, outputs first.
pub fn check_blobs<A: LayerAcc + ?Sized>(acc: &A, inputs: &mut [Blob], outputs: &mut [Blob]) -> Result<()> {
    let layer = acc.base().layer_name().to_string();
    for (blobs, blob_type) in [(outputs, BlobType::Output), (inputs, BlobType::Input)] {
        let side = match blob_type {
            BlobType::Input => "Input",
            BlobType::Output => "Output",
        };
        for blob in blobs.iter_mut() {
            let desc = blob.desc_mut();
            resolve_blob_data_format(acc, desc, blob_type).inspect_err(|_| {
                error!("Resolve Layer({layer})-{side} Blob({}) Data Format({:?}) failed", desc.name, desc.data_format);
            })?;
            resolve_blob_data_type(acc, desc, blob_type).inspect_err(|_| {
                error!("Resolve Layer({layer})-{side} Blob({}) Data Type({:?}) failed", desc.name, desc.data_type);
            })?;
        }
    }
    Ok(())
}

pub fn resolve_blob_data_type<A: LayerAcc + ?Sized>(acc: &A, desc: &mut BlobDesc, blob_type: BlobType) -> Result<()> {
    let support_list = acc.support_data_type(desc.dims.len(), blob_type);
    resolve(&support_list, &mut desc.data_type, DataType::Auto, "data type", acc.device_type())
}

pub fn resolve_blob_data_format<A: LayerAcc + ?Sized>(acc: &A, desc: &mut BlobDesc, blob_type: BlobType) -> Result<()> {
    let support_list = acc.support_data_format(desc.data_type, desc.dims.len(), blob_type);
    resolve(&support_list, &mut desc.data_format, DataFormat::Auto, "data format", acc.device_type())
}

fn resolve<T: Copy + PartialEq + std::fmt::Debug>(
    support_list: &[T],
    value: &mut T,
    auto: T,
    what: &str,
    device: DeviceType,
) -> Result<()> {
    let Some(&first) = support_list.first() else {
        return Err(ComputeError::DeviceNotSupported(format!("no supported {what} for {device} acc")));
    };
    if support_list.contains(value) {
        return Ok(());
    }
    if *value == auto {
        *value = first;
        return Ok(());
    }
    Err(ComputeError::DeviceNotSupported(format!(
        "{what} {value:?} is not supported by {device} acc (supports {support_list:?})"
    )))
}
