//! Scoped ownership of native resources.
//!
//! Every guard releases its resource exactly once: explicitly through
//! `release`, which reports the native status, or on drop, which logs it.

use super::driver::{native_call, DeviceBuffer, ModelDesc, ModelSize, NativeResult, NpuDriver};
use compute::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// One device allocation.
pub struct NativeBuffer {
    driver: Arc<dyn NpuDriver>,
    buffer: Option<DeviceBuffer>,
}

impl NativeBuffer {
    pub fn alloc(driver: Arc<dyn NpuDriver>, size: usize) -> NativeResult<Self> {
        let buffer = driver.malloc(size)?;
        debug!(addr = buffer.addr, size, "malloc device buffer");
        Ok(Self { driver, buffer: Some(buffer) })
    }

    /// The allocation, `None` once released.
    #[must_use]
    pub fn buffer(&self) -> Option<&DeviceBuffer> {
        self.buffer.as_ref()
    }

    pub fn release(&mut self) -> NativeResult<()> {
        let Some(buffer) = self.buffer.take() else { return Ok(()) };
        debug!(addr = buffer.addr, "free device buffer");
        self.driver.free(&buffer)
    }
}

impl Drop for NativeBuffer {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(%err, "free device buffer failed");
        }
    }
}

/// Device buffers making up a model's inputs or outputs.
pub struct Dataset {
    driver: Arc<dyn NpuDriver>,
    buffers: Vec<DeviceBuffer>,
}

impl Dataset {
    #[must_use]
    pub fn new(driver: Arc<dyn NpuDriver>) -> Self {
        Self { driver, buffers: Vec::new() }
    }

    /// Allocates a buffer of `size` bytes and appends it.
    pub fn add_buffer(&mut self, size: usize) -> NativeResult<DeviceBuffer> {
        let buffer = self.driver.malloc(size)?;
        debug!(addr = buffer.addr, size, "add buffer to dataset");
        self.buffers.push(buffer.clone());
        Ok(buffer)
    }

    #[must_use]
    pub fn buffers(&self) -> &[DeviceBuffer] {
        &self.buffers
    }

    /// Frees every buffer, continuing past failures.
    pub fn release(&mut self) -> NativeResult<()> {
        let mut first = Ok(());
        for buffer in self.buffers.drain(..) {
            if let Err(err) = self.driver.free(&buffer) {
                warn!(addr = buffer.addr, %err, "free dataset buffer failed");
                first = first.and(Err(err));
            }
        }
        first
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(%err, "destroy dataset failed");
        }
    }
}

/// A model loaded into memory the backend owns.
pub struct LoadedModel {
    driver: Arc<dyn NpuDriver>,
    model_id: Option<u32>,
    desc: Arc<ModelDesc>,
    size: ModelSize,
    // Freed after the model is unloaded.
    mem: NativeBuffer,
    weight: NativeBuffer,
}

impl LoadedModel {
    /// Queries the sizes, allocates both regions and loads the artifact.
    pub fn load(driver: Arc<dyn NpuDriver>, path: &Path) -> Result<Self> {
        let size = driver.query_model_size(path).map_err(native_call("query model size"))?;
        debug!(path = %path.display(), mem_size = size.mem_size, weight_size = size.weight_size, "model size");
        let mem = NativeBuffer::alloc(driver.clone(), size.mem_size).map_err(native_call("malloc model memory"))?;
        let weight =
            NativeBuffer::alloc(driver.clone(), size.weight_size).map_err(native_call("malloc model weight"))?;
        let (Some(mem_buffer), Some(weight_buffer)) = (mem.buffer(), weight.buffer()) else {
            return Err(compute::ComputeError::runtime("model memory released during load"));
        };
        let model_id = driver.load_model(path, mem_buffer, weight_buffer).map_err(native_call("load model"))?;
        let mut model = Self { driver, model_id: Some(model_id), desc: Arc::default(), size, mem, weight };
        model.desc = Arc::new(model.driver.model_desc(model_id).map_err(native_call("get model desc"))?);
        debug!(model_id, inputs = model.desc.inputs.len(), outputs = model.desc.outputs.len(), "model loaded");
        Ok(model)
    }

    /// Native model id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.model_id.unwrap_or_default()
    }

    #[must_use]
    pub fn desc(&self) -> &Arc<ModelDesc> {
        &self.desc
    }

    #[must_use]
    pub fn size(&self) -> ModelSize {
        self.size
    }

    /// Unloads the model, then frees its memory and weight regions.
    pub fn release(&mut self) -> NativeResult<()> {
        let mut first = Ok(());
        if let Some(model_id) = self.model_id.take() {
            debug!(model_id, "unload model");
            if let Err(err) = self.driver.unload_model(model_id) {
                warn!(model_id, %err, "unload model failed");
                first = Err(err);
            }
        }
        first.and(self.mem.release()).and(self.weight.release())
    }
}

impl Drop for LoadedModel {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(%err, "release model failed");
        }
    }
}
