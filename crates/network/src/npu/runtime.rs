//! Process-wide accelerator runtime state, shared by every network on it.

use super::driver::{native_call, ModelDesc, NativeResult, NpuDriver};
use compute::{Blob, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// What other components need to know about the model behind an input blob.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub model_id: u32,
    pub desc: Arc<ModelDesc>,
    /// Device addresses of the model's input dataset.
    pub input_buffers: Vec<u64>,
}

/// Shared handle on the accelerator runtime.
///
/// Native initialization happens when the first [`RuntimeHold`] is taken and
/// native finalization when the last one is released.
pub struct NpuRuntime {
    driver: Arc<dyn NpuDriver>,
    holders: Mutex<usize>,
    model_infos: Mutex<HashMap<usize, ModelInfo>>,
}

impl NpuRuntime {
    #[must_use]
    pub fn new(driver: Arc<dyn NpuDriver>) -> Arc<Self> {
        Arc::new(Self { driver, holders: Mutex::new(0), model_infos: Mutex::new(HashMap::new()) })
    }

    #[must_use]
    pub fn driver(&self) -> &Arc<dyn NpuDriver> {
        &self.driver
    }

    /// Registers one more user of the runtime.
    pub fn acquire(self: &Arc<Self>) -> Result<RuntimeHold> {
        let mut holders = self.holders.lock();
        if *holders == 0 {
            self.driver.init().map_err(native_call("runtime init"))?;
            info!("npu runtime initialized");
        }
        *holders += 1;
        debug!(holders = *holders, "npu runtime acquired");
        Ok(RuntimeHold { runtime: Some(self.clone()) })
    }

    fn release(&self) -> NativeResult<()> {
        let mut holders = self.holders.lock();
        *holders = holders.saturating_sub(1);
        debug!(holders = *holders, "npu runtime released");
        if *holders == 0 {
            self.driver.finalize()?;
            info!("npu runtime finalized");
        }
        Ok(())
    }

    #[must_use]
    pub fn holders(&self) -> usize {
        *self.holders.lock()
    }

    pub fn set_device(&self, device_id: i32) -> Result<()> {
        self.driver.set_device(device_id).map_err(native_call("set device"))
    }

    pub fn add_model_info(&self, blob: &Blob, info: ModelInfo) {
        self.model_infos.lock().insert(blob.handle().id(), info);
    }

    pub fn del_model_info(&self, blob: &Blob) {
        self.model_infos.lock().remove(&blob.handle().id());
    }

    #[must_use]
    pub fn model_info(&self, blob: &Blob) -> Option<ModelInfo> {
        self.model_infos.lock().get(&blob.handle().id()).cloned()
    }

    #[must_use]
    pub fn model_info_count(&self) -> usize {
        self.model_infos.lock().len()
    }
}

/// One user's claim on the runtime; released explicitly or on drop.
pub struct RuntimeHold {
    runtime: Option<Arc<NpuRuntime>>,
}

impl RuntimeHold {
    pub fn release(&mut self) -> Result<()> {
        let Some(runtime) = self.runtime.take() else { return Ok(()) };
        runtime.release().map_err(native_call("runtime finalize"))
    }
}

impl Drop for RuntimeHold {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(%err, "release npu runtime failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npu::SimulatedNpu;

    #[test]
    fn last_hold_finalizes() {
        let driver = Arc::new(SimulatedNpu::new());
        let runtime = NpuRuntime::new(driver.clone());
        let mut first = runtime.acquire().unwrap();
        let second = runtime.acquire().unwrap();
        assert_eq!((driver.init_calls(), runtime.holders()), (1, 2));

        first.release().unwrap();
        first.release().unwrap();
        assert_eq!((driver.finalize_calls(), runtime.holders()), (0, 1));
        drop(second);
        assert_eq!((driver.finalize_calls(), runtime.holders()), (1, 0));

        let _again = runtime.acquire().unwrap();
        assert_eq!(driver.init_calls(), 2);
    }

    #[test]
    fn model_infos_are_keyed_by_blob_memory() {
        let runtime = NpuRuntime::new(Arc::new(SimulatedNpu::new()));
        let desc = compute::BlobDesc::new(compute::DeviceType::Npu, compute::DataType::Float, compute::DataFormat::Nchw, vec![1], "x");
        let blob = Blob::alloc(desc).unwrap();
        let info = ModelInfo { model_id: 3, desc: Arc::default(), input_buffers: vec![16] };
        runtime.add_model_info(&blob, info);
        assert_eq!(runtime.model_info(&blob.clone()).map(|i| i.model_id), Some(3));
        runtime.del_model_info(&blob);
        assert_eq!(runtime.model_info_count(), 0);
    }
}
