//! Host-side stand-in for the accelerator runtime.
//!
//! Models are JSON manifests describing the declared inputs and outputs.
//! Execution writes, for every batch, the mean of the first regular input
//! into every element of every output. Faults can be injected per call and
//! counters expose what is still alive.

use super::driver::{
    ContextHandle, DeviceBuffer, ModelDesc, ModelSize, NativeError, NativeResult, NpuDriver, StreamHandle,
    INVALID_PARAM,
};
use super::{DYNAMIC_AIPP_NAME, DYNAMIC_BATCH_NAME};
use crate::npu::driver::{IoDesc, NativeDataType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub const BAD_ALLOC: i32 = 200_000;
pub const INVALID_FILE: i32 = 100_002;
pub const INTERNAL_ERROR: i32 = 500_000;

/// Artifact format understood by [`SimulatedNpu`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelManifest {
    #[serde(default)]
    pub mem_size: usize,
    #[serde(default)]
    pub weight_size: usize,
    #[serde(flatten)]
    pub desc: ModelDesc,
}

impl ModelManifest {
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Batch the model runs at until a dynamic batch is selected.
    fn default_batch(&self) -> usize {
        let first = self.desc.inputs.iter().find(|io| !is_marker(&io.name)).and_then(|io| io.dims.first());
        match first {
            Some(&d) if d > 0 => d as usize,
            _ => self.max_batch(),
        }
    }

    fn max_batch(&self) -> usize {
        self.desc.dynamic_batch.iter().copied().max().unwrap_or(1)
    }

    /// Fills in sizes left at zero from the dims at the largest batch.
    fn with_sizes(mut self) -> Self {
        let batch = self.max_batch() as i64;
        for io in self.desc.inputs.iter_mut().chain(self.desc.outputs.iter_mut()) {
            if io.size == 0 {
                io.size = io_size(io, batch);
            }
        }
        self
    }
}

fn is_marker(name: &str) -> bool {
    name.contains(DYNAMIC_AIPP_NAME) || name.contains(DYNAMIC_BATCH_NAME)
}

fn io_size(io: &IoDesc, batch: i64) -> usize {
    let count: i64 = io.dims.iter().enumerate().map(|(i, &d)| if i == 0 && d < 0 { batch } else { d.max(1) }).product();
    count as usize * io.data_type.size()
}

/// Elements per batch of a tensor.
fn batch_stride(io: &IoDesc) -> usize {
    io.dims.iter().skip(1).map(|&d| d.max(1) as usize).product()
}

/// Calls that can be made to fail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// Fails the n-th allocation, counting from 1.
    pub fail_alloc_at: Option<usize>,
    pub create_context: bool,
    pub create_stream: bool,
    pub set_current_context: bool,
    pub load_model: bool,
    pub execute: bool,
    pub destroy_stream: bool,
}

struct LoadedSim {
    manifest: ModelManifest,
    batch: usize,
}

#[derive(Default)]
struct SimState {
    next_handle: u64,
    faults: Faults,
    initialized: bool,
    init_calls: usize,
    finalize_calls: usize,
    alloc_calls: usize,
    executions: usize,
    contexts: HashSet<u64>,
    streams: HashSet<u64>,
    allocations: HashMap<u64, usize>,
    manifests: HashMap<PathBuf, ModelManifest>,
    models: HashMap<u32, LoadedSim>,
}

impl SimState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 0x100;
        self.next_handle
    }
}

#[derive(Default)]
pub struct SimulatedNpu {
    state: Mutex<SimState>,
}

impl SimulatedNpu {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `manifest` loadable from `path` without touching the filesystem.
    pub fn register_model(&self, path: impl Into<PathBuf>, manifest: ModelManifest) {
        self.state.lock().manifests.insert(path.into(), manifest.with_sizes());
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state.lock().faults = faults;
    }

    #[must_use]
    pub fn init_calls(&self) -> usize {
        self.state.lock().init_calls
    }

    #[must_use]
    pub fn finalize_calls(&self) -> usize {
        self.state.lock().finalize_calls
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    #[must_use]
    pub fn live_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    #[must_use]
    pub fn live_streams(&self) -> usize {
        self.state.lock().streams.len()
    }

    #[must_use]
    pub fn loaded_models(&self) -> usize {
        self.state.lock().models.len()
    }

    #[must_use]
    pub fn executions(&self) -> usize {
        self.state.lock().executions
    }

    fn manifest(state: &mut SimState, path: &Path) -> NativeResult<ModelManifest> {
        if let Some(manifest) = state.manifests.get(path) {
            return Ok(manifest.clone());
        }
        let json = std::fs::read_to_string(path).map_err(|_| NativeError(INVALID_FILE))?;
        let manifest = ModelManifest::from_json(&json).map_err(|_| NativeError(INVALID_FILE))?.with_sizes();
        state.manifests.insert(path.to_path_buf(), manifest.clone());
        Ok(manifest)
    }
}

fn fail_if(fault: bool) -> NativeResult<()> {
    if fault {
        Err(NativeError(INTERNAL_ERROR))
    } else {
        Ok(())
    }
}

fn read_f32(buffer: &DeviceBuffer, io: &IoDesc, count: usize) -> NativeResult<Vec<f32>> {
    let memory = buffer.memory.read();
    match io.data_type {
        NativeDataType::Float if memory.len() >= count * 4 => {
            Ok(bytemuck::pod_collect_to_vec::<u8, f32>(&memory[..count * 4]))
        }
        NativeDataType::Uint8 if memory.len() >= count => Ok(memory[..count].iter().map(|&v| f32::from(v)).collect()),
        _ => Err(NativeError(INVALID_PARAM)),
    }
}

impl NpuDriver for SimulatedNpu {
    fn init(&self) -> NativeResult<()> {
        let mut state = self.state.lock();
        state.init_calls += 1;
        state.initialized = true;
        Ok(())
    }

    fn finalize(&self) -> NativeResult<()> {
        let mut state = self.state.lock();
        state.finalize_calls += 1;
        state.initialized = false;
        Ok(())
    }

    fn set_device(&self, device_id: i32) -> NativeResult<()> {
        if device_id < 0 {
            return Err(NativeError(INVALID_PARAM));
        }
        Ok(())
    }

    fn create_context(&self, _device_id: i32) -> NativeResult<ContextHandle> {
        let mut state = self.state.lock();
        fail_if(state.faults.create_context)?;
        let handle = state.handle();
        state.contexts.insert(handle);
        Ok(ContextHandle(handle))
    }

    fn destroy_context(&self, context: ContextHandle) -> NativeResult<()> {
        if self.state.lock().contexts.remove(&context.0) {
            Ok(())
        } else {
            Err(NativeError(INVALID_PARAM))
        }
    }

    fn set_current_context(&self, context: ContextHandle) -> NativeResult<()> {
        let state = self.state.lock();
        fail_if(state.faults.set_current_context)?;
        if state.contexts.contains(&context.0) {
            Ok(())
        } else {
            Err(NativeError(INVALID_PARAM))
        }
    }

    fn create_stream(&self) -> NativeResult<StreamHandle> {
        let mut state = self.state.lock();
        fail_if(state.faults.create_stream)?;
        let handle = state.handle();
        state.streams.insert(handle);
        Ok(StreamHandle(handle))
    }

    fn destroy_stream(&self, stream: StreamHandle) -> NativeResult<()> {
        let mut state = self.state.lock();
        // The stream is gone even when the call reports a failure.
        let known = state.streams.remove(&stream.0);
        fail_if(state.faults.destroy_stream)?;
        if known {
            Ok(())
        } else {
            Err(NativeError(INVALID_PARAM))
        }
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> NativeResult<()> {
        if self.state.lock().streams.contains(&stream.0) {
            Ok(())
        } else {
            Err(NativeError(INVALID_PARAM))
        }
    }

    fn malloc(&self, size: usize) -> NativeResult<DeviceBuffer> {
        let mut state = self.state.lock();
        state.alloc_calls += 1;
        if state.faults.fail_alloc_at == Some(state.alloc_calls) {
            return Err(NativeError(BAD_ALLOC));
        }
        let addr = state.handle();
        state.allocations.insert(addr, size);
        Ok(DeviceBuffer::new(addr, size))
    }

    fn free(&self, buffer: &DeviceBuffer) -> NativeResult<()> {
        match self.state.lock().allocations.remove(&buffer.addr) {
            Some(_) => Ok(()),
            None => Err(NativeError(INVALID_PARAM)),
        }
    }

    fn query_model_size(&self, path: &Path) -> NativeResult<ModelSize> {
        let manifest = Self::manifest(&mut self.state.lock(), path)?;
        Ok(ModelSize { mem_size: manifest.mem_size, weight_size: manifest.weight_size })
    }

    fn load_model(&self, path: &Path, mem: &DeviceBuffer, weight: &DeviceBuffer) -> NativeResult<u32> {
        let mut state = self.state.lock();
        fail_if(state.faults.load_model)?;
        let manifest = Self::manifest(&mut state, path)?;
        if mem.size < manifest.mem_size || weight.size < manifest.weight_size {
            return Err(NativeError(INVALID_PARAM));
        }
        let model_id = (1..).find(|id| !state.models.contains_key(id)).unwrap_or_default();
        let batch = manifest.default_batch();
        state.models.insert(model_id, LoadedSim { manifest, batch });
        Ok(model_id)
    }

    fn unload_model(&self, model_id: u32) -> NativeResult<()> {
        match self.state.lock().models.remove(&model_id) {
            Some(_) => Ok(()),
            None => Err(NativeError(INVALID_PARAM)),
        }
    }

    fn model_desc(&self, model_id: u32) -> NativeResult<ModelDesc> {
        let state = self.state.lock();
        let model = state.models.get(&model_id).ok_or(NativeError(INVALID_PARAM))?;
        Ok(model.manifest.desc.clone())
    }

    fn set_dynamic_batch_size(
        &self,
        model_id: u32,
        inputs: &[DeviceBuffer],
        index: usize,
        batch: usize,
    ) -> NativeResult<()> {
        let mut state = self.state.lock();
        let model = state.models.get_mut(&model_id).ok_or(NativeError(INVALID_PARAM))?;
        let desc = &model.manifest.desc;
        let is_control = desc.inputs.get(index).is_some_and(|io| io.name.contains(DYNAMIC_BATCH_NAME));
        if !is_control || index >= inputs.len() || !desc.dynamic_batch.contains(&batch) {
            return Err(NativeError(INVALID_PARAM));
        }
        model.batch = batch;
        Ok(())
    }

    fn execute(&self, model_id: u32, inputs: &[DeviceBuffer], outputs: &[DeviceBuffer]) -> NativeResult<()> {
        let mut state = self.state.lock();
        fail_if(state.faults.execute)?;
        let model = state.models.get(&model_id).ok_or(NativeError(INVALID_PARAM))?;
        let desc = &model.manifest.desc;
        if inputs.len() != desc.inputs.len() || outputs.len() != desc.outputs.len() {
            return Err(NativeError(INVALID_PARAM));
        }
        let batch = model.batch;

        let means: Vec<f32> = match desc.inputs.iter().position(|io| !is_marker(&io.name)) {
            Some(i) => {
                let stride = batch_stride(&desc.inputs[i]);
                let values = read_f32(&inputs[i], &desc.inputs[i], stride * batch)?;
                values.chunks(stride.max(1)).map(|c| c.iter().sum::<f32>() / c.len() as f32).collect()
            }
            None => vec![0.0; batch],
        };

        for (io, buffer) in desc.outputs.iter().zip(outputs) {
            if io.data_type != NativeDataType::Float {
                return Err(NativeError(INVALID_PARAM));
            }
            let stride = batch_stride(io);
            let values: Vec<f32> = means.iter().flat_map(|&m| std::iter::repeat(m).take(stride)).collect();
            let bytes: &[u8] = bytemuck::cast_slice(&values);
            let mut memory = buffer.memory.write();
            if memory.len() < bytes.len() {
                return Err(NativeError(INVALID_PARAM));
            }
            memory[..bytes.len()].copy_from_slice(bytes);
        }
        state.executions += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "mem_size": 64,
        "weight_size": 32,
        "inputs": [{"name": "x", "dims": [-1, 2], "data_type": "float"}],
        "outputs": [{"name": "y", "dims": [-1, 3], "data_type": "float"}],
        "dynamic_batch": [1, 2]
    }"#;

    #[test]
    fn manifest_sizes_follow_the_largest_batch() {
        let manifest = ModelManifest::from_json(MANIFEST).unwrap().with_sizes();
        assert_eq!(manifest.desc.inputs[0].size, 2 * 2 * 4);
        assert_eq!(manifest.desc.outputs[0].size, 2 * 3 * 4);
        assert_eq!(manifest.default_batch(), 2);
    }

    #[test]
    fn execute_writes_per_batch_means() {
        let npu = SimulatedNpu::new();
        npu.register_model("m", ModelManifest::from_json(MANIFEST).unwrap());
        let mem = npu.malloc(64).unwrap();
        let weight = npu.malloc(32).unwrap();
        let id = npu.load_model(Path::new("m"), &mem, &weight).unwrap();
        let input = npu.malloc(16).unwrap();
        let output = npu.malloc(24).unwrap();
        input.memory.write().copy_from_slice(bytemuck::cast_slice(&[1.0f32, 3.0, 10.0, 20.0]));

        npu.execute(id, &[input.clone()], &[output.clone()]).unwrap();
        let out = bytemuck::pod_collect_to_vec::<u8, f32>(&output.memory.read());
        assert_eq!(out, vec![2.0, 2.0, 2.0, 15.0, 15.0, 15.0]);
        assert_eq!(npu.executions(), 1);
        assert_eq!(npu.live_allocations(), 4);
    }

    #[test]
    fn nth_allocation_fails() {
        let npu = SimulatedNpu::new();
        npu.set_faults(Faults { fail_alloc_at: Some(2), ..Faults::default() });
        assert!(npu.malloc(4).is_ok());
        assert_eq!(npu.malloc(4).unwrap_err(), NativeError(BAD_ALLOC));
        assert!(npu.malloc(4).is_ok());
        assert_eq!(npu.live_allocations(), 2);
    }
}
