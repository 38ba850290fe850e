use super::context::NpuContext;
use super::driver::{native_call, IoDesc, ModelDesc, NpuDriver};
use super::guard::{Dataset, LoadedModel};
use super::runtime::{ModelInfo, NpuRuntime, RuntimeHold};
use super::{DYNAMIC_AIPP_NAME, DYNAMIC_BATCH_NAME};
use crate::backend::{NetworkBackend, NetworkState};
use crate::config::{InputShapesMap, ModelConfig, ModelType, NetworkConfig};
use compute::dims::{self, DimsVector};
use compute::{
    Blob, BlobDesc, BlobHandle, BlobMap, CommandQueue, ComputeError, DeviceContext, DeviceType, HostBuffer, Result,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything a successful load produces; dropping it releases the lot.
struct Loaded {
    input_blobs: BlobMap,
    output_blobs: BlobMap,
    dynamic_batch_names: Vec<String>,
    input: Dataset,
    output: Dataset,
    model: LoadedModel,
}

/// Network running one pre-compiled model on the accelerator runtime.
pub struct NpuNetwork {
    runtime: Arc<NpuRuntime>,
    state: NetworkState,
    input_blobs: BlobMap,
    output_blobs: BlobMap,
    dynamic_batch_names: Vec<String>,
    // Field order is release order.
    input: Option<Dataset>,
    output: Option<Dataset>,
    model: Option<LoadedModel>,
    context: NpuContext,
    hold: Option<RuntimeHold>,
}

impl NpuNetwork {
    #[must_use]
    pub fn new(runtime: Arc<NpuRuntime>) -> Self {
        Self {
            context: NpuContext::new(runtime.clone()),
            runtime,
            state: NetworkState::Uninitialized,
            input_blobs: BlobMap::new(),
            output_blobs: BlobMap::new(),
            dynamic_batch_names: Vec::new(),
            input: None,
            output: None,
            model: None,
            hold: None,
        }
    }

    #[must_use]
    pub fn context(&self) -> &NpuContext {
        &self.context
    }

    /// Native id of the loaded model.
    #[must_use]
    pub fn model_id(&self) -> Option<u32> {
        self.model.as_ref().map(LoadedModel::id)
    }

    fn load(&self, path: &std::path::Path) -> Result<Loaded> {
        let driver = self.runtime.driver().clone();
        let model = LoadedModel::load(driver.clone(), path)?;
        let (input, input_blobs, dynamic_batch_names) = allocate_dataset(&driver, model.desc(), true)?;
        let (output, output_blobs, _) = allocate_dataset(&driver, model.desc(), false)?;
        Ok(Loaded { input_blobs, output_blobs, dynamic_batch_names, input, output, model })
    }

    fn require_ready(&self, call: &str) -> Result<()> {
        if !self.state.is_ready() {
            return Err(ComputeError::Param(format!("{call} on a network in state {:?}", self.state)));
        }
        Ok(())
    }

    fn execute(&self) -> Result<()> {
        let (model, input, output) = self.loaded()?;
        let model_id = model.id();
        self.runtime.driver().execute(model_id, input.buffers(), output.buffers()).map_err(|err| {
            error!(model_id, code = err.0, "execute model failed");
            ComputeError::native(format!("execute model failed, modelId is {model_id}"), err.0)
        })
    }

    fn loaded(&self) -> Result<(&LoadedModel, &Dataset, &Dataset)> {
        match (&self.model, &self.input, &self.output) {
            (Some(model), Some(input), Some(output)) => Ok((model, input, output)),
            _ => Err(ComputeError::NullParam("npu network has no loaded model".into())),
        }
    }
}

/// Allocates one device buffer per declared tensor and wraps the regular
/// ones in blobs. Returns the dataset, the blobs and the dynamic-batch
/// control input names.
fn allocate_dataset(
    driver: &Arc<dyn NpuDriver>,
    desc: &ModelDesc,
    is_input: bool,
) -> Result<(Dataset, BlobMap, Vec<String>)> {
    let ios = if is_input { &desc.inputs } else { &desc.outputs };
    let mut dataset = Dataset::new(driver.clone());
    let mut blobs = BlobMap::new();
    let mut dynamic_batch_names = Vec::new();
    for io in ios {
        let buffer = dataset.add_buffer(io.size).map_err(native_call("malloc dataset buffer"))?;
        if is_input && io.name.contains(DYNAMIC_AIPP_NAME) {
            debug!(name = %io.name, "skip dynamic aipp input");
            continue;
        }
        if is_input && io.name.contains(DYNAMIC_BATCH_NAME) {
            debug!(name = %io.name, "found dynamic batch input");
            dynamic_batch_names.push(io.name.clone());
            continue;
        }
        let blob_desc = blob_desc(io)?;
        debug!(name = %io.name, dims = ?blob_desc.dims, data_type = ?blob_desc.data_type, "add blob to map");
        blobs.insert(io.name.clone(), Blob::new(blob_desc, BlobHandle::new(buffer.memory)));
    }
    Ok((dataset, blobs, dynamic_batch_names))
}

/// Blob descriptor of a declared tensor, padded to rank 4. An unbound batch
/// is whatever fits the tensor's buffer.
fn blob_desc(io: &IoDesc) -> Result<BlobDesc> {
    let data_type = io.data_type.to_data_type()?;
    let data_format = io.format.to_data_format()?;
    let mut native = io.dims.clone();
    if native.first() == Some(&-1) {
        let rest: i64 = native.iter().skip(1).product();
        let per_batch = rest.max(1) as usize * io.data_type.size();
        native[0] = (io.size / per_batch) as i64;
        debug!(name = %io.name, batch = native[0], "batch is unbound, use buffer size");
    }
    let shape = native
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<std::result::Result<DimsVector, _>>()
        .map_err(|_| ComputeError::Model(format!("tensor {} has unbound dims {:?}", io.name, io.dims)))?;
    let shape = dims::to_rank(&shape, shape.len().max(dims::CANONICAL_RANK));
    Ok(BlobDesc::new(DeviceType::Npu, data_type, data_format, shape, io.name.clone()))
}

fn keep_first(first: &mut Option<ComputeError>, result: Result<()>) {
    if let Err(err) = result {
        warn!(%err, "npu network teardown step failed");
        first.get_or_insert(err);
    }
}

impl NetworkBackend for NpuNetwork {
    fn init(&mut self, config: &NetworkConfig, model: &ModelConfig, input_shapes: &InputShapesMap) -> Result<()> {
        if self.state.is_ready() || self.state == NetworkState::Forwarding {
            return Err(ComputeError::param("npu network is already initialized"));
        }
        if config.device_type != DeviceType::Npu {
            return Err(ComputeError::DeviceNotSupported(format!("npu network cannot run on {}", config.device_type)));
        }
        model.expect(ModelType::Npu)?;
        let path = model.model_path()?;

        let hold = self.runtime.acquire()?;
        self.context.set_precision(config.precision);
        self.context.setup(config.device_id)?;
        let loaded = match self.load(path) {
            Ok(loaded) => loaded,
            Err(err) => {
                if let Err(release_err) = self.context.release() {
                    warn!(%release_err, "release context after failed init");
                }
                return Err(err);
            }
        };

        let info = ModelInfo {
            model_id: loaded.model.id(),
            desc: loaded.model.desc().clone(),
            input_buffers: loaded.input.buffers().iter().map(|b| b.addr).collect(),
        };
        for blob in loaded.input_blobs.values() {
            self.runtime.add_model_info(blob, info.clone());
        }
        info!(model_id = info.model_id, path = %path.display(), "npu network initialized");

        self.input_blobs = loaded.input_blobs;
        self.output_blobs = loaded.output_blobs;
        self.dynamic_batch_names = loaded.dynamic_batch_names;
        self.input = Some(loaded.input);
        self.output = Some(loaded.output);
        self.model = Some(loaded.model);
        self.hold = Some(hold);
        self.state = NetworkState::Initialized;

        if !input_shapes.is_empty() {
            self.reshape(input_shapes)?;
        }
        Ok(())
    }

    fn reshape(&mut self, input_shapes: &InputShapesMap) -> Result<()> {
        self.require_ready("reshape")?;
        self.context.make_current()?;

        let (model, input, _) = self.loaded()?;
        let mut batch = None;
        if let Some(control) = self.dynamic_batch_names.first() {
            let mut requested: Vec<(&str, usize)> = self
                .input_blobs
                .iter()
                .filter(|(name, _)| model.desc().is_dynamic_batch_input(name.as_str()))
                .filter_map(|(name, blob)| {
                    let dims = input_shapes.get(name).unwrap_or(&blob.desc().dims);
                    dims.first().map(|&b| (name.as_str(), b))
                })
                .collect();
            requested.sort_unstable();
            // All dynamic inputs share one batch control.
            if let Some(&(first_name, first_batch)) = requested.first() {
                if let Some(&(name, other)) = requested.iter().find(|(_, b)| *b != first_batch) {
                    return Err(ComputeError::Param(format!(
                        "dynamic inputs {first_name} and {name} ask for batch {first_batch} and {other}"
                    )));
                }
                let index = model
                    .desc()
                    .input_index_by_name(control)
                    .map_err(native_call("get dynamic batch input index"))?;
                self.runtime
                    .driver()
                    .set_dynamic_batch_size(model.id(), input.buffers(), index, first_batch)
                    .map_err(native_call("set dynamic batch size"))?;
                debug!(batch = first_batch, "set dynamic batch size");
                batch = Some(first_batch);
            }
        }

        for (name, dims) in input_shapes {
            if let Some(blob) = self.input_blobs.get_mut(name) {
                debug!(name, from = ?blob.desc().dims, to = ?dims, "reshape input");
                blob.desc_mut().dims.clone_from(dims);
            }
        }
        if let Some(batch) = batch {
            for output in self.output_blobs.values_mut() {
                if let Some(first) = output.desc_mut().dims.first_mut() {
                    *first = batch;
                }
            }
        }
        self.state = NetworkState::Reshaped;
        Ok(())
    }

    fn forward(&mut self) -> Result<()> {
        self.require_ready("forward")?;
        self.context.make_current()?;
        self.state = NetworkState::Forwarding;
        let result = self.execute();
        self.state = NetworkState::Initialized;
        result
    }

    fn deinit(&mut self) -> Result<()> {
        if matches!(self.state, NetworkState::Uninitialized | NetworkState::Deinitialized) {
            return Ok(());
        }
        let mut first = None;
        keep_first(&mut first, self.context.make_current());

        for blob in self.input_blobs.values().chain(self.output_blobs.values()) {
            self.runtime.del_model_info(blob);
        }
        self.input_blobs.clear();
        self.output_blobs.clear();
        self.dynamic_batch_names.clear();

        if let Some(mut input) = self.input.take() {
            keep_first(&mut first, input.release().map_err(native_call("destroy input dataset")));
        }
        if let Some(mut output) = self.output.take() {
            keep_first(&mut first, output.release().map_err(native_call("destroy output dataset")));
        }
        if let Some(mut model) = self.model.take() {
            keep_first(&mut first, model.release().map_err(native_call("unload model")));
        }
        keep_first(&mut first, self.context.release());
        if let Some(mut hold) = self.hold.take() {
            keep_first(&mut first, hold.release());
        }

        self.state = NetworkState::Deinitialized;
        info!("npu network deinitialized");
        first.map_or(Ok(()), Err)
    }

    fn input_blobs(&self) -> &BlobMap {
        &self.input_blobs
    }

    fn output_blobs(&self) -> &BlobMap {
        &self.output_blobs
    }

    fn forward_memory_size(&self) -> Result<usize> {
        let (model, _, _) = self.loaded()?;
        Ok(model.size().mem_size)
    }

    fn set_forward_memory(&mut self, _memory: HostBuffer) -> Result<()> {
        error!("Not support setting forward memory in Npu!");
        Err(ComputeError::NotSupported("setting forward memory in npu network".into()))
    }

    fn command_queue(&self) -> Result<CommandQueue> {
        self.context.command_queue()
    }

    fn set_command_queue(&mut self, queue: CommandQueue) -> Result<()> {
        self.context.set_command_queue(queue)
    }

    fn state(&self) -> NetworkState {
        self.state
    }
}

impl Drop for NpuNetwork {
    fn drop(&mut self) {
        if let Err(err) = self.deinit() {
            warn!(%err, "npu network teardown on drop failed");
        }
    }
}
