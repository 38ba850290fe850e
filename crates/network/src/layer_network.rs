//! Network that runs a [`LayerGraph`] one accelerator per layer.

use crate::backend::{NetworkBackend, NetworkState};
use crate::config::{InputShapesMap, ModelConfig, ModelType, NetworkConfig, ShareMemoryMode};
use crate::graph::{GraphLayer, LayerGraph};
use compute::device::shader::ShaderContext;
use compute::{
    host_buffer, AccRegistry, Blob, BlobDesc, BlobHandle, BlobMap, CommandQueue, ComputeError, DataFlag, DataFormat,
    DataType, DeviceContext, DeviceType, HostBuffer, HostContext, LayerAcc, Result,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Arena offsets are aligned to this many bytes.
const ARENA_ALIGNMENT: usize = 16;

struct LayerNode {
    layer: GraphLayer,
    acc: Box<dyn LayerAcc>,
}

pub struct LayerNetwork {
    state: NetworkState,
    config: NetworkConfig,
    graph: Option<LayerGraph>,
    context: Option<Arc<dyn DeviceContext>>,
    pending_queue: Option<CommandQueue>,
    nodes: Vec<LayerNode>,
    blobs: BlobMap,
    input_blobs: BlobMap,
    output_blobs: BlobMap,
    arena: Option<HostBuffer>,
}

impl Default for LayerNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn create_context(config: &NetworkConfig) -> Result<Box<dyn DeviceContext>> {
    match config.device_type {
        DeviceType::Cpu | DeviceType::Arm => Ok(Box::new(HostContext::new(config.device_type))),
        DeviceType::Shader => Ok(Box::new(ShaderContext::new())),
        #[cfg(feature = "gpu")]
        DeviceType::Gpu => Ok(Box::new(compute::device::gpu::GpuContext::new())),
        other => Err(ComputeError::DeviceNotSupported(format!("layer network cannot run on {other}"))),
    }
}

fn gather(blobs: &BlobMap, names: &[String]) -> Result<Vec<Blob>> {
    names
        .iter()
        .map(|name| {
            blobs.get(name).cloned().ok_or_else(|| ComputeError::Model(format!("blob {name} does not exist")))
        })
        .collect()
}

fn scatter(blobs: &mut BlobMap, updated: Vec<Blob>) {
    for blob in updated {
        blobs.insert(blob.name().to_string(), blob);
    }
}

fn align(size: usize) -> usize {
    size.div_ceil(ARENA_ALIGNMENT) * ARENA_ALIGNMENT
}

impl LayerNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: NetworkState::Uninitialized,
            config: NetworkConfig::default(),
            graph: None,
            context: None,
            pending_queue: None,
            nodes: Vec::new(),
            blobs: BlobMap::new(),
            input_blobs: BlobMap::new(),
            output_blobs: BlobMap::new(),
            arena: None,
        }
    }

    /// Runs a graph that is already in memory.
    pub fn init_with_graph(
        &mut self,
        config: &NetworkConfig,
        graph: LayerGraph,
        input_shapes: &InputShapesMap,
    ) -> Result<()> {
        if self.state.is_ready() || self.state == NetworkState::Forwarding {
            return Err(ComputeError::param("layer network is already initialized"));
        }
        let mut context = create_context(config)?;
        context.set_precision(config.precision);
        context.setup(config.device_id)?;
        if let Some(queue) = self.pending_queue.take() {
            context.set_command_queue(queue)?;
        }
        let context: Arc<dyn DeviceContext> = Arc::from(context);

        let mut blobs = BlobMap::new();
        for (name, dims) in &graph.inputs {
            let dims = input_shapes.get(name).unwrap_or(dims).clone();
            let desc = BlobDesc::new(config.device_type, DataType::Float, DataFormat::Nchw, dims, name.clone());
            blobs.insert(name.clone(), Blob::new(desc, BlobHandle::new(host_buffer(0))));
        }
        for (name, buffer) in graph.constants.iter() {
            let desc = BlobDesc::new(
                config.device_type,
                buffer.data_type(),
                DataFormat::Nchw,
                buffer.dims().to_vec(),
                name.clone(),
            );
            let constant = Blob::new(desc, BlobHandle::new(host_buffer(0)));
            blobs.insert(name.clone(), constant);
        }

        let mut nodes = Vec::with_capacity(graph.layers.len());
        for layer in &graph.layers {
            let info = &layer.info;
            let mut acc = AccRegistry::global().create(info.layer_type, config.device_type)?;
            acc.set_constant_resource(graph.constants.clone(), Some(graph.constant_flags.clone()));

            let mut inputs = gather(&blobs, &info.inputs)?;
            let input_dims: Vec<_> = inputs.iter().map(|b| b.desc().dims.clone()).collect();
            let data_type = inputs.first().map_or(DataType::Float, |b| b.desc().data_type);
            let mut outputs = Vec::with_capacity(info.outputs.len());
            for (name, dims) in info.outputs.iter().zip(info.infer_output_dims(&input_dims, &layer.resource)?) {
                let desc = BlobDesc::new(config.device_type, data_type, DataFormat::Nchw, dims, name.clone());
                outputs.push(Blob::new(desc, BlobHandle::new(host_buffer(0))));
            }

            acc.init(context.clone(), info, &layer.resource, &mut inputs, &mut outputs)?;
            if inputs.iter().skip(1).all(|b| b.flag() == DataFlag::ChangeNever) {
                acc.infer_runtime_output_shape(&inputs, &mut outputs)?;
            }
            acc.reshape(&mut inputs, &mut outputs)?;
            debug!(layer = %info.name, output_dims = ?outputs.first().map(|b| b.desc().dims.clone()), "layer ready");
            scatter(&mut blobs, inputs);
            scatter(&mut blobs, outputs);
            nodes.push(LayerNode { layer: layer.clone(), acc });
        }

        self.config = config.clone();
        self.context = Some(context);
        self.nodes = nodes;
        self.blobs = blobs;
        self.graph = Some(graph);
        self.arena = None;
        self.allocate()?;
        self.state = NetworkState::Initialized;
        info!(layers = self.nodes.len(), device = %config.device_type, "layer network initialized");
        Ok(())
    }

    fn graph(&self) -> Result<&LayerGraph> {
        self.graph.as_ref().ok_or_else(|| ComputeError::NullParam("layer network has no graph".into()))
    }

    /// Blobs placed in the working-memory arena, with their offsets.
    fn arena_layout(&self) -> Result<(Vec<(String, usize)>, usize)> {
        let graph = self.graph()?;
        let mut names: Vec<&String> = self
            .blobs
            .keys()
            .filter(|name| !graph.is_input(name) && !graph.is_constant(name) && !graph.outputs.contains(name))
            .collect();
        names.sort();
        let mut offset = 0;
        let mut layout = Vec::with_capacity(names.len());
        for name in names {
            layout.push((name.clone(), offset));
            offset += align(self.blobs[name].desc().byte_size()?);
        }
        Ok((layout, offset))
    }

    /// Binds arena blobs into `arena` at their offsets.
    fn bind_arena(&mut self, arena: HostBuffer) -> Result<()> {
        let (layout, _) = self.arena_layout()?;
        for (name, offset) in layout {
            if let Some(blob) = self.blobs.get_mut(&name) {
                blob.set_handle(BlobHandle::with_offset(arena.clone(), offset));
            }
        }
        self.arena = Some(arena);
        Ok(())
    }

    /// Gives graph inputs and outputs their own memory and, unless the caller
    /// provides it, the arena its memory.
    fn allocate(&mut self) -> Result<()> {
        let graph = self.graph()?;
        let input_names: Vec<String> = graph.inputs.iter().map(|(name, _)| name.clone()).collect();
        let output_names = graph.outputs.clone();
        for name in input_names.iter().chain(&output_names) {
            let Some(blob) = self.blobs.get_mut(name) else { continue };
            if blob.flag() == DataFlag::ChangeNever {
                continue;
            }
            let size = blob.desc().byte_size()?;
            if blob.handle().capacity() < size {
                blob.set_handle(BlobHandle::new(host_buffer(size)));
            }
        }

        let (_, size) = self.arena_layout()?;
        let arena = match self.arena.take() {
            Some(arena) if arena.read().len() >= size => Some(arena),
            _ if self.config.share_memory_mode == ShareMemoryMode::SetFromExternal => None,
            _ => Some(host_buffer(size)),
        };
        if let Some(arena) = arena {
            self.bind_arena(arena)?;
        }

        self.input_blobs = by_name(gather(&self.blobs, &input_names)?);
        self.output_blobs = by_name(gather(&self.blobs, &output_names)?);
        Ok(())
    }

    fn run_layers(&mut self, context: &dyn DeviceContext) -> Result<()> {
        context.on_forward_begin()?;
        for node in &mut self.nodes {
            let inputs = gather(&self.blobs, &node.layer.info.inputs)?;
            let outputs = gather(&self.blobs, &node.layer.info.outputs)?;
            node.acc.forward(&inputs, &outputs)?;
        }
        context.on_forward_end()?;
        context.synchronize()
    }

    fn context(&self) -> Result<&Arc<dyn DeviceContext>> {
        self.context.as_ref().ok_or_else(|| ComputeError::NullParam("layer network has no context".into()))
    }
}

fn by_name(blobs: Vec<Blob>) -> BlobMap {
    blobs.into_iter().map(|blob| (blob.name().to_string(), blob)).collect()
}

impl NetworkBackend for LayerNetwork {
    fn init(&mut self, config: &NetworkConfig, model: &ModelConfig, input_shapes: &InputShapesMap) -> Result<()> {
        model.expect(ModelType::LayerGraph)?;
        let graph = LayerGraph::load(model.model_path()?)?;
        self.init_with_graph(config, graph, input_shapes)
    }

    fn reshape(&mut self, input_shapes: &InputShapesMap) -> Result<()> {
        if !self.state.is_ready() {
            return Err(ComputeError::Param(format!("reshape on a network in state {:?}", self.state)));
        }
        for (name, dims) in input_shapes {
            if let Some(blob) = self.blobs.get_mut(name) {
                debug!(name, ?dims, "reshape input");
                blob.desc_mut().dims.clone_from(dims);
            }
        }
        let blobs = &mut self.blobs;
        for node in &mut self.nodes {
            let info = &node.layer.info;
            let mut inputs = gather(blobs, &info.inputs)?;
            node.acc.reload_constant_blobs(&mut inputs, true)?;
            let input_dims: Vec<_> = inputs.iter().map(|b| b.desc().dims.clone()).collect();
            let mut outputs = gather(blobs, &info.outputs)?;
            for (output, dims) in outputs.iter_mut().zip(info.infer_output_dims(&input_dims, &node.layer.resource)?) {
                output.desc_mut().dims = dims;
            }
            if inputs.iter().skip(1).all(|b| b.flag() == DataFlag::ChangeNever) {
                node.acc.infer_runtime_output_shape(&inputs, &mut outputs)?;
            }
            node.acc.reshape(&mut inputs, &mut outputs)?;
            scatter(blobs, inputs);
            scatter(blobs, outputs);
        }
        self.allocate()?;
        self.state = NetworkState::Reshaped;
        Ok(())
    }

    fn forward(&mut self) -> Result<()> {
        if !self.state.is_ready() {
            return Err(ComputeError::Param(format!("forward on a network in state {:?}", self.state)));
        }
        if self.arena.is_none() {
            return Err(ComputeError::NullParam("forward memory is not set".into()));
        }
        let context = self.context()?.clone();
        self.state = NetworkState::Forwarding;
        let result = self.run_layers(context.as_ref());
        self.state = NetworkState::Initialized;
        result
    }

    fn deinit(&mut self) -> Result<()> {
        self.nodes.clear();
        self.blobs.clear();
        self.input_blobs.clear();
        self.output_blobs.clear();
        self.arena = None;
        self.graph = None;
        self.context = None;
        if self.state != NetworkState::Uninitialized {
            self.state = NetworkState::Deinitialized;
        }
        Ok(())
    }

    fn input_blobs(&self) -> &BlobMap {
        &self.input_blobs
    }

    fn output_blobs(&self) -> &BlobMap {
        &self.output_blobs
    }

    fn forward_memory_size(&self) -> Result<usize> {
        Ok(self.arena_layout()?.1)
    }

    fn set_forward_memory(&mut self, memory: HostBuffer) -> Result<()> {
        if self.config.share_memory_mode != ShareMemoryMode::SetFromExternal {
            return Err(ComputeError::param("forward memory can only be set in share memory mode set_from_external"));
        }
        let needed = self.forward_memory_size()?;
        let len = memory.read().len();
        if len < needed {
            return Err(ComputeError::Param(format!("forward memory holds {len} bytes, the network needs {needed}")));
        }
        self.bind_arena(memory)
    }

    fn command_queue(&self) -> Result<CommandQueue> {
        self.context()?.command_queue()
    }

    /// Takes effect at the next `init`; contexts are shared with the
    /// accelerators once initialized.
    fn set_command_queue(&mut self, queue: CommandQueue) -> Result<()> {
        if self.context.is_some() {
            return Err(ComputeError::param("layer network command queue must be set before init"));
        }
        self.pending_queue = Some(queue);
        Ok(())
    }

    fn state(&self) -> NetworkState {
        self.state
    }
}
