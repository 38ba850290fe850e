//! Context of the GPU compute device on top of `wgpu`.

use crate::{CommandQueue, ComputeError, DeviceContext, DeviceType, GpuQueue, Precision, Result};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct GpuContext {
    gpu: Option<Arc<GpuQueue>>,
    owns_queue: bool,
    precision: Precision,
    workspace: Mutex<Option<Arc<wgpu::Buffer>>>,
}

impl GpuContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gpu: None,
            owns_queue: false,
            precision: Precision::High,
            workspace: Mutex::new(None),
        }
    }

    fn gpu(&self) -> Result<&Arc<GpuQueue>> {
        self.gpu
            .as_ref()
            .ok_or_else(|| ComputeError::NullParam("gpu context has no device, call setup first".into()))
    }

    /// Whether the queue was created here rather than shared in.
    #[must_use]
    pub fn owns_queue(&self) -> bool {
        self.owns_queue
    }

    /// Scratch buffer of at least `size` bytes, grown on demand.
    pub fn workspace(&self, size: u64) -> Result<Arc<wgpu::Buffer>> {
        let gpu = self.gpu()?;
        let mut workspace = self.workspace.lock();
        if let Some(buffer) = workspace.as_ref().filter(|b| b.size() >= size) {
            return Ok(buffer.clone());
        }
        tracing::debug!(size, "growing gpu workspace");
        let buffer = Arc::new(gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("workspace"),
            size: size.max(4),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        *workspace = Some(buffer.clone());
        Ok(buffer)
    }

    #[must_use]
    pub fn workspace_size(&self) -> u64 {
        self.workspace.lock().as_ref().map_or(0, |b| b.size())
    }
}

impl Default for GpuContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceContext for GpuContext {
    fn device_type(&self) -> DeviceType {
        DeviceType::Gpu
    }

    fn setup(&mut self, device_id: i32) -> Result<()> {
        let instance = wgpu::Instance::default();
        let mut adapters = instance.enumerate_adapters(wgpu::Backends::all());
        let index = usize::try_from(device_id)
            .map_err(|_| ComputeError::Param(format!("invalid gpu device id {device_id}")))?;
        if index >= adapters.len() {
            return Err(ComputeError::runtime(format!(
                "gpu device {device_id} not found ({} adapters)",
                adapters.len()
            )));
        }
        let adapter = adapters.swap_remove(index);
        tracing::info!(device_id, adapter = %adapter.get_info().name, "gpu context setup");
        self.gpu = Some(Arc::new(GpuQueue::open(&adapter)?));
        self.owns_queue = true;
        Ok(())
    }

    fn command_queue(&self) -> Result<CommandQueue> {
        Ok(CommandQueue::Gpu(self.gpu()?.clone()))
    }

    fn set_command_queue(&mut self, queue: CommandQueue) -> Result<()> {
        match queue {
            CommandQueue::Gpu(gpu) => {
                self.gpu = Some(gpu);
                self.owns_queue = false;
                *self.workspace.lock() = None;
                Ok(())
            }
            other => Err(ComputeError::Param(format!("gpu context cannot run on {other:?}"))),
        }
    }

    fn synchronize(&self) -> Result<()> {
        self.gpu()?.wait_idle();
        Ok(())
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn set_precision(&mut self, precision: Precision) {
        // Kernels are 32-bit only.
        if precision != Precision::High {
            tracing::warn!(?precision, "gpu kernels run at high precision");
        }
        self.precision = Precision::High;
    }

    fn on_forward_end(&self) -> Result<()> {
        self.synchronize()
    }
}
