//! GPU implementation of [`ComputeBackend`] built on [`wgpu`].
//!
//! The `WgpuBackend` compiles WGSL shaders at runtime and dispatches them on
//! the user's graphics device. It mirrors the CPU reference queue's results.
//! Initialization fails if no compatible adapter is found.

use crate::{layout, BufferView, ComputeBackend, ComputeError, Kernel};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Device plus submission queue; the GPU context's "stream".
pub struct GpuQueue {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl GpuQueue {
    /// Opens a device on `adapter`.
    pub fn open(adapter: &wgpu::Adapter) -> Result<Self, ComputeError> {
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("inference-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|err| {
            tracing::warn!("Failed to request device: {err}");
            ComputeError::BackendUnavailable
        })?;
        Ok(Self { device, queue })
    }

    /// Blocks until all submitted work completes.
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

struct Pipeline {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// GPU-backed implementation of [`ComputeBackend`] built on `wgpu`.
pub struct WgpuBackend {
    gpu: Arc<GpuQueue>,
    pipelines: Mutex<HashMap<Kernel, Arc<Pipeline>>>,
}

impl WgpuBackend {
    /// Creates a new backend using the system's default high-performance GPU.
    pub fn new() -> Result<Self, ComputeError> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or(ComputeError::BackendUnavailable)?;
        Ok(Self::from_queue(Arc::new(GpuQueue::open(&adapter)?)))
    }

    /// Dispatches on a device owned elsewhere, e.g. by a GPU context.
    #[must_use]
    pub fn from_queue(gpu: Arc<GpuQueue>) -> Self {
        Self { gpu, pipelines: Mutex::new(HashMap::new()) }
    }

    fn pipeline(&self, kernel: &Kernel) -> Arc<Pipeline> {
        let mut cache = self.pipelines.lock();
        cache
            .entry(*kernel)
            .or_insert_with(|| Arc::new(self.build_pipeline(kernel)))
            .clone()
    }

    fn build_pipeline(&self, kernel: &Kernel) -> Pipeline {
        let device = &self.gpu.device;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel_name(kernel)),
            source: wgpu::ShaderSource::Wgsl(to_shader_source(kernel).into()),
        });

        let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..layout::binding_count(kernel))
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: if layout::is_uniform(kernel, binding) {
                        wgpu::BufferBindingType::Uniform
                    } else {
                        wgpu::BufferBindingType::Storage { read_only: layout::is_read_only(kernel, binding) }
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bind Group Layout"),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel_name(kernel)),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        Pipeline { layout: bind_group_layout, pipeline }
    }
}

/// Returns the WGSL label for a given [`Kernel`].
fn kernel_name(kernel: &Kernel) -> &'static str {
    match kernel {
        Kernel::Add => "add",
        Kernel::Sub => "sub",
        Kernel::Mul => "mul",
        Kernel::Div => "div",
        Kernel::Max => "max",
        Kernel::Min => "min",
    }
}

/// Provides the WGSL shader source associated with the kernel.
fn to_shader_source(kernel: &Kernel) -> &'static str {
    match kernel {
        Kernel::Add => include_str!("../../../shaders/add.wgsl"),
        Kernel::Sub => include_str!("../../../shaders/sub.wgsl"),
        Kernel::Mul => include_str!("../../../shaders/mul.wgsl"),
        Kernel::Div => include_str!("../../../shaders/div.wgsl"),
        Kernel::Max => include_str!("../../../shaders/max.wgsl"),
        Kernel::Min => include_str!("../../../shaders/min.wgsl"),
    }
}

impl ComputeBackend for WgpuBackend {
    fn dispatch(
        &self,
        kernel: &Kernel,
        bindings: &[BufferView],
        workgroups: [u32; 3],
    ) -> Result<Vec<Vec<u8>>, ComputeError> {
        if bindings.len() != layout::binding_count(kernel) as usize {
            return Err(ComputeError::ShapeMismatch("binding count does not match the kernel layout"));
        }
        if bindings.iter().any(|view| view.element_size_in_bytes != 4) {
            return Err(ComputeError::ShapeMismatch("wgpu kernels only take 32-bit elements"));
        }
        let device = &self.gpu.device;
        let pipeline = self.pipeline(kernel);

        let gpu_buffers: Vec<wgpu::Buffer> = bindings
            .iter()
            .enumerate()
            .map(|(i, buffer_view)| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("Buffer {i}")),
                    contents: if buffer_view.data.is_empty() { &[0u8; 4] } else { &buffer_view.data },
                    usage: if layout::is_uniform(kernel, i as u32) {
                        wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST
                    } else {
                        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
                    },
                })
            })
            .collect();

        let bind_group_entries: Vec<wgpu::BindGroupEntry> = gpu_buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry { binding: i as u32, resource: buffer.as_entire_binding() })
            .collect();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bind Group"),
            layout: &pipeline.layout,
            entries: &bind_group_entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Compute Pass"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&pipeline.pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        }

        let mut staging_buffers = Vec::new();
        for (i, buffer_view) in bindings.iter().enumerate() {
            if layout::is_read_only(kernel, i as u32) || buffer_view.data.is_empty() {
                continue;
            }
            let size = buffer_view.data.len() as u64;
            let staging = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("Staging Buffer {i}")),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            encoder.copy_buffer_to_buffer(&gpu_buffers[i], 0, &staging, 0, size);
            staging_buffers.push(staging);
        }

        self.gpu.queue.submit(Some(encoder.finish()));

        let mut results = Vec::with_capacity(staging_buffers.len());
        for buffer in &staging_buffers {
            let buffer_slice = buffer.slice(..);
            let (tx, rx) = std::sync::mpsc::channel();
            buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
            device.poll(wgpu::Maintain::Wait);
            rx.recv()
                .map_err(|_| ComputeError::runtime("staging buffer map callback dropped"))?
                .map_err(|err| ComputeError::runtime(format!("staging buffer map failed: {err}")))?;
            results.push(buffer_slice.get_mapped_range().to_vec());
            buffer.unmap();
        }

        Ok(results)
    }

    fn name(&self) -> &'static str {
        "wgpu"
    }
}
