#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

//! Device execution layer of the inference runtime: the tensor data model,
//! device contexts, per-layer accelerators and the shader dispatch queue they
//! run on.

use std::sync::Arc;

pub mod acc;
pub mod backend;
pub mod blob;
pub mod context;
pub mod cpu_backend;
pub mod device;
pub mod dims;
pub mod error;
pub mod fp16;
pub mod kernels;
pub mod layer;
pub mod layout;
pub mod registry;
pub mod types;
#[cfg(feature = "gpu")]
pub mod wgpu_backend;

pub use acc::{AccBase, LayerAcc};
pub use backend::ComputeBackend;
pub use blob::{
    host_buffer, Blob, BlobDesc, BlobHandle, BlobMap, ConstantBlobMap, ConstantResource,
    ConstantResourceFlag, HostBuffer, RawBuffer,
};
pub use context::{CommandQueue, DeviceContext, HostContext};
pub use cpu_backend::CpuBackend;
pub use dims::DimsVector;
pub use error::{ComputeError, ErrorKind, Result};
pub use layer::{LayerInfo, LayerParam, LayerResource, LayerType};
pub use registry::AccRegistry;
pub use types::{BlobType, DataFlag, DataFormat, DataType, DeviceType, Precision};
#[cfg(feature = "gpu")]
pub use wgpu_backend::{GpuQueue, WgpuBackend};

/// Element-wise kernels the shader queue can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

impl Kernel {
    #[must_use]
    pub const fn binding_count(&self) -> u32 {
        layout::binding_count(self)
    }
}

#[derive(Clone, Debug)]
pub struct BufferView {
    pub data: Arc<[u8]>,
    pub shape: Vec<usize>, // Number of elements per dimension
    pub element_size_in_bytes: usize,
}

impl BufferView {
    #[must_use]
    pub fn new(data: Arc<[u8]>, shape: Vec<usize>, element_size_in_bytes: usize) -> Self {
        Self { data, shape, element_size_in_bytes }
    }

    /// Views a host blob's current contents.
    pub fn from_blob(blob: &Blob) -> Result<Self> {
        let element_size = blob.desc().data_type.checked_byte_size()?;
        let data = blob.with_bytes(|bytes| Arc::<[u8]>::from(bytes))?;
        Ok(Self::new(data, blob.desc().dims.clone(), element_size))
    }

    #[must_use]
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Returns a shader dispatch queue, preferring the GPU when it can initialize.
///
/// With the `gpu` feature enabled this attempts to create a [`WgpuBackend`].
/// If no adapter is found or the feature is off, the [`CpuBackend`]
/// reference queue is returned.
#[must_use]
pub fn default_backend() -> Arc<dyn ComputeBackend> {
    #[cfg(feature = "gpu")]
    {
        match WgpuBackend::new() {
            Ok(gpu) => {
                tracing::info!("Using wgpu shader queue.");
                return Arc::new(gpu);
            }
            Err(err) => tracing::warn!("wgpu shader queue unavailable ({err}), falling back..."),
        }
    }

    tracing::info!("Using CPU reference shader queue.");
    Arc::new(CpuBackend::new())
}
