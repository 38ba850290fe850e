//! Native surface of the accelerator runtime.
//!
//! [`NpuDriver`] mirrors the handful of native calls the backend issues. Each
//! call returns the native status code on failure; callers fold it into a
//! [`ComputeError`] naming the call.

use compute::{host_buffer, ComputeError, DataFormat, DataType, HostBuffer, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("native error code {0}")]
pub struct NativeError(pub i32);

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// Maps a failed native `call` to a runtime error carrying its code.
pub fn native_call(call: &'static str) -> impl FnOnce(NativeError) -> ComputeError {
    move |NativeError(code)| {
        tracing::error!(call, code, "native call failed");
        ComputeError::native(format!("{call} failed"), code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// Device memory allocated by the driver. The driver maps it into host
/// memory so blobs can address it.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    pub addr: u64,
    pub size: usize,
    pub memory: HostBuffer,
}

impl DeviceBuffer {
    #[must_use]
    pub fn new(addr: u64, size: usize) -> Self {
        Self { addr, size, memory: host_buffer(size) }
    }
}

/// Memory a model needs to be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelSize {
    pub mem_size: usize,
    pub weight_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeDataType {
    #[default]
    Float,
    Float16,
    Int8,
    Int32,
    Uint8,
    Int16,
    Uint16,
    Uint32,
    Int64,
    Uint64,
    Double,
    Bool,
}

impl NativeDataType {
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Bool => 1,
            Self::Float16 | Self::Int16 | Self::Uint16 => 2,
            Self::Float | Self::Int32 | Self::Uint32 => 4,
            Self::Int64 | Self::Uint64 | Self::Double => 8,
        }
    }

    pub fn to_data_type(self) -> Result<DataType> {
        match self {
            Self::Float => Ok(DataType::Float),
            Self::Float16 => Ok(DataType::Half),
            Self::Int8 | Self::Uint8 => Ok(DataType::Int8),
            Self::Int32 => Ok(DataType::Int32),
            other => Err(ComputeError::Param(format!("native data type {other:?} not support yet"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeFormat {
    #[default]
    Nchw,
    Nhwc,
    Nd,
    Nc1hwc0,
    Undefined,
}

impl NativeFormat {
    pub fn to_data_format(self) -> Result<DataFormat> {
        match self {
            Self::Nchw | Self::Nd => Ok(DataFormat::Nchw),
            Self::Nhwc => Ok(DataFormat::Nhwc),
            Self::Nc1hwc0 => Ok(DataFormat::Nc4hw4),
            Self::Undefined => Err(ComputeError::param("native data format undefined")),
        }
    }
}

/// One declared model input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoDesc {
    pub name: String,
    /// Native shape; a leading `-1` marks an unbound batch.
    pub dims: Vec<i64>,
    #[serde(default)]
    pub data_type: NativeDataType,
    #[serde(default)]
    pub format: NativeFormat,
    /// Bytes the model needs for this tensor at its largest batch.
    #[serde(default)]
    pub size: usize,
}

/// Introspection data of a loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelDesc {
    pub inputs: Vec<IoDesc>,
    pub outputs: Vec<IoDesc>,
    /// Batch sizes the model accepts at run time; empty for static models.
    #[serde(default)]
    pub dynamic_batch: Vec<usize>,
}

impl ModelDesc {
    #[must_use]
    pub fn is_dynamic_batch(&self) -> bool {
        !self.dynamic_batch.is_empty()
    }

    /// Whether input `name` takes its batch from the dynamic batch control.
    #[must_use]
    pub fn is_dynamic_batch_input(&self, name: &str) -> bool {
        self.is_dynamic_batch() && self.inputs.iter().any(|io| io.name == name && io.dims.first() == Some(&-1))
    }

    pub fn input_index_by_name(&self, name: &str) -> NativeResult<usize> {
        self.inputs.iter().position(|io| io.name == name).ok_or(NativeError(INVALID_PARAM))
    }
}

/// Status code of a call made with invalid arguments.
pub const INVALID_PARAM: i32 = 100_000;

/// The native calls the backend depends on.
pub trait NpuDriver: Send + Sync {
    /// Process-wide runtime initialization.
    fn init(&self) -> NativeResult<()>;

    fn finalize(&self) -> NativeResult<()>;

    fn set_device(&self, device_id: i32) -> NativeResult<()>;

    fn create_context(&self, device_id: i32) -> NativeResult<ContextHandle>;

    fn destroy_context(&self, context: ContextHandle) -> NativeResult<()>;

    /// Binds `context` to the calling thread.
    fn set_current_context(&self, context: ContextHandle) -> NativeResult<()>;

    fn create_stream(&self) -> NativeResult<StreamHandle>;

    fn destroy_stream(&self, stream: StreamHandle) -> NativeResult<()>;

    fn synchronize_stream(&self, stream: StreamHandle) -> NativeResult<()>;

    fn malloc(&self, size: usize) -> NativeResult<DeviceBuffer>;

    fn free(&self, buffer: &DeviceBuffer) -> NativeResult<()>;

    fn query_model_size(&self, path: &Path) -> NativeResult<ModelSize>;

    /// Loads the artifact at `path` into caller-owned memory, returning the model id.
    fn load_model(&self, path: &Path, mem: &DeviceBuffer, weight: &DeviceBuffer) -> NativeResult<u32>;

    fn unload_model(&self, model_id: u32) -> NativeResult<()>;

    fn model_desc(&self, model_id: u32) -> NativeResult<ModelDesc>;

    /// Selects the batch of the next execution; `index` is the dynamic-batch
    /// control input.
    fn set_dynamic_batch_size(
        &self,
        model_id: u32,
        inputs: &[DeviceBuffer],
        index: usize,
        batch: usize,
    ) -> NativeResult<()>;

    fn execute(&self, model_id: u32, inputs: &[DeviceBuffer], outputs: &[DeviceBuffer]) -> NativeResult<()>;
}
