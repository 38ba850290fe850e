//! Backend for pre-compiled models on the neural-processor runtime.

pub mod context;
pub mod driver;
pub mod guard;
pub mod network;
pub mod runtime;
pub mod sim;

pub use context::NpuContext;
pub use driver::{
    ContextHandle, DeviceBuffer, IoDesc, ModelDesc, ModelSize, NativeDataType, NativeError, NativeFormat,
    NativeResult, NpuDriver, StreamHandle,
};
pub use network::NpuNetwork;
pub use runtime::{ModelInfo, NpuRuntime, RuntimeHold};
pub use sim::{Faults, ModelManifest, SimulatedNpu};

/// Inputs carrying this marker configure on-device preprocessing and are not
/// exposed as blobs.
pub const DYNAMIC_AIPP_NAME: &str = "ascend_dynamic_aipp_data";

/// Inputs carrying this marker select the batch of dynamic-batch models.
pub const DYNAMIC_BATCH_NAME: &str = "ascend_mbatch_shape_data";
