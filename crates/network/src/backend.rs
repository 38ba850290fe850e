//! The contract every network implementation fulfils.

use crate::config::{InputShapesMap, ModelConfig, NetworkConfig};
use compute::{BlobMap, CommandQueue, HostBuffer, Result};

/// Lifecycle of a network instance.
///
/// `Uninitialized -> Initialized -> Reshaped* -> Forwarding -> Initialized -> Deinitialized`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NetworkState {
    #[default]
    Uninitialized,
    Initialized,
    Reshaped,
    Forwarding,
    Deinitialized,
}

impl NetworkState {
    /// Whether the network holds a loaded model.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Initialized | Self::Reshaped)
    }
}

/// Invoked with the status of an asynchronous forward.
pub type ForwardCallback = Box<dyn FnOnce(&Result<()>) + Send>;

/// One loaded model instance and its I/O blobs on one device.
///
/// Calls on one instance are sequential; separate instances may run on
/// separate threads.
pub trait NetworkBackend: Send {
    fn init(&mut self, config: &NetworkConfig, model: &ModelConfig, input_shapes: &InputShapesMap) -> Result<()>;

    /// Applies new input shapes; required before `forward` after any change.
    fn reshape(&mut self, input_shapes: &InputShapesMap) -> Result<()>;

    fn forward(&mut self) -> Result<()>;

    /// Forward that reports its status to `callback`. Backends without an
    /// asynchronous primitive complete the work before returning.
    fn forward_async(&mut self, callback: ForwardCallback) -> Result<()> {
        let result = self.forward();
        callback(&result);
        result
    }

    /// Releases every device resource. Attempts every step and reports the
    /// first failure.
    fn deinit(&mut self) -> Result<()>;

    fn input_blobs(&self) -> &BlobMap;

    fn output_blobs(&self) -> &BlobMap;

    /// Working memory the model needs, in bytes.
    fn forward_memory_size(&self) -> Result<usize>;

    /// Hands the network an externally owned working-memory arena.
    fn set_forward_memory(&mut self, memory: HostBuffer) -> Result<()>;

    fn command_queue(&self) -> Result<CommandQueue>;

    fn set_command_queue(&mut self, queue: CommandQueue) -> Result<()>;

    /// Runs on the queue of `other`.
    fn share_command_queue(&mut self, other: &dyn NetworkBackend) -> Result<()> {
        let queue = other.command_queue()?;
        self.set_command_queue(queue)
    }

    fn state(&self) -> NetworkState;
}
