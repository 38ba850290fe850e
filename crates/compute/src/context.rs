//! Device contexts.
//!
//! A [`DeviceContext`] owns a device's execution queue. Consumers only see
//! this narrow interface and the tagged [`CommandQueue`]; they never cast a
//! context to a concrete device type.

use crate::{ComputeBackend, ComputeError, DeviceType, Precision, Result};
use std::sync::Arc;

/// The native execution queue of a context.
#[derive(Clone)]
pub enum CommandQueue {
    /// Host devices execute synchronously on the calling thread.
    Host,
    /// Shader dispatch queue.
    Shader(Arc<dyn ComputeBackend>),
    /// Accelerator-runtime context and stream handles.
    Npu { context: u64, stream: u64 },
    #[cfg(feature = "gpu")]
    Gpu(Arc<crate::GpuQueue>),
}

impl CommandQueue {
    #[must_use]
    pub fn device_type(&self) -> Option<DeviceType> {
        match self {
            Self::Host => None,
            Self::Shader(_) => Some(DeviceType::Shader),
            Self::Npu { .. } => Some(DeviceType::Npu),
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => Some(DeviceType::Gpu),
        }
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => f.write_str("Host"),
            Self::Shader(backend) => f.debug_tuple("Shader").field(&backend.name()).finish(),
            Self::Npu { context, stream } => f
                .debug_struct("Npu")
                .field("context", &format_args!("{context:#x}"))
                .field("stream", &format_args!("{stream:#x}"))
                .finish(),
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => f.write_str("Gpu"),
        }
    }
}

pub trait DeviceContext: Send + Sync {
    fn device_type(&self) -> DeviceType;

    /// Acquires the device and creates the execution queue.
    fn setup(&mut self, device_id: i32) -> Result<()>;

    fn command_queue(&self) -> Result<CommandQueue>;

    /// Replaces the execution queue, e.g. with one owned by another instance.
    fn set_command_queue(&mut self, queue: CommandQueue) -> Result<()>;

    /// Runs on the same queue as `other`, which must drive the same device.
    fn share_command_queue(&mut self, other: &dyn DeviceContext) -> Result<()> {
        if other.device_type() != self.device_type() {
            return Err(ComputeError::Param(format!(
                "cannot share a {} queue with a {} context",
                other.device_type(),
                self.device_type()
            )));
        }
        let queue = other.command_queue()?;
        self.set_command_queue(queue)
    }

    /// Blocks until all work enqueued on the queue has completed.
    fn synchronize(&self) -> Result<()>;

    fn precision(&self) -> Precision;

    fn set_precision(&mut self, precision: Precision);

    fn on_forward_begin(&self) -> Result<()> {
        Ok(())
    }

    fn on_forward_end(&self) -> Result<()> {
        Ok(())
    }
}

/// Context for devices that run on the calling thread (`Cpu`, `Arm`).
#[derive(Debug, Clone)]
pub struct HostContext {
    device_type: DeviceType,
    precision: Precision,
    device_id: Option<i32>,
}

impl HostContext {
    #[must_use]
    pub fn new(device_type: DeviceType) -> Self {
        Self { device_type, precision: Precision::High, device_id: None }
    }

    #[must_use]
    pub fn device_id(&self) -> Option<i32> {
        self.device_id
    }
}

impl DeviceContext for HostContext {
    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn setup(&mut self, device_id: i32) -> Result<()> {
        if !matches!(self.device_type, DeviceType::Cpu | DeviceType::Arm) {
            return Err(ComputeError::DeviceNotSupported(format!(
                "{} is not a host device",
                self.device_type
            )));
        }
        tracing::debug!(device = %self.device_type, device_id, "host context ready");
        self.device_id = Some(device_id);
        Ok(())
    }

    fn command_queue(&self) -> Result<CommandQueue> {
        Ok(CommandQueue::Host)
    }

    fn set_command_queue(&mut self, queue: CommandQueue) -> Result<()> {
        match queue {
            CommandQueue::Host => Ok(()),
            other => Err(ComputeError::Param(format!("host context cannot run on {other:?}"))),
        }
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn set_precision(&mut self, precision: Precision) {
        self.precision = precision;
    }
}
