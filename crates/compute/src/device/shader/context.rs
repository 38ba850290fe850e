use crate::{default_backend, CommandQueue, ComputeBackend, ComputeError, DeviceContext, DeviceType, Precision, Result};
use std::sync::Arc;

/// Context of the shader device; its queue is a [`ComputeBackend`].
pub struct ShaderContext {
    backend: Option<Arc<dyn ComputeBackend>>,
    precision: Precision,
    device_id: Option<i32>,
}

impl ShaderContext {
    #[must_use]
    pub fn new() -> Self {
        Self { backend: None, precision: Precision::default(), device_id: None }
    }

    /// Context running on a given queue instead of the default one.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn ComputeBackend>) -> Self {
        Self { backend: Some(backend), precision: Precision::default(), device_id: None }
    }

    pub fn backend(&self) -> Result<&Arc<dyn ComputeBackend>> {
        self.backend
            .as_ref()
            .ok_or_else(|| ComputeError::NullParam("shader context has no queue, call setup first".into()))
    }

    #[must_use]
    pub fn device_id(&self) -> Option<i32> {
        self.device_id
    }

    fn settle_precision(&mut self) {
        let Some(backend) = &self.backend else { return };
        if self.precision != Precision::High && !backend.supports_half() {
            tracing::warn!(queue = backend.name(), "half precision unavailable, running at high precision");
            self.precision = Precision::High;
        }
    }
}

impl Default for ShaderContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceContext for ShaderContext {
    fn device_type(&self) -> DeviceType {
        DeviceType::Shader
    }

    fn setup(&mut self, device_id: i32) -> Result<()> {
        if self.backend.is_none() {
            self.backend = Some(default_backend());
        }
        self.device_id = Some(device_id);
        self.settle_precision();
        tracing::debug!(device_id, queue = ?self.backend.as_ref().map(|b| b.name()), "shader context ready");
        Ok(())
    }

    fn command_queue(&self) -> Result<CommandQueue> {
        Ok(CommandQueue::Shader(self.backend()?.clone()))
    }

    fn set_command_queue(&mut self, queue: CommandQueue) -> Result<()> {
        match queue {
            CommandQueue::Shader(backend) => {
                self.backend = Some(backend);
                self.settle_precision();
                Ok(())
            }
            other => Err(ComputeError::Param(format!("shader context cannot run on {other:?}"))),
        }
    }

    fn synchronize(&self) -> Result<()> {
        // Dispatch reads results back before returning.
        self.backend().map(|_| ())
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn set_precision(&mut self, precision: Precision) {
        self.precision = precision;
        self.settle_precision();
    }
}
