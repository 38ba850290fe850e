use super::driver::{native_call, ContextHandle, NativeResult, NpuDriver, StreamHandle};
use super::runtime::NpuRuntime;
use compute::{CommandQueue, ComputeError, DeviceContext, DeviceType, Precision, Result};
use std::sync::Arc;
use tracing::{debug, warn};

struct ContextGuard {
    driver: Arc<dyn NpuDriver>,
    handle: Option<ContextHandle>,
}

impl ContextGuard {
    fn release(&mut self) -> NativeResult<()> {
        let Some(handle) = self.handle.take() else { return Ok(()) };
        debug!(context = handle.0, "destroy context");
        self.driver.destroy_context(handle)
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(%err, "destroy context failed");
        }
    }
}

struct StreamGuard {
    driver: Arc<dyn NpuDriver>,
    handle: Option<StreamHandle>,
}

impl StreamGuard {
    fn release(&mut self) -> NativeResult<()> {
        let Some(handle) = self.handle.take() else { return Ok(()) };
        debug!(stream = handle.0, "destroy stream");
        self.driver.destroy_stream(handle)
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(%err, "destroy stream failed");
        }
    }
}

/// Context and stream of the accelerator runtime.
///
/// The native context is bound per thread, so every entry point that issues
/// native calls first runs [`NpuContext::make_current`].
pub struct NpuContext {
    runtime: Arc<NpuRuntime>,
    precision: Precision,
    device_id: Option<i32>,
    // Stream goes before the context it was created in.
    stream: Option<StreamGuard>,
    context: Option<ContextGuard>,
    queue: Option<(ContextHandle, StreamHandle)>,
}

impl NpuContext {
    #[must_use]
    pub fn new(runtime: Arc<NpuRuntime>) -> Self {
        Self { runtime, precision: Precision::default(), device_id: None, stream: None, context: None, queue: None }
    }

    #[must_use]
    pub fn device_id(&self) -> Option<i32> {
        self.device_id
    }

    fn queue(&self) -> Result<(ContextHandle, StreamHandle)> {
        self.queue.ok_or_else(|| ComputeError::NullParam("npu context has no stream, call setup first".into()))
    }

    /// Binds the context to the calling thread.
    pub fn make_current(&self) -> Result<()> {
        let (context, _) = self.queue()?;
        self.runtime.driver().set_current_context(context).map_err(native_call("set context"))
    }

    /// Destroys the owned stream, then the owned context.
    pub fn release(&mut self) -> Result<()> {
        self.queue = None;
        let stream = self.stream.take().map_or(Ok(()), |mut s| s.release());
        let context = self.context.take().map_or(Ok(()), |mut c| c.release());
        stream.map_err(native_call("destroy stream"))?;
        context.map_err(native_call("destroy context"))
    }
}

impl DeviceContext for NpuContext {
    fn device_type(&self) -> DeviceType {
        DeviceType::Npu
    }

    fn setup(&mut self, device_id: i32) -> Result<()> {
        self.runtime.set_device(device_id)?;
        let driver = self.runtime.driver().clone();
        let handle = driver.create_context(device_id).map_err(native_call("create context"))?;
        let context = ContextGuard { driver: driver.clone(), handle: Some(handle) };
        let stream_handle = driver.create_stream().map_err(native_call("create stream"))?;
        let stream = StreamGuard { driver, handle: Some(stream_handle) };
        debug!(device_id, context = handle.0, stream = stream_handle.0, "npu context ready");

        self.queue = Some((handle, stream_handle));
        self.stream = Some(stream);
        self.context = Some(context);
        self.device_id = Some(device_id);
        Ok(())
    }

    fn command_queue(&self) -> Result<CommandQueue> {
        let (context, stream) = self.queue()?;
        Ok(CommandQueue::Npu { context: context.0, stream: stream.0 })
    }

    /// Runs on another instance's stream; the owned one is released.
    fn set_command_queue(&mut self, queue: CommandQueue) -> Result<()> {
        let CommandQueue::Npu { context, stream } = &queue else {
            return Err(ComputeError::Param(format!("npu context cannot run on {queue:?}")));
        };
        if let Err(err) = self.release() {
            warn!(%err, "release own stream before sharing failed");
        }
        self.queue = Some((ContextHandle(*context), StreamHandle(*stream)));
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        let (_, stream) = self.queue()?;
        self.runtime.driver().synchronize_stream(stream).map_err(native_call("synchronize stream"))
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn set_precision(&mut self, precision: Precision) {
        self.precision = precision;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npu::{Faults, SimulatedNpu};

    #[test]
    fn stream_failure_destroys_the_new_context() {
        let driver = Arc::new(SimulatedNpu::new());
        driver.set_faults(Faults { create_stream: true, ..Faults::default() });
        let mut ctx = NpuContext::new(NpuRuntime::new(driver.clone()));
        let err = ctx.setup(0).unwrap_err();
        assert_eq!(err.kind(), compute::ErrorKind::Runtime);
        assert_eq!(driver.live_contexts(), 0);
        assert!(ctx.command_queue().is_err());
    }

    #[test]
    fn sharing_a_queue_releases_the_own_stream() {
        let driver = Arc::new(SimulatedNpu::new());
        let runtime = NpuRuntime::new(driver.clone());
        let mut a = NpuContext::new(runtime.clone());
        let mut b = NpuContext::new(runtime);
        a.setup(0).unwrap();
        b.setup(0).unwrap();
        assert_eq!(driver.live_streams(), 2);

        b.share_command_queue(&a).unwrap();
        assert_eq!(b.command_queue().unwrap().device_type(), Some(DeviceType::Npu));
        assert_eq!(format!("{:?}", b.command_queue().unwrap()), format!("{:?}", a.command_queue().unwrap()));
        assert_eq!(driver.live_streams(), 1);
        b.synchronize().unwrap();
        b.make_current().unwrap();
        assert!(b.set_command_queue(CommandQueue::Host).is_err());
    }
}
