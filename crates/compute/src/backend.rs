use crate::{BufferView, ComputeError, Kernel};

pub trait ComputeBackend: Send + Sync + 'static {
    /// Dispatches a compute kernel with the given bindings and workgroup configuration.
    ///
    /// # Arguments
    /// * `shader`: The kernel to dispatch.
    /// * `binds`: Buffers in binding order, see [`crate::layout`].
    /// * `workgroups`: The number of workgroups to dispatch.
    ///
    /// # Returns
    ///
    /// The bytes of every buffer the kernel writes, in binding order.
    /// Returns `ComputeError::ShapeMismatch` if any input buffers are invalid.
    fn dispatch(
        &self,
        shader: &Kernel,
        binds: &[BufferView],
        workgroups: [u32; 3],
    ) -> Result<Vec<Vec<u8>>, ComputeError>;

    /// Whether kernels accept half-precision storage.
    fn supports_half(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}
