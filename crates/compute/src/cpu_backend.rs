use crate::{kernels, BufferView, ComputeBackend, ComputeError, Kernel};

/// Reference shader queue: runs every kernel on the host.
#[derive(Default, Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ComputeBackend for CpuBackend {
    fn dispatch(
        &self,
        shader: &Kernel,
        binds: &[BufferView],
        _workgroups: [u32; 3],
    ) -> Result<Vec<Vec<u8>>, ComputeError> {
        for buffer_view in binds {
            let expected_bytes = buffer_view.element_count() * buffer_view.element_size_in_bytes;
            if buffer_view.data.len() != expected_bytes {
                return Err(ComputeError::ShapeMismatch(
                    "Buffer data length does not match product of shape dimensions and element size",
                ));
            }
        }
        match shader {
            Kernel::Add | Kernel::Sub | Kernel::Mul | Kernel::Div | Kernel::Max | Kernel::Min => {
                kernels::handle_binary(*shader, binds)
            }
        }
    }

    fn supports_half(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}
