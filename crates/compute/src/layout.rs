use crate::Kernel;

pub const STORAGE_IN: u32 = 0;
pub const STORAGE_IN2: u32 = 1; // binary ops
pub const STORAGE_OUT: u32 = 2;
pub const UNIFORM_CFG: u32 = 3; // broadcast + element config

const _: () = assert!(STORAGE_OUT == 2);

/// Return expected number of bindings for each kernel.
#[must_use]
pub const fn binding_count(kernel: &Kernel) -> u32 {
    match kernel {
        Kernel::Add | Kernel::Sub | Kernel::Mul | Kernel::Div | Kernel::Max | Kernel::Min => 4,
    }
}

#[must_use]
pub const fn is_uniform(_kernel: &Kernel, binding: u32) -> bool {
    binding == UNIFORM_CFG
}

/// Bindings the kernel only reads; everything else is read back after dispatch.
#[must_use]
pub const fn is_read_only(kernel: &Kernel, binding: u32) -> bool {
    binding != STORAGE_OUT || binding >= binding_count(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_kernels_bind_two_inputs_an_output_and_config() {
        for kernel in [Kernel::Add, Kernel::Sub, Kernel::Mul, Kernel::Div, Kernel::Max, Kernel::Min] {
            assert_eq!(binding_count(&kernel), 4);
            assert!(is_read_only(&kernel, STORAGE_IN));
            assert!(is_read_only(&kernel, STORAGE_IN2));
            assert!(!is_read_only(&kernel, STORAGE_OUT));
            assert!(is_uniform(&kernel, UNIFORM_CFG));
        }
    }
}
