//! Host reference accelerators.

pub mod binary;
pub mod cumsum;
pub mod reshape;

pub use binary::CpuBinaryAcc;
pub use cumsum::CpuCumsumAcc;
pub use reshape::CpuReshapeAcc;
