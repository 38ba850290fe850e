//! Per-device contexts and accelerators.

pub mod cpu;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod shader;
