//! Shader-based compute device.

pub mod binary;
pub mod context;

pub use binary::ShaderBinaryAcc;
pub use context::ShaderContext;
