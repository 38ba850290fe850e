// This module re-exports handlers for each kernel operation.

// Element-wise operations
pub mod binary_op;
pub use binary_op::{handle_binary, BinaryConfig};
