#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::many_single_char_names
)]

//! Image pre/post-processing: pixel buffers ([`Mat`]) and the per-device
//! conversion kernels (copy, resize, crop, affine warp, color conversion,
//! resize-and-paste, batch concatenation).

pub mod arm;
pub mod converter;
pub mod cpu;
mod host;
pub mod kernels;
pub mod mat;
pub mod params;
pub mod registry;
pub mod utils;

pub use arm::ArmMatConverter;
pub use converter::{check_dst_size, check_mat_converter_params, DstMat, MatConverterAcc, SrcMat};
pub use cpu::CpuMatConverter;
pub use mat::{Mat, MatType};
pub use params::{
    BorderType, ColorConversion, CropParam, Interpolation, PasteParam, PasteType, ResizeParam, WarpAffineParam,
};
pub use registry::MatConverterRegistry;
