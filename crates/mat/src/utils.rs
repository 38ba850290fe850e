//! Conversion entry points; each call runs on the converter of the source
//! mat's device.

use crate::converter::{DstMat, SrcMat};
use crate::params::{ColorConversion, CropParam, PasteParam, ResizeParam, WarpAffineParam};
use crate::MatConverterRegistry;
use compute::{ComputeError, Result};
use std::sync::Arc;

fn converter(src: &SrcMat<'_>) -> Result<Arc<dyn crate::MatConverterAcc>> {
    MatConverterRegistry::global().get(src.device_type())
}

pub fn copy(src: &SrcMat<'_>, dst: &mut DstMat<'_>) -> Result<()> {
    converter(src)?.copy(src, dst)
}

pub fn resize(src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &ResizeParam) -> Result<()> {
    converter(src)?.resize(src, dst, param)
}

pub fn crop(src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &CropParam) -> Result<()> {
    converter(src)?.crop(src, dst, param)
}

pub fn warp_affine(src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &WarpAffineParam) -> Result<()> {
    converter(src)?.warp_affine(src, dst, param)
}

pub fn cvt_color(src: &SrcMat<'_>, dst: &mut DstMat<'_>, conversion: ColorConversion) -> Result<()> {
    converter(src)?.cvt_color(src, dst, conversion)
}

pub fn resize_and_paste(
    src: &SrcMat<'_>,
    dst: &mut DstMat<'_>,
    param: &ResizeParam,
    paste: &PasteParam,
) -> Result<()> {
    converter(src)?.resize_and_paste(src, dst, param, paste)
}

pub fn concat_mat_with_batch(srcs: &[SrcMat<'_>], dst: &mut DstMat<'_>) -> Result<()> {
    let first = srcs.first().ok_or_else(|| ComputeError::param("no mat to concat"))?;
    converter(first)?.concat_mat_with_batch(srcs, dst)
}
