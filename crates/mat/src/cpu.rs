//! Reference converter of the host device; implements the whole set.

use crate::converter::{
    check_copy_size, check_crop, check_dst_size, check_mat_converter_params, check_same_type, cvt_color_layout,
    DstMat, MatConverterAcc, SrcMat,
};
use crate::host;
use crate::params::{ColorConversion, CropParam, PasteParam, ResizeParam, WarpAffineParam};
use crate::MatType;
use compute::{ComputeError, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct CpuMatConverter;

impl CpuMatConverter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn require_pixels(src: &SrcMat<'_>, op: &str) -> Result<()> {
    if matches!(src.mat_type(), MatType::NchwFloat | MatType::NcInt32) {
        return Err(ComputeError::Param(format!("{op} of {:?} mat not support yet", src.mat_type())));
    }
    Ok(())
}

impl MatConverterAcc for CpuMatConverter {
    fn copy(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>) -> Result<()> {
        check_mat_converter_params(src, dst, false)?;
        check_same_type(src, dst)?;
        check_copy_size(src, dst)?;
        host::copy(src, dst);
        Ok(())
    }

    fn resize(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &ResizeParam) -> Result<()> {
        check_mat_converter_params(src, dst, true)?;
        check_dst_size(dst)?;
        require_pixels(src, "resize")?;
        check_same_type(src, dst)?;
        host::resize(src, dst, param.interp);
        Ok(())
    }

    fn crop(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &CropParam) -> Result<()> {
        check_mat_converter_params(src, dst, true)?;
        require_pixels(src, "crop")?;
        check_same_type(src, dst)?;
        check_crop(src, dst, param)?;
        host::crop(src, dst, param);
        Ok(())
    }

    fn warp_affine(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &WarpAffineParam) -> Result<()> {
        check_mat_converter_params(src, dst, true)?;
        check_dst_size(dst)?;
        require_pixels(src, "warpaffine")?;
        check_same_type(src, dst)?;
        host::warp_affine(src, dst, param)
    }

    fn cvt_color(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>, conversion: ColorConversion) -> Result<()> {
        check_mat_converter_params(src, dst, true)?;
        cvt_color_layout(src, dst, conversion)?;
        host::cvt_color(src, dst, conversion);
        Ok(())
    }

    fn resize_and_paste(
        &self,
        src: &SrcMat<'_>,
        dst: &mut DstMat<'_>,
        param: &ResizeParam,
        paste: &PasteParam,
    ) -> Result<()> {
        check_mat_converter_params(src, dst, true)?;
        check_dst_size(dst)?;
        if !matches!(src.mat_type(), MatType::Gray | MatType::Bgr | MatType::Bgra) {
            return Err(ComputeError::Param(format!("ResizeAndPaste of {:?} mat not support yet", src.mat_type())));
        }
        check_same_type(src, dst)?;
        host::resize_and_paste(src, dst, (param.scale_w, param.scale_h), param.interp, paste)
    }

    fn concat_mat_with_batch(&self, srcs: &[SrcMat<'_>], dst: &mut DstMat<'_>) -> Result<()> {
        let Some(first) = srcs.first() else {
            return Err(ComputeError::param("no mat to concat"));
        };
        let mut batch = 0;
        for src in srcs {
            if src.mat_type() != dst.mat_type() || src.dims()[1..] != dst.dims()[1..] {
                return Err(ComputeError::Param(format!(
                    "cannot concat {:?} {:?} into {:?} {:?}",
                    src.mat_type(),
                    src.dims(),
                    dst.mat_type(),
                    dst.dims()
                )));
            }
            batch += src.batch();
        }
        if batch != dst.batch() {
            return Err(ComputeError::Param(format!(
                "concat of {batch} images into a dst batch of {}",
                dst.batch()
            )));
        }
        tracing::debug!(count = srcs.len(), mat_type = ?first.mat_type(), "concat mats along batch");
        host::concat_mat_with_batch(srcs, dst);
        Ok(())
    }
}
