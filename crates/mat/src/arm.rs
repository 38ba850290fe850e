//! Converter of the mobile vector device.
//!
//! Only linear warps with a constant border are implemented, and resize and
//! paste / batch concatenation are not available at all.

use crate::converter::{
    check_copy_size, check_crop, check_dst_size, check_mat_converter_params, check_same_type, cvt_color_layout,
    DstMat, MatConverterAcc, SrcMat,
};
use crate::host;
use crate::params::{BorderType, ColorConversion, CropParam, Interpolation, PasteParam, ResizeParam, WarpAffineParam};
use crate::MatType;
use compute::{ComputeError, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct ArmMatConverter;

impl ArmMatConverter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn unsupported_type(mat_type: MatType) -> ComputeError {
    ComputeError::Param(format!("convert type {mat_type:?} not support yet"))
}

fn is_image(mat_type: MatType) -> bool {
    matches!(mat_type, MatType::Gray | MatType::Bgr | MatType::Bgra | MatType::Nv12 | MatType::Nv21)
}

impl MatConverterAcc for ArmMatConverter {
    fn copy(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>) -> Result<()> {
        check_mat_converter_params(src, dst, false)?;
        if !is_image(src.mat_type()) && src.mat_type() != MatType::NchwFloat {
            return Err(unsupported_type(src.mat_type()));
        }
        check_same_type(src, dst)?;
        check_copy_size(src, dst)?;
        host::copy(src, dst);
        Ok(())
    }

    fn resize(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &ResizeParam) -> Result<()> {
        check_mat_converter_params(src, dst, true)?;
        check_dst_size(dst)?;
        if !is_image(src.mat_type()) {
            return Err(unsupported_type(src.mat_type()));
        }
        check_same_type(src, dst)?;
        host::resize(src, dst, param.interp);
        Ok(())
    }

    fn crop(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &CropParam) -> Result<()> {
        check_mat_converter_params(src, dst, true)?;
        if !is_image(src.mat_type()) {
            return Err(unsupported_type(src.mat_type()));
        }
        check_same_type(src, dst)?;
        check_crop(src, dst, param)?;
        host::crop(src, dst, param);
        Ok(())
    }

    fn warp_affine(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &WarpAffineParam) -> Result<()> {
        check_mat_converter_params(src, dst, true)?;
        check_dst_size(dst)?;
        if !is_image(src.mat_type()) {
            return Err(unsupported_type(src.mat_type()));
        }
        if param.interp != Interpolation::Linear || param.border != BorderType::Constant {
            return Err(ComputeError::Param(format!(
                "warpaffine type {:?} with {:?} border not support yet",
                param.interp, param.border
            )));
        }
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
        _src: &SrcMat<'_>,
        _dst: &mut DstMat<'_>,
        _param: &ResizeParam,
        _paste: &PasteParam,
    ) -> Result<()> {
        Err(ComputeError::NotSupported("ResizeAndPaste conversion is not supported on arm".into()))
    }

    fn concat_mat_with_batch(&self, _srcs: &[SrcMat<'_>], _dst: &mut DstMat<'_>) -> Result<()> {
        Err(ComputeError::NotSupported("ConcatMatWithBatch conversion is not supported on arm".into()))
    }
}
