//! The image conversion contract every device implements.

use crate::params::{ColorConversion, CropParam, PasteParam, ResizeParam, WarpAffineParam};
use crate::Mat;
use compute::{ComputeError, Result};

pub type SrcMat<'a> = Mat<&'a [u8]>;
pub type DstMat<'a> = Mat<&'a mut [u8]>;

/// Device implementation of the image conversions.
///
/// A combination the device does not implement fails with a parameter error
/// naming it and leaves `dst` untouched.
pub trait MatConverterAcc: Send + Sync {
    fn copy(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>) -> Result<()>;

    fn resize(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &ResizeParam) -> Result<()>;

    fn crop(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &CropParam) -> Result<()>;

    fn warp_affine(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &WarpAffineParam) -> Result<()>;

    fn cvt_color(&self, src: &SrcMat<'_>, dst: &mut DstMat<'_>, conversion: ColorConversion) -> Result<()>;

    fn resize_and_paste(
        &self,
        src: &SrcMat<'_>,
        dst: &mut DstMat<'_>,
        param: &ResizeParam,
        paste: &PasteParam,
    ) -> Result<()>;

    fn concat_mat_with_batch(&self, srcs: &[SrcMat<'_>], dst: &mut DstMat<'_>) -> Result<()>;
}

/// Sanity checks shared by every conversion.
pub fn check_mat_converter_params(src: &SrcMat<'_>, dst: &DstMat<'_>, check_same_device: bool) -> Result<()> {
    if src.byte_size() == 0 {
        return Err(ComputeError::NullParam("src mat is empty".into()));
    }
    if check_same_device && src.device_type() != dst.device_type() {
        return Err(ComputeError::Param(format!(
            "src and dst mat device differ: {} vs {}",
            src.device_type(),
            dst.device_type()
        )));
    }
    if src.batch() != dst.batch() {
        return Err(ComputeError::Param(format!(
            "src and dst mat batch differ: {} vs {}",
            src.batch(),
            dst.batch()
        )));
    }
    Ok(())
}

/// Rejects a zero-sized destination.
pub fn check_dst_size(dst: &DstMat<'_>) -> Result<()> {
    if dst.width() == 0 || dst.height() == 0 {
        return Err(ComputeError::InvalidInput("dst size is zero".into()));
    }
    Ok(())
}

/// Destination must have the source's pixel type.
pub(crate) fn check_same_type(src: &SrcMat<'_>, dst: &DstMat<'_>) -> Result<()> {
    if src.mat_type() != dst.mat_type() {
        return Err(ComputeError::Param(format!(
            "src mat is {:?} but dst mat is {:?}",
            src.mat_type(),
            dst.mat_type()
        )));
    }
    Ok(())
}

pub(crate) fn check_copy_size(src: &SrcMat<'_>, dst: &DstMat<'_>) -> Result<()> {
    if dst.byte_size() < src.byte_size() {
        return Err(ComputeError::Param(format!(
            "dst mat holds {} bytes, src needs {}",
            dst.byte_size(),
            src.byte_size()
        )));
    }
    Ok(())
}

pub(crate) fn check_crop(src: &SrcMat<'_>, dst: &DstMat<'_>, param: &CropParam) -> Result<()> {
    let beyond = |origin: usize, extent: usize, limit: usize| origin.checked_add(extent).map_or(true, |end| end > limit);
    if beyond(param.top_left_x, param.width, src.width()) || beyond(param.top_left_y, param.height, src.height()) {
        return Err(ComputeError::Param(format!("crop {param:?} exceeds src {:?}", src.dims())));
    }
    if param.width > dst.width() || param.height > dst.height() {
        return Err(ComputeError::Param(format!("crop {param:?} does not fit dst {:?}", dst.dims())));
    }
    if src.mat_type().is_yuv420sp()
        && (param.top_left_x % 2 != 0 || param.top_left_y % 2 != 0 || param.width % 2 != 0 || param.height % 2 != 0)
    {
        return Err(ComputeError::param("corp param can not be odd"));
    }
    Ok(())
}

/// Channel count and pixel layout check for a color conversion.
pub(crate) fn cvt_color_layout(
    src: &SrcMat<'_>,
    dst: &DstMat<'_>,
    conversion: ColorConversion,
) -> Result<()> {
    use crate::MatType::{Bgr, Bgra, Gray, Nv12, Nv21};
    let (from, to) = match conversion {
        ColorConversion::Nv12ToBgr => (Nv12, Bgr),
        ColorConversion::Nv21ToBgr => (Nv21, Bgr),
        ColorConversion::Nv12ToBgra => (Nv12, Bgra),
        ColorConversion::Nv21ToBgra => (Nv21, Bgra),
        ColorConversion::BgrToGray => (Bgr, Gray),
        ColorConversion::BgraToGray => (Bgra, Gray),
    };
    if src.mat_type() != from || dst.mat_type() != to {
        return Err(ComputeError::Param(format!(
            "{conversion:?} needs {from:?} -> {to:?}, got {:?} -> {:?}",
            src.mat_type(),
            dst.mat_type()
        )));
    }
    if src.width() != dst.width() || src.height() != dst.height() {
        return Err(ComputeError::Param(format!(
            "color conversion keeps the size: {:?} vs {:?}",
            src.dims(),
            dst.dims()
        )));
    }
    Ok(())
}
