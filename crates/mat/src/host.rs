//! Batch loops over host memory shared by the host-side converters.

use crate::converter::{DstMat, SrcMat};
use crate::kernels::{self, Plane, Warp};
use crate::params::{ColorConversion, CropParam, Interpolation, PasteParam, PasteType, WarpAffineParam};
use crate::MatType;
use compute::{ComputeError, Result};

/// Packed planes making up one image of `mat_type`: (plane, byte offset).
fn planes(mat_type: MatType, width: usize, height: usize) -> Vec<(Plane, usize)> {
    match mat_type {
        MatType::Nv12 | MatType::Nv21 => {
            vec![(Plane::new(width, height, 1), 0), (Plane::new(width / 2, height / 2, 2), width * height)]
        }
        other => vec![(Plane::new(width, height, other.channels().unwrap_or(1)), 0)],
    }
}

pub fn copy(src: &SrcMat<'_>, dst: &mut DstMat<'_>) {
    let size = src.byte_size();
    dst.data_mut()[..size].copy_from_slice(src.data());
}

pub fn resize(src: &SrcMat<'_>, dst: &mut DstMat<'_>, interp: Interpolation) {
    let (src_size, dst_size) = (src.plane_size(), dst.plane_size());
    let src_planes = planes(src.mat_type(), src.width(), src.height());
    let dst_planes = planes(dst.mat_type(), dst.width(), dst.height());
    let src_data = src.data();
    let dst_data = dst.data_mut();
    for b in 0..src.batch() {
        let s = &src_data[b * src_size..(b + 1) * src_size];
        let d = &mut dst_data[b * dst_size..(b + 1) * dst_size];
        for (&(sp, so), &(dp, doff)) in src_planes.iter().zip(&dst_planes) {
            kernels::resize(&s[so..so + sp.len()], sp, &mut d[doff..doff + dp.len()], dp, interp);
        }
    }
}

pub fn crop(src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &CropParam) {
    let (src_size, dst_size) = (src.plane_size(), dst.plane_size());
    let elem = src.mat_type().channels().unwrap_or(1);
    let (sw, dw) = (src.width(), dst.width());
    let yuv = src.mat_type().is_yuv420sp();
    let (sh, dh) = (src.height(), dst.height());
    let src_data = src.data();
    let dst_data = dst.data_mut();
    for b in 0..src.batch() {
        let s = &src_data[b * src_size..(b + 1) * src_size];
        let d = &mut dst_data[b * dst_size..(b + 1) * dst_size];
        if yuv {
            let start = param.top_left_x + param.top_left_y * sw;
            kernels::copy_2d(&s[start..], sw, d, dw, param.width, param.height);
            let start = sw * sh + param.top_left_x + param.top_left_y / 2 * sw;
            kernels::copy_2d(&s[start..], sw, &mut d[dw * dh..], dw, param.width, param.height / 2);
        } else {
            let start = (param.top_left_x + param.top_left_y * sw) * elem;
            kernels::copy_2d(&s[start..], sw * elem, d, dw * elem, param.width * elem, param.height);
        }
    }
}

pub fn warp_affine(src: &SrcMat<'_>, dst: &mut DstMat<'_>, param: &WarpAffineParam) -> Result<()> {
    let inverse = kernels::invert_affine(param.transform)
        .ok_or_else(|| ComputeError::Param(format!("warp transform {:?} is singular", param.transform)))?;
    let border_val = param.border_val.round().clamp(0.0, 255.0) as u8;
    let luma = Warp { inverse, interp: param.interp, border: param.border, border_val };
    // Chroma planes run at half resolution, which halves the translation.
    let [[a, b, c], [d, e, f]] = inverse;
    let chroma = Warp { inverse: [[a, b, c / 2.0], [d, e, f / 2.0]], ..luma };

    let (src_size, dst_size) = (src.plane_size(), dst.plane_size());
    let src_planes = planes(src.mat_type(), src.width(), src.height());
    let dst_planes = planes(dst.mat_type(), dst.width(), dst.height());
    let src_data = src.data();
    let dst_data = dst.data_mut();
    for n in 0..src.batch() {
        let s = &src_data[n * src_size..(n + 1) * src_size];
        let t = &mut dst_data[n * dst_size..(n + 1) * dst_size];
        for (i, (&(sp, so), &(dp, doff))) in src_planes.iter().zip(&dst_planes).enumerate() {
            let warp = if i == 0 { &luma } else { &chroma };
            kernels::warp_affine(&s[so..so + sp.len()], sp, &mut t[doff..doff + dp.len()], dp, warp);
        }
    }
    Ok(())
}

pub fn cvt_color(src: &SrcMat<'_>, dst: &mut DstMat<'_>, conversion: ColorConversion) {
    let (width, height) = (src.width(), src.height());
    let (src_size, dst_size) = (src.plane_size(), dst.plane_size());
    let src_data = src.data();
    let dst_data = dst.data_mut();
    for b in 0..src.batch() {
        let s = &src_data[b * src_size..(b + 1) * src_size];
        let d = &mut dst_data[b * dst_size..(b + 1) * dst_size];
        match conversion {
            ColorConversion::Nv12ToBgr => kernels::yuv420sp_to_bgr(s, width, height, d, 3, false),
            ColorConversion::Nv21ToBgr => kernels::yuv420sp_to_bgr(s, width, height, d, 3, true),
            ColorConversion::Nv12ToBgra => kernels::yuv420sp_to_bgr(s, width, height, d, 4, false),
            ColorConversion::Nv21ToBgra => kernels::yuv420sp_to_bgr(s, width, height, d, 4, true),
            ColorConversion::BgrToGray => kernels::bgr_to_gray(s, width * height, 3, d),
            ColorConversion::BgraToGray => kernels::bgr_to_gray(s, width * height, 4, d),
        }
    }
}

/// Resizes `src` by the param scales and pastes it into `dst`, padding the rest.
pub fn resize_and_paste(
    src: &SrcMat<'_>,
    dst: &mut DstMat<'_>,
    scale: (f32, f32),
    interp: Interpolation,
    paste: &PasteParam,
) -> Result<()> {
    let channels = src.channels();
    let width = ((src.width() as f32 * scale.0).round() as usize).min(dst.width());
    let height = ((src.height() as f32 * scale.1).round() as usize).min(dst.height());
    if width == 0 || height == 0 {
        return Err(ComputeError::InvalidInput(format!("resize scales {scale:?} give an empty image")));
    }
    let (x0, y0) = match paste.paste_type {
        PasteType::TopLeft => (0, 0),
        PasteType::Center => ((dst.width() - width) / 2, (dst.height() - height) / 2),
    };

    let sp = Plane::new(src.width(), src.height(), channels);
    let rp = Plane::new(width, height, channels);
    let mut resized = vec![0u8; rp.len()];
    let (src_size, dst_size, dst_width) = (src.plane_size(), dst.plane_size(), dst.width());
    let src_data = src.data();
    let dst_data = dst.data_mut();
    dst_data.fill(paste.pad_value);
    for b in 0..src.batch() {
        kernels::resize(&src_data[b * src_size..(b + 1) * src_size], sp, &mut resized, rp, interp);
        let d = &mut dst_data[b * dst_size..(b + 1) * dst_size];
        let start = (y0 * dst_width + x0) * channels;
        kernels::copy_2d(&resized, width * channels, &mut d[start..], dst_width * channels, width * channels, height);
    }
    Ok(())
}

/// Stacks `srcs` along the batch axis of `dst`.
pub fn concat_mat_with_batch(srcs: &[SrcMat<'_>], dst: &mut DstMat<'_>) {
    let mut offset = 0;
    let dst_data = dst.data_mut();
    for src in srcs {
        let size = src.byte_size();
        dst_data[offset..offset + size].copy_from_slice(src.data());
        offset += size;
    }
}
