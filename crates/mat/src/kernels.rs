//! Scalar pixel kernels over packed 8-bit planes.
//!
//! Every kernel processes a single image; converters loop over the batch.

use crate::params::{BorderType, Interpolation};

/// Copies `rows` rows of `row_bytes` between buffers of different strides.
pub fn copy_2d(src: &[u8], src_stride: usize, dst: &mut [u8], dst_stride: usize, row_bytes: usize, rows: usize) {
    for y in 0..rows {
        let s = y * src_stride;
        let d = y * dst_stride;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}

/// Geometry of one packed plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl Plane {
    #[must_use]
    pub const fn new(width: usize, height: usize, channels: usize) -> Self {
        Self { width, height, channels }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.width * self.height * self.channels
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    const fn at(&self, x: usize, y: usize) -> usize {
        (y * self.width + x) * self.channels
    }
}

fn round_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

pub fn resize_nearest(src: &[u8], sp: Plane, dst: &mut [u8], dp: Plane) {
    let sx = sp.width as f32 / dp.width as f32;
    let sy = sp.height as f32 / dp.height as f32;
    for y in 0..dp.height {
        let y0 = ((y as f32 * sy) as usize).min(sp.height - 1);
        for x in 0..dp.width {
            let x0 = ((x as f32 * sx) as usize).min(sp.width - 1);
            let (s, d) = (sp.at(x0, y0), dp.at(x, y));
            dst[d..d + dp.channels].copy_from_slice(&src[s..s + sp.channels]);
        }
    }
}

/// Source coordinate of destination pixel `i` with pixel-center alignment.
fn linear_coord(i: usize, scale: f32, limit: usize) -> (usize, usize, f32) {
    let f = ((i as f32 + 0.5) * scale - 0.5).max(0.0);
    let i0 = (f as usize).min(limit - 1);
    let i1 = (i0 + 1).min(limit - 1);
    (i0, i1, f - i0 as f32)
}

pub fn resize_bilinear(src: &[u8], sp: Plane, dst: &mut [u8], dp: Plane) {
    let sx = sp.width as f32 / dp.width as f32;
    let sy = sp.height as f32 / dp.height as f32;
    for y in 0..dp.height {
        let (y0, y1, wy) = linear_coord(y, sy, sp.height);
        for x in 0..dp.width {
            let (x0, x1, wx) = linear_coord(x, sx, sp.width);
            for c in 0..dp.channels {
                let p = |xx: usize, yy: usize| f32::from(src[sp.at(xx, yy) + c]);
                let top = p(x0, y0) * (1.0 - wx) + p(x1, y0) * wx;
                let bottom = p(x0, y1) * (1.0 - wx) + p(x1, y1) * wx;
                dst[dp.at(x, y) + c] = round_u8(top * (1.0 - wy) + bottom * wy);
            }
        }
    }
}

pub fn resize(src: &[u8], sp: Plane, dst: &mut [u8], dp: Plane, interp: Interpolation) {
    match interp {
        Interpolation::Nearest => resize_nearest(src, sp, dst, dp),
        Interpolation::Linear => resize_bilinear(src, sp, dst, dp),
    }
}

/// Inverts a 2x3 affine matrix; `None` when it is singular.
#[must_use]
pub fn invert_affine(m: [[f32; 3]; 2]) -> Option<[[f32; 3]; 2]> {
    let [[a, b, c], [d, e, f]] = m;
    let det = a * e - b * d;
    if det.abs() < f32::EPSILON {
        return None;
    }
    let (ia, ib, id, ie) = (e / det, -b / det, -d / det, a / det);
    Some([[ia, ib, -(ia * c + ib * f)], [id, ie, -(id * c + ie * f)]])
}

#[derive(Debug, Clone, Copy)]
pub struct Warp {
    /// Destination to source mapping.
    pub inverse: [[f32; 3]; 2],
    pub interp: Interpolation,
    pub border: BorderType,
    pub border_val: u8,
}

impl Warp {
    fn sample(&self, src: &[u8], sp: Plane, x: isize, y: isize, c: usize) -> Option<u8> {
        let inside = x >= 0 && y >= 0 && (x as usize) < sp.width && (y as usize) < sp.height;
        if inside {
            return Some(src[sp.at(x as usize, y as usize) + c]);
        }
        match self.border {
            BorderType::Constant => Some(self.border_val),
            BorderType::Edge => {
                let cx = x.clamp(0, sp.width as isize - 1) as usize;
                let cy = y.clamp(0, sp.height as isize - 1) as usize;
                Some(src[sp.at(cx, cy) + c])
            }
            BorderType::Transparent => None,
        }
    }
}

pub fn warp_affine(src: &[u8], sp: Plane, dst: &mut [u8], dp: Plane, warp: &Warp) {
    let [[a, b, c], [d, e, f]] = warp.inverse;
    for y in 0..dp.height {
        for x in 0..dp.width {
            let (fx, fy) = (x as f32, y as f32);
            let sx = a * fx + b * fy + c;
            let sy = d * fx + e * fy + f;
            for ch in 0..dp.channels {
                let value = match warp.interp {
                    Interpolation::Nearest => warp.sample(src, sp, sx.round() as isize, sy.round() as isize, ch),
                    Interpolation::Linear => {
                        let (x0, y0) = (sx.floor(), sy.floor());
                        let (wx, wy) = (sx - x0, sy - y0);
                        let (x0, y0) = (x0 as isize, y0 as isize);
                        let taps = [
                            (x0, y0, (1.0 - wx) * (1.0 - wy)),
                            (x0 + 1, y0, wx * (1.0 - wy)),
                            (x0, y0 + 1, (1.0 - wx) * wy),
                            (x0 + 1, y0 + 1, wx * wy),
                        ];
                        let mut acc = 0.0;
                        let mut covered = true;
                        for (tx, ty, w) in taps {
                            if w == 0.0 {
                                continue;
                            }
                            match warp.sample(src, sp, tx, ty, ch) {
                                Some(v) => acc += f32::from(v) * w,
                                None => covered = false,
                            }
                        }
                        covered.then(|| round_u8(acc))
                    }
                };
                if let Some(value) = value {
                    dst[dp.at(x, y) + ch] = value;
                }
            }
        }
    }
}

/// Converts one 4:2:0 semi-planar image to packed BGR(A).
///
/// `v_first` selects NV21 chroma order; `channels` is 3 or 4 (alpha = 255).
pub fn yuv420sp_to_bgr(src: &[u8], width: usize, height: usize, dst: &mut [u8], channels: usize, v_first: bool) {
    let (luma, chroma) = src.split_at(width * height);
    for y in 0..height {
        for x in 0..width {
            let uv = (y / 2) * width + (x / 2) * 2;
            let (u, v) = if v_first { (chroma[uv + 1], chroma[uv]) } else { (chroma[uv], chroma[uv + 1]) };
            let yy = f32::from(luma[y * width + x]);
            let (u, v) = (f32::from(u) - 128.0, f32::from(v) - 128.0);
            let d = (y * width + x) * channels;
            dst[d] = round_u8(yy + 1.772 * u);
            dst[d + 1] = round_u8(yy - 0.344_136 * u - 0.714_136 * v);
            dst[d + 2] = round_u8(yy + 1.402 * v);
            if channels == 4 {
                dst[d + 3] = 255;
            }
        }
    }
}

/// Packed BGR(A) to gray with the BT.601 luma weights.
pub fn bgr_to_gray(src: &[u8], pixels: usize, channels: usize, dst: &mut [u8]) {
    for (i, out) in dst.iter_mut().take(pixels).enumerate() {
        let p = &src[i * channels..i * channels + 3];
        let (b, g, r) = (u32::from(p[0]), u32::from(p[1]), u32::from(p[2]));
        *out = ((b * 29 + g * 150 + r * 77 + 128) >> 8) as u8;
    }
}
