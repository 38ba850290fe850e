//! Parameters of the conversion operations.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderType {
    /// Pixels outside the source read as the border value.
    #[default]
    Constant,
    /// Pixels outside the source repeat the nearest edge pixel.
    Edge,
    /// Pixels outside the source leave the destination untouched.
    Transparent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeParam {
    /// Width ratio, used only where the destination does not fix the size.
    pub scale_w: f32,
    pub scale_h: f32,
    pub interp: Interpolation,
}

impl Default for ResizeParam {
    fn default() -> Self {
        Self { scale_w: 1.0, scale_h: 1.0, interp: Interpolation::Linear }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropParam {
    pub top_left_x: usize,
    pub top_left_y: usize,
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarpAffineParam {
    /// 2x3 matrix mapping source coordinates onto destination coordinates.
    pub transform: [[f32; 3]; 2],
    pub interp: Interpolation,
    pub border: BorderType,
    pub border_val: f32,
}

impl Default for WarpAffineParam {
    fn default() -> Self {
        Self {
            transform: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            interp: Interpolation::Linear,
            border: BorderType::Constant,
            border_val: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PasteType {
    #[default]
    TopLeft,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PasteParam {
    pub paste_type: PasteType,
    /// Fill of the destination area not covered by the pasted image.
    pub pad_value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorConversion {
    Nv12ToBgr,
    Nv21ToBgr,
    Nv12ToBgra,
    Nv21ToBgra,
    BgrToGray,
    BgraToGray,
}
