use compute::{ComputeError, DeviceType, Result};

/// Pixel layout of a [`Mat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatType {
    /// 8-bit single channel.
    Gray,
    /// 8-bit packed B, G, R.
    Bgr,
    /// 8-bit packed B, G, R, A.
    Bgra,
    /// 4:2:0 semi-planar: full-resolution Y plane, then interleaved U/V.
    Nv12,
    /// 4:2:0 semi-planar: full-resolution Y plane, then interleaved V/U.
    Nv21,
    /// Planar f32 tensor.
    NchwFloat,
    /// Planar i32 tensor.
    NcInt32,
}

impl MatType {
    /// Channel count implied by the type; `None` for tensor types.
    #[must_use]
    pub const fn channels(self) -> Option<usize> {
        match self {
            Self::Gray => Some(1),
            Self::Bgr | Self::Nv12 | Self::Nv21 => Some(3),
            Self::Bgra => Some(4),
            Self::NchwFloat | Self::NcInt32 => None,
        }
    }

    #[must_use]
    pub const fn is_yuv420sp(self) -> bool {
        matches!(self, Self::Nv12 | Self::Nv21)
    }

    #[must_use]
    pub const fn element_size(self) -> usize {
        match self {
            Self::NchwFloat | Self::NcInt32 => 4,
            _ => 1,
        }
    }
}

/// Host-visible pixel buffer.
///
/// `B` is the caller's storage: `&[u8]` for sources, `&mut [u8]` for
/// destinations, `Vec<u8>` when the mat owns its pixels. Kernels only touch
/// the first [`Mat::byte_size`] bytes.
#[derive(Debug, Clone)]
pub struct Mat<B> {
    device_type: DeviceType,
    mat_type: MatType,
    /// `[batch, channels, height, width]`
    dims: [usize; 4],
    data: B,
}

impl<B: AsRef<[u8]>> Mat<B> {
    pub fn new(device_type: DeviceType, mat_type: MatType, dims: [usize; 4], data: B) -> Result<Self> {
        if let Some(channels) = mat_type.channels() {
            if dims[1] != channels {
                return Err(ComputeError::Param(format!(
                    "{mat_type:?} mat has {channels} channels, got dims {dims:?}"
                )));
            }
        }
        if mat_type.is_yuv420sp() && (dims[2] % 2 != 0 || dims[3] % 2 != 0) {
            return Err(ComputeError::Param(format!("{mat_type:?} mat needs even height and width, got {dims:?}")));
        }
        let mat = Self { device_type, mat_type, dims, data };
        let len = mat.data.as_ref().len();
        if len < mat.byte_size() {
            return Err(ComputeError::Param(format!(
                "{mat_type:?} mat of dims {dims:?} needs {} bytes, buffer holds {len}",
                mat.byte_size()
            )));
        }
        Ok(mat)
    }

    /// Image mat whose channel count follows from `mat_type`.
    pub fn image(
        device_type: DeviceType,
        mat_type: MatType,
        batch: usize,
        height: usize,
        width: usize,
        data: B,
    ) -> Result<Self> {
        let channels = mat_type
            .channels()
            .ok_or_else(|| ComputeError::Param(format!("{mat_type:?} mat needs an explicit channel count")))?;
        Self::new(device_type, mat_type, [batch, channels, height, width], data)
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        let size = self.byte_size();
        &self.data.as_ref()[..size]
    }

    /// Borrowed view of the same pixels.
    #[must_use]
    pub fn view(&self) -> Mat<&[u8]> {
        Mat { device_type: self.device_type, mat_type: self.mat_type, dims: self.dims, data: self.data.as_ref() }
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Mat<B> {
    pub fn data_mut(&mut self) -> &mut [u8] {
        let size = self.byte_size();
        &mut self.data.as_mut()[..size]
    }

    #[must_use]
    pub fn view_mut(&mut self) -> Mat<&mut [u8]> {
        Mat { device_type: self.device_type, mat_type: self.mat_type, dims: self.dims, data: self.data.as_mut() }
    }
}

impl<B> Mat<B> {
    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    #[must_use]
    pub fn mat_type(&self) -> MatType {
        self.mat_type
    }

    #[must_use]
    pub fn dims(&self) -> [usize; 4] {
        self.dims
    }

    #[must_use]
    pub fn batch(&self) -> usize {
        self.dims[0]
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.dims[1]
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.dims[2]
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.dims[3]
    }

    /// Bytes of one image of the batch.
    #[must_use]
    pub fn plane_size(&self) -> usize {
        let [_, c, h, w] = self.dims;
        if self.mat_type.is_yuv420sp() {
            h * w * 3 / 2
        } else {
            c * h * w * self.mat_type.element_size()
        }
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.batch() * self.plane_size()
    }
}
