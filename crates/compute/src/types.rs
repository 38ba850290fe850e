//! Enumerations describing tensor element types, layouts and devices.

use crate::{ComputeError, Result};

/// Element type of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    #[default]
    Float,
    Half,
    Int32,
    Int8,
    /// Not yet negotiated; resolved by the consuming accelerator.
    Auto,
}

impl DataType {
    /// Size of one element in bytes, `None` for [`DataType::Auto`].
    #[must_use]
    pub const fn byte_size(self) -> Option<usize> {
        match self {
            Self::Float | Self::Int32 => Some(4),
            Self::Half => Some(2),
            Self::Int8 => Some(1),
            Self::Auto => None,
        }
    }

    /// Byte size for a concrete type, failing on `Auto`.
    pub fn checked_byte_size(self) -> Result<usize> {
        self.byte_size()
            .ok_or_else(|| ComputeError::param("data type auto has no element size"))
    }

    /// Floating-point types that follow the context precision.
    #[must_use]
    pub const fn is_tunable(self) -> bool {
        matches!(self, Self::Float | Self::Half)
    }
}

/// Memory layout of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataFormat {
    /// Planar, channel first.
    #[default]
    Nchw,
    /// Packed, channel last.
    Nhwc,
    /// Channels packed by four, channel first.
    Nc4hw4,
    /// Vendor image layout: height, channels by four, width by four.
    Nhc4w4,
    /// Not yet negotiated.
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceType {
    /// General-purpose processor, reference kernels.
    #[default]
    Cpu,
    /// Mobile vector processor.
    Arm,
    /// GPU compute device with streams.
    Gpu,
    /// Shader-based compute device.
    Shader,
    /// Dedicated neural-processor accelerator.
    Npu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cpu => "cpu",
            Self::Arm => "arm",
            Self::Gpu => "gpu",
            Self::Shader => "shader",
            Self::Npu => "npu",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for DeviceType {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" | "naive" => Ok(Self::Cpu),
            "arm" => Ok(Self::Arm),
            "gpu" | "cuda" => Ok(Self::Gpu),
            "shader" | "directx" => Ok(Self::Shader),
            "npu" | "atlas" => Ok(Self::Npu),
            other => Err(ComputeError::Param(format!("unknown device type `{other}`"))),
        }
    }
}

/// Numeric precision a context is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Precision {
    High,
    #[default]
    Normal,
    Low,
    Auto,
}

/// Which side of a layer a blob sits on during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobType {
    Input,
    Output,
}

/// How often the contents of a blob change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataFlag {
    /// Written on every forward.
    #[default]
    ChangeAlways,
    /// Changes only when input shapes change.
    ChangeIfShapeDiffer,
    /// Constant for the lifetime of the graph instance.
    ChangeNever,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_sizes() {
        assert_eq!(DataType::Float.byte_size(), Some(4));
        assert_eq!(DataType::Half.byte_size(), Some(2));
        assert_eq!(DataType::Int8.byte_size(), Some(1));
        assert!(DataType::Auto.checked_byte_size().is_err());
    }

    #[test]
    fn device_names_round_trip() {
        for device in [DeviceType::Cpu, DeviceType::Arm, DeviceType::Gpu, DeviceType::Shader, DeviceType::Npu] {
            assert_eq!(device.to_string().parse::<DeviceType>().unwrap(), device);
        }
        assert!("tpu".parse::<DeviceType>().is_err());
    }
}
