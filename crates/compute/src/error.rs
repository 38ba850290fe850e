//! Status codes shared by every component of the runtime.
//!
//! Every cross-component call returns [`Result`]; nothing panics across a
//! component boundary. [`ComputeError::kind`] gives the coarse status kind so
//! callers can branch without matching on message text.

use thiserror::Error;

/// Coarse status kind of a [`ComputeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed caller arguments or an unsupported parameter combination.
    Param,
    /// Structurally invalid input, e.g. a zero-sized destination.
    InvalidInput,
    /// The device cannot host the requested type/format/combination.
    DeviceNotSupported,
    /// A native device call failed.
    Runtime,
    /// A required collaborator is missing or of the wrong device.
    NullParam,
    /// The whole operation is absent on this backend.
    NotSupported,
    /// The layer description itself is inconsistent.
    Model,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    #[error("parameter error: {0}")]
    Param(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("device not supported: {0}")]
    DeviceNotSupported(String),
    #[error("runtime error: {message}{}", .code.map(|c| format!(" (native error code: {c})")).unwrap_or_default())]
    Runtime { message: String, code: Option<i32> },
    #[error("null parameter: {0}")]
    NullParam(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("buffer shape mismatch: {0}")]
    ShapeMismatch(&'static str),
    #[error("backend not available")]
    BackendUnavailable,
}

impl ComputeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Param(_) | Self::ShapeMismatch(_) => ErrorKind::Param,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::DeviceNotSupported(_) => ErrorKind::DeviceNotSupported,
            Self::Runtime { .. } | Self::BackendUnavailable => ErrorKind::Runtime,
            Self::NullParam(_) => ErrorKind::NullParam,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::Model(_) => ErrorKind::Model,
        }
    }

    pub fn param(message: impl Into<String>) -> Self {
        Self::Param(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime { message: message.into(), code: None }
    }

    /// Runtime error carrying the native error code of the failing call.
    pub fn native(message: impl Into<String>, code: i32) -> Self {
        Self::Runtime { message: message.into(), code: Some(code) }
    }
}

pub type Result<T, E = ComputeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_code_is_rendered() {
        let err = ComputeError::native("create stream failed", 107_001);
        assert_eq!(err.kind(), ErrorKind::Runtime);
        assert_eq!(
            err.to_string(),
            "runtime error: create stream failed (native error code: 107001)"
        );
        assert_eq!(ComputeError::runtime("set context failed").to_string(), "runtime error: set context failed");
    }

    #[test]
    fn kernel_errors_map_onto_status_kinds() {
        assert_eq!(ComputeError::ShapeMismatch("x").kind(), ErrorKind::Param);
        assert_eq!(ComputeError::BackendUnavailable.kind(), ErrorKind::Runtime);
    }
}
