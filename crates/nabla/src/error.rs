use thiserror::Error;

use crate::backend::BackendError;

/// Failure kinds surfaced by array construction, evaluation and transforms.
#[derive(Debug, Error)]
pub enum Exception {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("dtype mismatch: {0}")]
    DtypeMismatch(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("computation failed: {0}")]
    Computation(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// A caller-supplied callable reported failure; `code` is its own status.
    #[error("callable failed with status {code}: {message}")]
    External { code: i32, message: String },
}

impl Exception {
    pub fn shape(message: impl Into<String>) -> Self {
        Exception::ShapeMismatch(message.into())
    }

    pub fn dtype(message: impl Into<String>) -> Self {
        Exception::DtypeMismatch(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Exception::InvalidArgument(message.into())
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Exception::Computation(message.into())
    }
}

pub type Result<T, E = Exception> = std::result::Result<T, E>;
