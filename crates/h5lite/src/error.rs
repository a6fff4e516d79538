//! Error types for the session API.

use h5lite_format::error::{ErrorCategory, FormatError};
use h5lite_format::message_type::MessageType;
use thiserror::Error;

/// Errors that can occur when using the session API.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Low-level format decoding error.
    #[error("HDF5 format error: {0}")]
    Format(#[from] FormatError),

    /// The object at the given path is not a dataset.
    #[error("not a dataset: {0}")]
    NotADataset(String),

    /// A required header message was not found.
    #[error("missing required message: {0}")]
    MissingMessage(MessageType),

    /// The stored type cannot be read as the requested one.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: &'static str, actual: String },
}

impl Error {
    /// The failure class, or `None` for I/O errors, which come from outside
    /// the file's contents.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Error::Io(_) => None,
            Error::Format(e) => Some(e.category()),
            Error::NotADataset(_) => Some(ErrorCategory::Navigation),
            Error::MissingMessage(_) | Error::TypeMismatch { .. } => Some(ErrorCategory::Format),
        }
    }

    /// The underlying format error, if this is one.
    pub fn as_format(&self) -> Option<&FormatError> {
        match self {
            Error::Format(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        let e = Error::from(FormatError::PathNotFound("/x".into()));
        assert_eq!(e.category(), Some(ErrorCategory::Navigation));
        assert_eq!(e.to_string(), "HDF5 format error: path not found: /x");

        let e = Error::MissingMessage(MessageType::Dataspace);
        assert_eq!(e.category(), Some(ErrorCategory::Format));
        assert!(e.to_string().contains("dataspace"));

        let io = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.category(), None);
        assert!(io.as_format().is_none());
    }
}
