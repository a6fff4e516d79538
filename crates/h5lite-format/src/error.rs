//! Error types for format decoding.

use thiserror::Error;

/// Broad classes of failure, so callers can decide how far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed, truncated or unsupported structure. Fatal for the structure.
    Format,
    /// A stored checksum did not match the bytes it covers.
    Integrity,
    /// The file needs a filter or message decoder that is not available.
    Capability,
    /// A path or name lookup missed.
    Navigation,
}

/// Errors that can occur while decoding the binary format.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FormatError {
    /// The format signature was not found at any probed offset.
    #[error("format signature not found (searched up to offset {searched_to})")]
    SignatureNotFound { searched_to: u64 },

    /// A structure carries a version this decoder does not implement.
    #[error("unsupported {structure} version {version}")]
    UnsupportedVersion { structure: &'static str, version: u8 },

    /// A structure's magic bytes were wrong.
    #[error("invalid {structure} signature at offset {offset:#x}")]
    InvalidSignature { structure: &'static str, offset: u64 },

    /// Size-of-offsets or size-of-lengths outside {1, 2, 4, 8}.
    #[error("invalid field size {0} (expected 1, 2, 4 or 8)")]
    InvalidFieldSize(u8),

    /// A read ran past the end of the available bytes.
    #[error("unexpected end of data at offset {offset:#x}: needed {needed} bytes, {available} available")]
    UnexpectedEof {
        offset: u64,
        needed: usize,
        available: usize,
    },

    /// Structurally invalid content.
    #[error("malformed {structure} at offset {offset:#x}: {reason}")]
    Malformed {
        structure: &'static str,
        offset: u64,
        reason: String,
    },

    /// A size computation overflowed.
    #[error("arithmetic overflow computing {0}")]
    ArithmeticOverflow(&'static str),

    /// A valid feature of the format that this decoder does not handle.
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// Stored and computed checksums differ.
    #[error("checksum mismatch in {structure}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        structure: &'static str,
        stored: u32,
        computed: u32,
    },

    /// A message marked "must understand" has no registered decoder.
    #[error("message type {type_id:#06x} at object header {address:#x} must be understood but has no decoder")]
    UnsupportedMessage { type_id: u16, address: u64 },

    /// A mandatory filter is not in the registry.
    #[error("filter {id} ({}) is not registered", quoted_name(.name))]
    FilterNotFound { id: u16, name: Option<String> },

    /// A registered filter failed while decoding.
    #[error("filter {id} failed: {reason}")]
    FilterFailed { id: u16, reason: String },

    /// A filter's integrity check (e.g. Fletcher-32) failed.
    #[error("filter {id} integrity check failed: {reason}")]
    FilterIntegrity { id: u16, reason: String },

    /// A path component does not exist.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// An intermediate path component is not a group.
    #[error("not a group: {0}")]
    NotAGroup(String),

    /// A read window does not fit inside the dataspace.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    /// Raw data does not have the size its datatype and dataspace imply.
    #[error("data size mismatch: expected {expected} bytes, got {actual}")]
    DataSizeMismatch { expected: usize, actual: usize },

    /// The datatype cannot be converted to the requested type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

impl FormatError {
    /// Which taxonomy class this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            FormatError::ChecksumMismatch { .. } | FormatError::FilterIntegrity { .. } => {
                ErrorCategory::Integrity
            }
            FormatError::UnsupportedMessage { .. }
            | FormatError::FilterNotFound { .. }
            | FormatError::FilterFailed { .. } => ErrorCategory::Capability,
            FormatError::PathNotFound(_) | FormatError::NotAGroup(_) => ErrorCategory::Navigation,
            _ => ErrorCategory::Format,
        }
    }

    pub(crate) fn malformed(structure: &'static str, offset: u64, reason: impl Into<String>) -> Self {
        FormatError::Malformed {
            structure,
            offset,
            reason: reason.into(),
        }
    }
}

fn quoted_name(name: &Option<String>) -> String {
    match name {
        Some(n) => format!("\"{n}\""),
        None => "unnamed".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, FormatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_not_found_names_id_and_name() {
        let err = FormatError::FilterNotFound {
            id: 32000,
            name: Some("lzf".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("32000"), "{msg}");
        assert!(msg.contains("lzf"), "{msg}");
        assert_eq!(err.category(), ErrorCategory::Capability);
    }

    #[test]
    fn filter_not_found_without_name() {
        let err = FormatError::FilterNotFound { id: 999, name: None };
        assert_eq!(err.to_string(), "filter 999 (unnamed) is not registered");
    }

    #[test]
    fn categories() {
        assert_eq!(
            FormatError::ChecksumMismatch {
                structure: "superblock",
                stored: 1,
                computed: 2
            }
            .category(),
            ErrorCategory::Integrity
        );
        assert_eq!(
            FormatError::PathNotFound("/a".into()).category(),
            ErrorCategory::Navigation
        );
        assert_eq!(
            FormatError::ArithmeticOverflow("element count").category(),
            ErrorCategory::Format
        );
    }

    #[test]
    fn checksum_message_carries_values() {
        let err = FormatError::ChecksumMismatch {
            structure: "object header",
            stored: 0xdead_beef,
            computed: 0x0102_0304,
        };
        let msg = err.to_string();
        assert!(msg.contains("0xdeadbeef"));
        assert!(msg.contains("0x01020304"));
    }
}
