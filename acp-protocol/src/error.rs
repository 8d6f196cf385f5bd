//! Protocol error types.

use std::fmt;
use thiserror::Error;

/// Protocol-level errors raised while framing messages or coding property values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid header length: expected {expected} bytes, got {actual}")]
    InvalidHeaderLength { expected: usize, actual: usize },

    #[error("invalid magic bytes: expected 'acpp', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported protocol version: {0:#010x}")]
    UnsupportedVersion(i32),

    #[error("unknown command: {0:#x}")]
    UnknownCommand(i32),

    #[error("header declares no body but {0} bytes are attached")]
    UnexpectedBody(usize),

    #[error("body size mismatch: header declares {declared}, got {actual} bytes")]
    BodySizeMismatch { declared: i32, actual: usize },

    #[error("body too large: {0} bytes exceeds the 32-bit size field")]
    BodyTooLarge(usize),

    #[error("body checksum mismatch: expected {expected}, got {actual}")]
    BodyChecksumMismatch { expected: i32, actual: i32 },

    #[error("header checksum mismatch: expected {expected}, got {actual}")]
    HeaderChecksumMismatch { expected: i32, actual: i32 },

    #[error("invalid element header length: expected {expected} bytes, got {actual}")]
    InvalidElementLength { expected: usize, actual: usize },

    #[error("property element too large: {size} bytes (max {max})")]
    ElementTooLarge { size: u32, max: u32 },

    #[error("invalid property name: {0:?}")]
    InvalidName(String),

    #[error("unknown property: {0}")]
    UnknownProperty(String),

    #[error("invalid value for property {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("value {value} rejected by validator of property {name}")]
    Rejected { name: String, value: String },

    #[error("no codec for property type {0:?}")]
    UnsupportedType(String),

    #[error("property table error: {0}")]
    Registry(String),
}

/// Coarse classification of protocol errors.
///
/// Framing and checksum errors reject the whole message; validation errors
/// reject a single property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Framing,
    Checksum,
    Validation,
    UnsupportedType,
    Registry,
}

impl ProtocolError {
    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::InvalidHeaderLength { .. }
            | ProtocolError::InvalidMagic(_)
            | ProtocolError::UnsupportedVersion(_)
            | ProtocolError::UnknownCommand(_)
            | ProtocolError::UnexpectedBody(_)
            | ProtocolError::BodySizeMismatch { .. }
            | ProtocolError::BodyTooLarge(_)
            | ProtocolError::InvalidElementLength { .. }
            | ProtocolError::ElementTooLarge { .. } => ErrorKind::Framing,
            ProtocolError::BodyChecksumMismatch { .. }
            | ProtocolError::HeaderChecksumMismatch { .. } => ErrorKind::Checksum,
            ProtocolError::InvalidName(_)
            | ProtocolError::UnknownProperty(_)
            | ProtocolError::InvalidValue { .. }
            | ProtocolError::Rejected { .. } => ErrorKind::Validation,
            ProtocolError::UnsupportedType(_) => ErrorKind::UnsupportedType,
            ProtocolError::Registry(_) => ErrorKind::Registry,
        }
    }

    /// Returns whether the error only affects a single property rather than
    /// the message carrying it.
    pub fn is_property_scoped(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Framing => write!(f, "FRAMING"),
            ErrorKind::Checksum => write!(f, "CHECKSUM"),
            ErrorKind::Validation => write!(f, "VALIDATION"),
            ErrorKind::UnsupportedType => write!(f, "UNSUPPORTED_TYPE"),
            ErrorKind::Registry => write!(f, "REGISTRY"),
        }
    }
}
