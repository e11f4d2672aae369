//! Core error types for TRELLIS.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Integrity string could not be parsed
    InvalidIntegrity { reason: String },

    /// Integrity digest does not match the content
    IntegrityMismatch { expected: String, actual: String },

    /// Version specifier is neither `latest`, an exact version, nor a range
    InvalidSpecifier { specifier: String, reason: String },

    /// Unknown distribution name
    UnknownDistribution { name: String },

    /// Library name is not usable as a cache key
    InvalidLibraryName { name: String },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidIntegrity { reason } => write!(f, "Invalid integrity: {}", reason),
            Self::IntegrityMismatch { expected, actual } => {
                write!(f, "Integrity mismatch: expected {}, got {}", expected, actual)
            }
            Self::InvalidSpecifier { specifier, reason } => {
                write!(f, "Invalid version specifier '{}': {}", specifier, reason)
            }
            Self::UnknownDistribution { name } => write!(f, "Unknown distribution: {}", name),
            Self::InvalidLibraryName { name } => write!(f, "Invalid library name: '{}'", name),
        }
    }
}

impl std::error::Error for CoreError {}
