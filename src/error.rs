//! Error types for bad block operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bad block operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while querying or clearing bad blocks.
#[derive(Error, Debug)]
pub enum Error {
    /// No backend on this platform implements the operation.
    #[error("Operation not supported on this platform: {0}")]
    Unsupported(String),

    /// Path does not exist or is not the expected kind of file or device.
    #[error("Not found: {}: {reason}", path.display())]
    NotFound { path: PathBuf, reason: String },

    /// Malformed or unsorted input handed to the translator.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Underlying device or filesystem call failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Some ranges of a clear request were not fully repaired.
    #[error(
        "Partial clear: {cleared} cleared, {partial} partially cleared, {failed} failed, {skipped} skipped"
    )]
    PartialClear {
        cleared: usize,
        partial: usize,
        failed: usize,
        skipped: usize,
    },

    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn not_found(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::NotFound {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_data(reason: impl Into<String>) -> Self {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            reason.into(),
        ))
    }

    /// Platform error code carried by an I/O failure, if any.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Error::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Whether a clear failure means the remaining ranges cannot be attempted.
    ///
    /// The device going away (or never having been usable) is fatal; a single
    /// range refusing to clear is not.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Unsupported(_) | Error::NotFound { .. } => true,
            Error::Io(e) => matches!(
                e.raw_os_error(),
                Some(libc::ENODEV) | Some(libc::ENXIO) | Some(libc::ENOENT) | Some(libc::EBADF)
            ),
            Error::InvariantViolation(_) | Error::PartialClear { .. } | Error::InvalidConfig(_) => {
                false
            }
        }
    }

    /// POSIX errno equivalent, for callers exposing a sentinel + errno interface.
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::Unsupported(_) => libc::ENOTSUP,
            Error::NotFound { .. } => libc::ENOENT,
            Error::InvariantViolation(_) | Error::InvalidConfig(_) => libc::EINVAL,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::PartialClear { .. } => libc::EIO,
        }
    }
}
