//! Error types for pzip operations.
//!
//! A single error enum covers the whole pipeline: filesystem access,
//! compression, container parsing, and cancellation. The first error a
//! worker reports cancels its pool and is surfaced from `close()`.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The main error type for pzip operations.
#[derive(Debug, Error)]
pub enum PzipError {
    /// I/O error from an underlying reader/writer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Source path missing or unstat-able.
    #[error("not found: {path}")]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// Cannot open a source, destination, or temp file.
    #[error("cannot open {path}: {source}")]
    Open {
        /// The path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Short read, I/O failure, or directory iteration failure.
    #[error("read error on {path}: {message}")]
    Read {
        /// The path being read.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// I/O failure on the destination or a temp file.
    #[error("write error: {message}")]
    Write {
        /// Description of the failure.
        message: String,
    },

    /// The encoder's output sink reported a failure.
    #[error("compression error: {message}")]
    Compression {
        /// Description of the failure.
        message: String,
    },

    /// Truncated or malformed compressed stream.
    #[error("decompression error: {message}")]
    Decompression {
        /// Description of the failure.
        message: String,
    },

    /// Unsupported compression method in a ZIP member.
    #[error("unsupported compression method: {method}")]
    UnsupportedMethod {
        /// The method id from the member header.
        method: u16,
    },

    /// CRC checksum mismatch after decompression.
    #[error("CRC mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    CrcMismatch {
        /// Expected CRC value from the archive.
        expected: u32,
        /// Computed CRC value from the data.
        computed: u32,
    },

    /// Missing or unrecognised signature, malformed records.
    #[error("invalid archive: {message}")]
    InvalidArchive {
        /// Description of the problem.
        message: String,
    },

    /// Member name or archive comment exceeds the 16-bit length field.
    #[error("{what} too long: {len} bytes (maximum 65535)")]
    TooLong {
        /// What overflowed ("file name" or "archive comment").
        what: &'static str,
        /// Actual byte length.
        len: usize,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type alias for pzip operations.
pub type Result<T> = std::result::Result<T, PzipError>;

impl PzipError {
    /// Create a not-found error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create an open error.
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    /// Create a read error.
    pub fn read(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Read {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Create a write error.
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
        }
    }

    /// Create a compression error.
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression {
            message: message.into(),
        }
    }

    /// Create a decompression error.
    pub fn decompression(message: impl Into<String>) -> Self {
        Self::Decompression {
            message: message.into(),
        }
    }

    /// Create an unsupported-method error.
    pub fn unsupported_method(method: u16) -> Self {
        Self::UnsupportedMethod { method }
    }

    /// Create a CRC mismatch error.
    pub fn crc_mismatch(expected: u32, computed: u32) -> Self {
        Self::CrcMismatch { expected, computed }
    }

    /// Create an invalid archive error.
    pub fn invalid_archive(message: impl Into<String>) -> Self {
        Self::InvalidArchive {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PzipError::crc_mismatch(0x12345678, 0xDEADBEEF);
        assert!(err.to_string().contains("CRC mismatch"));

        let err = PzipError::unsupported_method(12);
        assert!(err.to_string().contains("12"));

        let err = PzipError::invalid_archive("cannot find end of central directory");
        assert!(err.to_string().contains("central directory"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: PzipError = io_err.into();
        assert!(matches!(err, PzipError::Io(_)));
    }
}
