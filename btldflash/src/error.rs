//! Error types for btldflash.

use crate::protocol::status::DeviceStatus;
use std::io;
use thiserror::Error;

/// Result type for btldflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for btldflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The firmware source text could not be parsed.
    #[error("Malformed source at line {line}: {reason}")]
    MalformedSource {
        /// 1-based line number in the source file.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },

    /// Record checksum mismatch (only reported when verification is enabled).
    #[error("Checksum mismatch at line {line}: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// 1-based line number in the source file.
        line: usize,
        /// Checksum computed over the record fields.
        expected: u8,
        /// Checksum stored in the record.
        actual: u8,
    },

    /// The device answered a frame with an error status.
    #[error("Device rejected frame: {0}")]
    DeviceRejected(DeviceStatus),

    /// Handshake failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The embedding application requested the operation to stop.
    #[error("Operation interrupted")]
    Interrupted,

    /// The image does not fit the 16-bit size field of the protocol.
    #[error("Image too large: {0} bytes exceeds the 65535 byte limit")]
    ImageTooLarge(u32),

    /// Signing key could not be loaded.
    #[error("Signing key error: {0}")]
    Key(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedSource {
            line,
            reason: reason.into(),
        }
    }
}
