//! Device status bytes.
//!
//! After each frame the bootloader answers with one unframed byte.

use std::fmt;

/// Operation succeeded.
pub const STATUS_SUCCESS: u8 = b'F';

/// Frame payload was malformed.
pub const STATUS_INVALID_PAYLOAD: u8 = b'I';

/// Write address is outside the writable area.
pub const STATUS_DENIED_ADDRESS: u8 = b'A';

/// Outcome of waiting for a device acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// `F`: frame accepted.
    Success,
    /// `I`: frame payload rejected.
    InvalidPayload,
    /// `A`: write address denied.
    DeniedAddress,
    /// No byte arrived within the read timeout.
    Timeout,
    /// A byte outside the known set.
    Unknown(u8),
}

impl DeviceStatus {
    /// Classify a single status byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            STATUS_SUCCESS => Self::Success,
            STATUS_INVALID_PAYLOAD => Self::InvalidPayload,
            STATUS_DENIED_ADDRESS => Self::DeniedAddress,
            other => Self::Unknown(other),
        }
    }

    /// Classify the result of a one-byte read (`None` on timeout).
    pub fn from_read(byte: Option<u8>) -> Self {
        byte.map_or(Self::Timeout, Self::from_byte)
    }

    /// Whether this status aborts the session.
    pub fn is_rejection(self) -> bool {
        matches!(self, Self::InvalidPayload | Self::DeniedAddress)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::InvalidPayload => write!(f, "MCU reported invalid payload"),
            Self::DeniedAddress => write!(f, "MCU reported denied write address"),
            Self::Timeout => write!(f, "no response"),
            Self::Unknown(b) => write!(f, "unknown status byte 0x{b:02X}"),
        }
    }
}
