//! Bootloader wire protocol.

pub mod frame;
pub mod status;

// Re-export common types
pub use frame::{Frame, MessageKind, encode};
pub use status::DeviceStatus;
