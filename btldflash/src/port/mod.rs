//! Port abstraction for the bootloader serial link.
//!
//! The flash session only needs a half-duplex byte channel: write a frame,
//! then read the device's status byte with a bounded timeout. This module
//! defines that channel as the [`Port`] trait so the protocol layer stays
//! I/O-agnostic.
//!
//! ```text
//! +------------------+
//! |   FlashSession   |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |   Port Trait     |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use btldflash::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> btldflash::Result<()> {
//!     port.write_all_bytes(b"@BTL\n")?;
//!
//!     let mut buf = [0u8; 4];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::error::Result;

/// Baud rate the bootloader listens on.
pub const DEFAULT_BAUD: u32 = 115200;

/// Per-read timeout used for handshake and acknowledgment reads.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Serial port configuration.
///
/// The link is always 8 data bits, no parity, one stop bit, no flow control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Byte channel to the bootloader.
pub trait Port: Read + Write + Send {
    /// Get the current per-read timeout.
    fn timeout(&self) -> Duration;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Read up to `buf.len()` bytes, stopping early once the port timeout
    /// elapses without filling the buffer.
    ///
    /// Returns the number of bytes read, which is less than `buf.len()` on
    /// timeout.
    fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize> {
        let deadline = Instant::now() + self.timeout();
        let mut filled = 0;

        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => {},
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        Ok(filled)
    }
}

// Re-export the appropriate implementation based on features
#[cfg(feature = "native")]
pub use native::NativePort;
