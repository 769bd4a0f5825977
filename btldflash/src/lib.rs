//! # btldflash
//!
//! A library for uploading signed firmware to a serial bootloader.
//!
//! The bootloader accepts hex-record images over a half-duplex serial link:
//!
//! - Escaped, self-delimited frames (`@ ... \n`)
//! - Hex record parsing with 0xFF filling of address gaps
//! - SHA-256 digest over every transmitted byte
//! - Deterministic ECDSA signature over secp160r1, the curve the device verifies
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via `serialport`
//!
//! ## Example
//!
//! ```rust,no_run
//! use btldflash::{FlashSession, NativePort, ParseOptions, Records, SessionConfig, SigningKey};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = SigningKey::from_pem_file("signing-key.pem")?;
//!     let records = Records::from_file("firmware.hex", ParseOptions::default())?;
//!     let port = NativePort::open_simple("/dev/ttyUSB0")?;
//!
//!     let mut session = FlashSession::new(port, &key, SessionConfig::default());
//!     let report = session.run(records, |sent| {
//!         println!("{sent} bytes sent");
//!     })?;
//!
//!     println!("sha256: {}", report.signature.digest_hex());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;
pub mod signer;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). The handshake
/// and acknowledgment loops poll it.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    error::{Error, Result},
    image::{ParseOptions, Record, RecordKind, Records},
    port::{Port, SerialConfig},
    protocol::{DeviceStatus, Frame, MessageKind},
    session::{FlashReport, FlashSession, SessionConfig, SessionState},
    signer::{Curve, ImageSignature, ImageSigner, SigningKey},
};
