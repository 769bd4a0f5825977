//! Flash session state machine.
//!
//! A session drives one complete upload:
//!
//! ```text
//! Handshake --> Streaming --> Finalizing --> Done
//!     |             |              |
//!     +-------------+--------------+-----> Failed
//! ```
//!
//! - **Handshake**: the greeting is written one byte at a time (the
//!   bootloader's receive path is slow) until the ready reply comes back.
//! - **Streaming**: each data record is sent as a flash-data frame, preceded
//!   by 0xFF filler frames when its address leaves a gap. Every frame waits
//!   for a one-byte device status.
//! - **Finalizing**: on the end-of-file record the total size and the
//!   signature over the transmitted bytes are sent, followed by the stop
//!   frame.
//!
//! Nothing is rolled back on failure. The device only commits an image whose
//! signature verifies.
//!
//! ## Example
//!
//! ```rust,no_run
//! use btldflash::{FlashSession, NativePort, ParseOptions, Records, SessionConfig, SigningKey};
//!
//! fn main() -> btldflash::Result<()> {
//!     let port = NativePort::open_simple("/dev/ttyUSB0")?;
//!     let key = SigningKey::from_pem_file("key.pem")?;
//!     let records = Records::from_file("firmware.hex", ParseOptions::default())?;
//!
//!     let mut session = FlashSession::new(port, &key, SessionConfig::default());
//!     let report = session.run(records, |sent| println!("{sent} bytes sent"))?;
//!     println!("signature: {}", report.signature.signature_hex());
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::image::filler::gap_chunks;
use crate::image::record::{Record, RecordKind};
use crate::port::Port;
use crate::protocol::frame::{Frame, HANDSHAKE_GREETING, HANDSHAKE_READY};
use crate::protocol::status::DeviceStatus;
use crate::signer::{ImageSignature, ImageSigner, SigningKey};
use log::{debug, info, trace, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Delay between greeting bytes.
pub const HANDSHAKE_BYTE_DELAY: Duration = Duration::from_millis(1);

/// Default maximum number of handshake attempts.
pub const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 100;

/// Default time to wait for a device status after a frame.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handshake attempts before giving up (`0` retries forever).
    pub max_handshake_attempts: u32,
    /// Delay between greeting bytes.
    pub handshake_byte_delay: Duration,
    /// How long to wait for a recognized status byte after each frame.
    pub ack_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
            handshake_byte_delay: HANDSHAKE_BYTE_DELAY,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

/// Session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the bootloader to answer the greeting.
    Handshake,
    /// Sending data records.
    Streaming,
    /// Sending size, signature and stop frames.
    Finalizing,
    /// Upload finished.
    Done,
    /// Upload aborted.
    Failed,
}

/// Summary of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashReport {
    /// Flash-data frames sent (filler and real).
    pub data_frames: usize,
    /// Real record bytes sent.
    pub data_bytes: u32,
    /// Filler bytes sent.
    pub filler_bytes: u32,
    /// Data records dropped by a skip-control record.
    pub skipped_records: usize,
    /// Records of unknown kind.
    pub ignored_records: usize,
    /// Size reported to the device.
    pub total_size: u16,
    /// Digest and signature sent to the device.
    pub signature: ImageSignature,
}

/// One flashing run over an exclusively owned port.
pub struct FlashSession<'k, P: Port> {
    port: P,
    key: &'k SigningKey,
    config: SessionConfig,
    state: SessionState,
    next_expected_addr: u32,
    total_size: u32,
    ignore_next_data_record: bool,
    signer: ImageSigner,
    data_frames: usize,
    data_bytes: u32,
    filler_bytes: u32,
    skipped_records: usize,
    ignored_records: usize,
}

enum Step {
    Continue,
    Finished(FlashReport),
}

impl<'k, P: Port> FlashSession<'k, P> {
    /// Create a session over an opened port.
    pub fn new(port: P, key: &'k SigningKey, config: SessionConfig) -> Self {
        Self {
            port,
            key,
            config,
            state: SessionState::Handshake,
            next_expected_addr: 0,
            total_size: 0,
            ignore_next_data_record: false,
            signer: ImageSigner::new(),
            data_frames: 0,
            data_bytes: 0,
            filler_bytes: 0,
            skipped_records: 0,
            ignored_records: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Run the whole upload: handshake, stream `records`, finalize.
    ///
    /// `progress` receives the number of image bytes acknowledged so far.
    /// Any error leaves the session in [`SessionState::Failed`].
    pub fn run<I, F>(&mut self, records: I, mut progress: F) -> Result<FlashReport>
    where
        I: IntoIterator<Item = Result<Record>>,
        F: FnMut(u32),
    {
        let result = self.run_inner(records, &mut progress);
        if let Err(e) = &result {
            warn!("Flash session failed: {e}");
            self.state = SessionState::Failed;
        }
        result
    }

    fn run_inner<I, F>(&mut self, records: I, progress: &mut F) -> Result<FlashReport>
    where
        I: IntoIterator<Item = Result<Record>>,
        F: FnMut(u32),
    {
        self.handshake()?;

        let mut last_line = 0;
        for record in records {
            let record = record?;
            last_line = record.line;
            if let Step::Finished(report) = self.process_record(&record, progress)? {
                return Ok(report);
            }
        }

        Err(Error::malformed(last_line, "missing end-of-file record"))
    }

    /// Greet the bootloader until it replies ready.
    pub fn handshake(&mut self) -> Result<()> {
        self.expect_state(SessionState::Handshake)?;
        info!("Waiting for bootloader on {}...", self.port.name());

        let max = self.config.max_handshake_attempts;
        let mut attempt: u32 = 0;

        loop {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            attempt = attempt.saturating_add(1);
            debug!("Sending start sequence (attempt {attempt})");

            for &byte in HANDSHAKE_GREETING {
                self.port.write_all_bytes(&[byte])?;
                thread::sleep(self.config.handshake_byte_delay);
            }

            let mut reply = [0u8; HANDSHAKE_READY.len()];
            let n = self.port.read_up_to(&mut reply)?;
            if &reply[..n] == HANDSHAKE_READY {
                info!("Bootloader ready");
                self.state = SessionState::Streaming;
                return Ok(());
            }
            debug!("Received unexpected handshake reply: {:?}", &reply[..n]);

            if max != 0 && attempt >= max {
                return Err(Error::HandshakeFailed(format!(
                    "no ready reply after {max} attempts"
                )));
            }
        }
    }

    fn expect_state(&self, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "session is {:?}, expected {expected:?}",
                self.state
            )))
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn process_record<F>(&mut self, record: &Record, progress: &mut F) -> Result<Step>
    where
        F: FnMut(u32),
    {
        self.expect_state(SessionState::Streaming)?;
        debug!(
            "Record line {}: kind {:02X}, addr 0x{:04X}, count {}",
            record.line,
            record.kind.as_u8(),
            record.address,
            record.count()
        );

        match record.kind {
            RecordKind::Data => {
                if self.ignore_next_data_record {
                    info!("Ignoring data record at line {}", record.line);
                    self.ignore_next_data_record = false;
                    self.skipped_records += 1;
                    return Ok(Step::Continue);
                }

                let gap = gap_chunks(self.next_expected_addr, record.address);
                if gap.remaining_bytes() > 0 {
                    info!(
                        "Fill 0x{:04X}..0x{:04X} with {} bytes of 0xFF",
                        self.next_expected_addr,
                        record.address,
                        gap.remaining_bytes()
                    );
                }
                for chunk in gap {
                    self.send_data(chunk.address, chunk.data())?;
                    self.filler_bytes += chunk.len() as u32;
                    progress(self.total_size);
                }

                self.send_data(record.address, &record.data)?;
                self.data_bytes += u32::from(record.count());
                self.next_expected_addr = self.next_expected_addr.max(record.end_address());
                progress(self.total_size);
                Ok(Step::Continue)
            },
            RecordKind::EndOfFile => self.finalize().map(Step::Finished),
            RecordKind::SkipControl => {
                self.ignore_next_data_record = record.requests_skip();
                debug!("Skip latch set to {}", self.ignore_next_data_record);
                Ok(Step::Continue)
            },
            RecordKind::Other(kind) => {
                info!("Ignoring record type {kind:#04x} at line {}", record.line);
                self.ignored_records += 1;
                Ok(Step::Continue)
            },
        }
    }

    /// Send one flash-data frame and fold its bytes into size and digest.
    #[allow(clippy::cast_possible_truncation)]
    fn send_data(&mut self, addr: u16, data: &[u8]) -> Result<()> {
        let new_total = self.total_size + data.len() as u32;
        if new_total > u32::from(u16::MAX) {
            return Err(Error::ImageTooLarge(new_total));
        }

        let frame = Frame::flash_data(addr, data);
        self.send_frame(&frame)?;
        self.total_size = new_total;
        self.signer.update(data);
        self.data_frames += 1;
        self.wait_for_ack()
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.build();
        trace!(
            "Sending {:?} frame: {} payload bytes, {} on the wire",
            frame.kind(),
            frame.payload().len(),
            bytes.len()
        );
        self.port.write_all_bytes(&bytes)
    }

    /// Block until the device reports a status for the last frame.
    fn wait_for_ack(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.ack_timeout;
        let mut buf = [0u8; 1];

        loop {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            let n = self.port.read_up_to(&mut buf)?;
            let status = DeviceStatus::from_read((n == 1).then_some(buf[0]));
            if status.is_rejection() {
                return Err(Error::DeviceRejected(status));
            }
            match status {
                DeviceStatus::Success => {
                    trace!("Frame acknowledged");
                    return Ok(());
                },
                DeviceStatus::Unknown(byte) => {
                    trace!("Ignoring unexpected status byte 0x{byte:02X}");
                },
                _ => {},
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "no acknowledgment within {} ms",
                    self.config.ack_timeout.as_millis()
                )));
            }
        }
    }

    fn finalize(&mut self) -> Result<FlashReport> {
        self.state = SessionState::Finalizing;

        let total_size =
            u16::try_from(self.total_size).map_err(|_| Error::ImageTooLarge(self.total_size))?;
        info!("Sending size {total_size}");
        self.send_frame(&Frame::program_size(total_size))?;
        self.wait_for_ack()?;

        let signer = std::mem::take(&mut self.signer);
        let hashed = signer.bytes_hashed();
        let signature = signer.finalize(self.key);
        info!(
            "Firmware sha256 over {hashed} bytes: {}",
            signature.digest_hex()
        );
        info!("Signature: {}", signature.signature_hex());

        self.send_frame(&Frame::program_signature(&signature.signature))?;
        self.wait_for_ack()?;

        // The device resets after the stop frame, no status follows.
        self.send_frame(&Frame::flash_stop())?;
        self.state = SessionState::Done;
        info!("Flashing done");

        Ok(FlashReport {
            data_frames: self.data_frames,
            data_bytes: self.data_bytes,
            filler_bytes: self.filler_bytes,
            skipped_records: self.skipped_records,
            ignored_records: self.ignored_records,
            total_size,
            signature,
        })
    }
}
