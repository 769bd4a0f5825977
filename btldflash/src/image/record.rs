//! Hex record source parsing.
//!
//! The firmware image is a line-oriented text file. Every line is one record:
//!
//! ```text
//! :CCAAAATTDD...DDSS
//!  |  |   | |      +-- checksum (1 byte)
//!  |  |   | +--------- data (CC bytes)
//!  |  |   +----------- record kind (1 byte)
//!  |  +--------------- address (2 bytes, big-endian)
//!  +------------------ byte count (1 byte)
//! ```
//!
//! Only three kinds carry meaning for the bootloader:
//!
//! - `00` data: bytes for the memory image at the given address
//! - `01` end of file: the image is complete
//! - `04` skip control: if any payload byte is nonzero, the next data record
//!   is not sent to the device
//!
//! Every other kind is ignored. The checksum byte is not validated unless
//! [`ParseOptions::verify_checksums`] is set.

use crate::error::{Error, Result};
use log::trace;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

/// Sentinel every record line starts with.
pub const RECORD_START: char = ':';

/// Record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// `00`: memory image data.
    Data,
    /// `01`: end of the image.
    EndOfFile,
    /// `04`: controls whether the next data record is sent.
    SkipControl,
    /// Any other kind, ignored.
    Other(u8),
}

impl From<u8> for RecordKind {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Data,
            0x01 => Self::EndOfFile,
            0x04 => Self::SkipControl,
            other => Self::Other(other),
        }
    }
}

impl RecordKind {
    /// Get the raw kind byte.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Data => 0x00,
            Self::EndOfFile => 0x01,
            Self::SkipControl => 0x04,
            Self::Other(v) => v,
        }
    }
}

/// A parsed source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// 1-based line number in the source.
    pub line: usize,
    /// Record kind.
    pub kind: RecordKind,
    /// Load address.
    pub address: u16,
    /// Payload bytes (`count` of them).
    pub data: Vec<u8>,
}

impl Record {
    /// Declared byte count.
    #[allow(clippy::cast_possible_truncation)]
    pub fn count(&self) -> u8 {
        // Length always comes from a one-byte count field.
        self.data.len() as u8
    }

    /// Exclusive end address of the payload.
    pub fn end_address(&self) -> u32 {
        u32::from(self.address) + u32::from(self.count())
    }

    /// Whether a skip-control record asks to drop the next data record.
    pub fn requests_skip(&self) -> bool {
        self.data.iter().any(|&b| b != 0)
    }
}

/// Parser options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Reject records whose checksum byte does not match.
    pub verify_checksums: bool,
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Cursor over the hex pairs of one line.
struct HexFields<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: usize,
}

impl HexFields<'_> {
    fn remaining(&self) -> usize {
        (self.bytes.len() - self.pos) / 2
    }

    fn next_byte(&mut self, field: &str) -> Result<u8> {
        let pair = self
            .bytes
            .get(self.pos..self.pos + 2)
            .ok_or_else(|| Error::malformed(self.line, format!("truncated {field} field")))?;
        let (Some(hi), Some(lo)) = (hex_digit(pair[0]), hex_digit(pair[1])) else {
            return Err(Error::malformed(
                self.line,
                format!("invalid hex digit in {field} field"),
            ));
        };
        self.pos += 2;
        Ok((hi << 4) | lo)
    }
}

/// Parse a single record line (without its line terminator).
pub fn parse_line(text: &str, line: usize, options: ParseOptions) -> Result<Record> {
    let Some(body) = text.strip_prefix(RECORD_START) else {
        return Err(Error::malformed(line, "unexpected start of hex record"));
    };

    let mut fields = HexFields {
        bytes: body.as_bytes(),
        pos: 0,
        line,
    };

    let count = fields.next_byte("byte count")?;
    let addr_hi = fields.next_byte("address")?;
    let addr_lo = fields.next_byte("address")?;
    let kind = fields.next_byte("record kind")?;

    if fields.remaining() < usize::from(count) {
        return Err(Error::malformed(
            line,
            format!(
                "record declares {count} data bytes but only {} present",
                fields.remaining()
            ),
        ));
    }

    let mut data = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        data.push(fields.next_byte("data")?);
    }

    if options.verify_checksums {
        let actual = fields.next_byte("checksum")?;
        let sum = data
            .iter()
            .fold(count.wrapping_add(addr_hi).wrapping_add(addr_lo).wrapping_add(kind), |acc, &b| {
                acc.wrapping_add(b)
            });
        let expected = sum.wrapping_neg();
        if expected != actual {
            return Err(Error::ChecksumMismatch {
                line,
                expected,
                actual,
            });
        }
    }

    let record = Record {
        line,
        kind: RecordKind::from(kind),
        address: u16::from_be_bytes([addr_hi, addr_lo]),
        data,
    };
    trace!(
        "line {line}: count {} addr 0x{:04X} kind {:02X}",
        record.count(),
        record.address,
        kind
    );
    Ok(record)
}

/// Lazy record sequence over a line reader.
///
/// Blank lines are skipped. The sequence is single-pass.
pub struct Records<R: BufRead> {
    lines: Lines<R>,
    line: usize,
    options: ParseOptions,
}

impl<R: BufRead> Records<R> {
    /// Create a record sequence over a reader.
    pub fn new(reader: R, options: ParseOptions) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            options,
        }
    }
}

impl Records<BufReader<File>> {
    /// Open a hex file.
    pub fn from_file<P: AsRef<Path>>(path: P, options: ParseOptions) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), options))
    }
}

impl<R: BufRead> Iterator for Records<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;

            let text = text.trim_end();
            if text.is_empty() {
                continue;
            }
            return Some(parse_line(text, self.line, self.options));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LENIENT: ParseOptions = ParseOptions {
        verify_checksums: false,
    };
    const STRICT: ParseOptions = ParseOptions {
        verify_checksums: true,
    };

    #[test]
    fn test_parse_data_record() {
        let rec = parse_line(":0300300002337A1E", 1, LENIENT).unwrap();
        assert_eq!(rec.kind, RecordKind::Data);
        assert_eq!(rec.address, 0x0030);
        assert_eq!(rec.data, vec![0x02, 0x33, 0x7A]);
        assert_eq!(rec.count(), 3);
        assert_eq!(rec.end_address(), 0x33);
    }

    #[test]
    fn test_parse_end_of_file() {
        let rec = parse_line(":00000001FF", 7, LENIENT).unwrap();
        assert_eq!(rec.kind, RecordKind::EndOfFile);
        assert!(rec.data.is_empty());
        assert_eq!(rec.line, 7);
    }

    #[test]
    fn test_parse_skip_control() {
        let rec = parse_line(":020000040030CA", 1, LENIENT).unwrap();
        assert_eq!(rec.kind, RecordKind::SkipControl);
        assert!(rec.requests_skip());

        let rec = parse_line(":020000040000FA", 1, LENIENT).unwrap();
        assert!(!rec.requests_skip());
    }

    #[test]
    fn test_other_kinds() {
        let rec = parse_line(":0400000300003800C1", 1, LENIENT).unwrap();
        assert_eq!(rec.kind, RecordKind::Other(3));
        assert_eq!(RecordKind::Other(5).as_u8(), 5);
        assert_eq!(RecordKind::from(4), RecordKind::SkipControl);
    }

    #[test]
    fn test_lowercase_hex() {
        let rec = parse_line(":02fffe00abcd00", 1, LENIENT).unwrap();
        assert_eq!(rec.address, 0xFFFE);
        assert_eq!(rec.data, vec![0xAB, 0xCD]);
        assert_eq!(rec.end_address(), 0x10000);
    }

    #[test]
    fn test_missing_sentinel_is_fatal() {
        let err = parse_line("0300300002337A1E", 3, LENIENT).unwrap_err();
        assert!(matches!(err, Error::MalformedSource { line: 3, .. }));
    }

    #[test]
    fn test_truncated_data_is_fatal() {
        let err = parse_line(":0400000001", 1, LENIENT).unwrap_err();
        assert!(matches!(err, Error::MalformedSource { .. }));
    }

    #[test]
    fn test_invalid_hex_digit_is_fatal() {
        let err = parse_line(":01000000ZZ00", 1, LENIENT).unwrap_err();
        assert!(err.to_string().contains("invalid hex digit"));
    }

    #[test]
    fn test_checksum_ignored_by_default() {
        // Last byte is wrong (should be 1E).
        assert!(parse_line(":0300300002337A00", 1, LENIENT).is_ok());
        // Missing checksum entirely is fine too.
        assert!(parse_line(":0300300002337A", 1, LENIENT).is_ok());
    }

    #[test]
    fn test_checksum_verified_when_enabled() {
        assert!(parse_line(":0300300002337A1E", 1, STRICT).is_ok());
        assert!(parse_line(":00000001FF", 1, STRICT).is_ok());

        let err = parse_line(":0300300002337A00", 4, STRICT).unwrap_err();
        match err {
            Error::ChecksumMismatch {
                line,
                expected,
                actual,
            } => {
                assert_eq!(line, 4);
                assert_eq!(expected, 0x1E);
                assert_eq!(actual, 0x00);
            },
            other => panic!("unexpected error: {other}"),
        }

        assert!(parse_line(":0300300002337A", 1, STRICT).is_err());
    }

    #[test]
    fn test_records_iterator_skips_blank_lines() {
        let src = ":0100000055AA\r\n\r\n:00000001FF\r\n";
        let records: Vec<_> = Records::new(Cursor::new(src), LENIENT)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data, vec![0x55]);
        assert_eq!(records[1].kind, RecordKind::EndOfFile);
        assert_eq!(records[1].line, 3);
    }

    #[test]
    fn test_records_iterator_reports_line_of_error() {
        let src = ":0100000055AA\nbogus\n";
        let mut records = Records::new(Cursor::new(src), LENIENT);
        assert!(records.next().unwrap().is_ok());
        let err = records.next().unwrap().unwrap_err();
        assert!(matches!(err, Error::MalformedSource { line: 2, .. }));
    }

    #[test]
    fn test_records_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.hex");
        std::fs::write(&path, ":0100100042AD\n:00000001FF\n").unwrap();

        let records: Vec<_> = Records::from_file(&path, STRICT)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records[0].address, 0x0010);
        assert_eq!(records[0].data, vec![0x42]);
    }
}
