//! Host-to-bootloader frame format.
//!
//! Every message is wrapped in a self-delimited frame. Reserved bytes inside
//! the payload are escaped so the device can always find the frame boundary:
//!
//! ```text
//! +-------+-----+----------------------------+-----+
//! | START | TAG |  payload (escaped)         | END |
//! +-------+-----+----------------------------+-----+
//! |  '@'  |  1  |  variable                  | '\n'|
//! +-------+-----+----------------------------+-----+
//! ```
//!
//! A payload byte equal to `@`, `\n` or `\` is preceded by `\`. The tag is
//! part of the escaped body.
//!
//! Message kinds:
//!
//! | Kind              | Tag | Payload                                  |
//! |-------------------|-----|------------------------------------------|
//! | program-size      | `M` | size (u16 BE)                            |
//! | program-signature | `N` | signature bytes                          |
//! | flash-data        | `D` | count (u8), address (u16 BE), data bytes |
//! | flash-stop        | `X` | empty                                    |

use byteorder::{BigEndian, WriteBytesExt};

/// Frame start marker.
pub const FRAME_START: u8 = b'@';

/// Frame end marker.
pub const FRAME_END: u8 = b'\n';

/// Escape marker.
pub const FRAME_ESC: u8 = b'\\';

/// Greeting sent by the host during handshake.
pub const HANDSHAKE_GREETING: &[u8] = b"@BTL\n";

/// Reply sent by the bootloader once it is ready to receive frames.
pub const HANDSHAKE_READY: &[u8] = b"@OK\n";

/// Frame message kinds (tag byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Total program size (`M`).
    ProgramSize = b'M',
    /// Image signature (`N`).
    ProgramSignature = b'N',
    /// Flash data block (`D`).
    FlashData = b'D',
    /// End of session (`X`).
    FlashStop = b'X',
}

/// Escape and delimit a raw payload.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    // Worst case every byte is escaped.
    let mut out = Vec::with_capacity(payload.len() * 2 + 2);
    out.push(FRAME_START);
    for &byte in payload {
        if matches!(byte, FRAME_START | FRAME_END | FRAME_ESC) {
            out.push(FRAME_ESC);
        }
        out.push(byte);
    }
    out.push(FRAME_END);
    out
}

/// A single host message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: MessageKind,
    data: Vec<u8>,
}

impl Frame {
    /// Create an empty frame of the given kind.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            data: Vec::new(),
        }
    }

    /// Build a program-size frame.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn program_size(size: u16) -> Self {
        let mut frame = Self::new(MessageKind::ProgramSize);
        frame.data.write_u16::<BigEndian>(size).unwrap();
        frame
    }

    /// Build a program-signature frame.
    pub fn program_signature(signature: &[u8]) -> Self {
        let mut frame = Self::new(MessageKind::ProgramSignature);
        frame.data.extend_from_slice(signature);
        frame
    }

    /// Build a flash-data frame.
    ///
    /// `data` must be at most 255 bytes; hex records and filler chunks are
    /// always smaller than that.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)]
    pub fn flash_data(addr: u16, data: &[u8]) -> Self {
        debug_assert!(data.len() <= usize::from(u8::MAX));
        let mut frame = Self::new(MessageKind::FlashData);
        frame.data.reserve(3 + data.len());
        frame.data.push(data.len() as u8);
        frame.data.write_u16::<BigEndian>(addr).unwrap();
        frame.data.extend_from_slice(data);
        frame
    }

    /// Build the flash-stop frame.
    pub fn flash_stop() -> Self {
        Self::new(MessageKind::FlashStop)
    }

    /// Get the message kind.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Get the payload following the tag.
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Build the complete on-wire frame.
    pub fn build(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(1 + self.data.len());
        body.push(self.kind as u8);
        body.extend_from_slice(&self.data);
        encode(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Device-side frame decoder, mirroring the bootloader's receive loop.
    fn decode(frame: &[u8]) -> Option<Vec<u8>> {
        let (&first, rest) = frame.split_first()?;
        if first != FRAME_START {
            return None;
        }
        let mut out = Vec::new();
        let mut escaped = false;
        for &byte in rest {
            if escaped {
                out.push(byte);
                escaped = false;
            } else if byte == FRAME_ESC {
                escaped = true;
            } else if byte == FRAME_END {
                return Some(out);
            } else {
                out.push(byte);
            }
        }
        None
    }

    #[test]
    fn test_encode_plain_payload() {
        assert_eq!(encode(b"abc"), b"@abc\n");
    }

    #[test]
    fn test_encode_empty_payload() {
        assert_eq!(encode(&[]), vec![FRAME_START, FRAME_END]);
    }

    #[test]
    fn test_encode_escapes_reserved_bytes() {
        let encoded = encode(&[0x40, 0x0A, 0x5C, 0x41]);
        assert_eq!(
            encoded,
            vec![0x40, 0x5C, 0x40, 0x5C, 0x0A, 0x5C, 0x5C, 0x41, 0x0A]
        );
    }

    #[test]
    fn test_decode_recovers_payload_with_markers_everywhere() {
        let payloads: [&[u8]; 4] = [
            b"@@@",
            b"\n\\@\n",
            &[0x00, 0xFF, b'@', 0x10, b'\\', b'\n'],
            &[b'\\'; 64],
        ];
        for payload in payloads {
            let encoded = encode(payload);
            // Only the final byte may be an unescaped end marker.
            assert_eq!(decode(&encoded).as_deref(), Some(payload));
        }
    }

    #[test]
    fn test_decode_all_byte_values() {
        let payload: Vec<u8> = (0..=255).collect();
        assert_eq!(decode(&encode(&payload)), Some(payload));
    }

    #[test]
    fn test_program_size_frame() {
        let frame = Frame::program_size(0x0190);
        assert_eq!(frame.kind(), MessageKind::ProgramSize);
        assert_eq!(frame.build(), vec![b'@', b'M', 0x01, 0x90, b'\n']);
    }

    #[test]
    fn test_program_size_escapes_big_endian_bytes() {
        // 0x400A: both bytes are reserved markers.
        let frame = Frame::program_size(0x400A);
        assert_eq!(
            frame.build(),
            vec![b'@', b'M', b'\\', 0x40, b'\\', 0x0A, b'\n']
        );
    }

    #[test]
    fn test_flash_data_frame_layout() {
        let frame = Frame::flash_data(0x1234, &[0xAA, 0xBB]);
        assert_eq!(frame.payload(), &[2, 0x12, 0x34, 0xAA, 0xBB]);
        assert_eq!(
            frame.build(),
            vec![b'@', b'D', 2, 0x12, 0x34, 0xAA, 0xBB, b'\n']
        );
    }

    #[test]
    fn test_flash_data_count_equal_to_end_marker_is_escaped() {
        let data = [0u8; 10];
        let built = Frame::flash_data(0, &data).build();
        assert_eq!(&built[..4], &[b'@', b'D', b'\\', 10]);
        assert_eq!(decode(&built).unwrap()[1], 10);
    }

    #[test]
    fn test_program_signature_frame() {
        let sig = [0x11u8; 64];
        let frame = Frame::program_signature(&sig);
        let decoded = decode(&frame.build()).unwrap();
        assert_eq!(decoded[0], b'N');
        assert_eq!(&decoded[1..], &sig);
    }

    #[test]
    fn test_flash_stop_frame() {
        assert_eq!(Frame::flash_stop().build(), b"@X\n");
    }

    #[test]
    fn test_handshake_constants() {
        assert_eq!(HANDSHAKE_GREETING, b"@BTL\n");
        assert_eq!(HANDSHAKE_READY.len(), 4);
    }
}
