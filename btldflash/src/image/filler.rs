//! Address gap filling.
//!
//! The bootloader expects a contiguous image. When a data record starts past
//! the end of the previous one, the hole is covered with erased-flash bytes
//! (0xFF) sent in 64-byte chunks, with a final shorter chunk for the
//! remainder.

/// Value written into address gaps.
pub const FILL_BYTE: u8 = 0xFF;

/// Maximum size of one filler chunk.
pub const FILL_CHUNK_SIZE: usize = 64;

static FILL_BLOCK: [u8; FILL_CHUNK_SIZE] = [FILL_BYTE; FILL_CHUNK_SIZE];

/// One filler block to be sent as a flash-data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillChunk {
    /// Start address of the chunk.
    pub address: u16,
    len: usize,
}

impl FillChunk {
    /// Filler bytes of this chunk.
    pub fn data(&self) -> &'static [u8] {
        &FILL_BLOCK[..self.len]
    }

    /// Number of filler bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the chunk holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Iterator over the filler chunks covering `[start, end)`.
#[derive(Debug, Clone)]
pub struct FillChunks {
    next: u32,
    end: u32,
}

impl FillChunks {
    /// Total number of filler bytes still to be produced.
    pub fn remaining_bytes(&self) -> u32 {
        self.end - self.next
    }
}

impl Iterator for FillChunks {
    type Item = FillChunk;

    #[allow(clippy::cast_possible_truncation)]
    fn next(&mut self) -> Option<FillChunk> {
        if self.next >= self.end {
            return None;
        }
        let len = (self.end - self.next).min(FILL_CHUNK_SIZE as u32);
        // `end` is a record address, so every chunk start fits in 16 bits.
        let chunk = FillChunk {
            address: self.next as u16,
            len: len as usize,
        };
        self.next += len;
        Some(chunk)
    }
}

/// Filler needed before a record at `address`, given the next expected
/// address.
///
/// Yields nothing when `address <= next_expected`.
pub fn gap_chunks(next_expected: u32, address: u16) -> FillChunks {
    let end = u32::from(address);
    FillChunks {
        next: next_expected.min(end),
        end,
    }
}
