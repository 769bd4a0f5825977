//! Firmware image source handling.

pub mod filler;
pub mod record;

pub use filler::{FILL_BYTE, FILL_CHUNK_SIZE, FillChunk, FillChunks, gap_chunks};
pub use record::{ParseOptions, Record, RecordKind, Records};
