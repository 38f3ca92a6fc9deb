//! Index File Wire Format
//!
//! Every segment file has a sibling index file holding one fixed 29-byte
//! record per chunk, enabling O(1) seeks to any chunk by number.
//!
//! ## Index Record Layout (29 bytes, big-endian)
//!
//! ```text
//! ┌──────────┬───────────┬─────────┬───────────────┬────────────┐
//! │ Chunk id │ Timestamp │ Epoch   │ File position │ Chunk type │
//! │ (u64)    │ (i64)     │ (u64)   │ (u32)         │ (u8)       │
//! └──────────┴───────────┴─────────┴───────────────┴────────────┘
//! ```
//!
//! The file position points at the chunk header inside the segment file.
//!
//! ## EOF Alignment
//!
//! Another task may be extending the index while we measure it, so a raw
//! file length is not trustworthy as a record boundary. `align_position`
//! rounds a position down to `header + k * 29` before it is used.

use bytes::BufMut;

use crate::chunk::ChunkType;
use crate::error::{Error, Result};

/// Magic bytes at the start of every index file: "OSIX"
pub const INDEX_MAGIC: [u8; 4] = *b"OSIX";

/// Index file format version
pub const INDEX_VERSION: u32 = 1;

/// Size of the index file header (magic + version)
pub const INDEX_HEADER_SIZE: usize = 8;

/// Size of one index record
pub const INDEX_RECORD_SIZE: usize = 29;

/// One fixed-size index record describing a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    pub chunk_id: u64,
    pub timestamp: i64,
    pub epoch: u64,
    /// Byte position of the chunk header inside the segment file
    pub position: u32,
    pub chunk_type: ChunkType,
}

impl IndexRecord {
    /// Encode into the fixed 29-byte layout.
    pub fn encode(&self) -> [u8; INDEX_RECORD_SIZE] {
        let mut buf = [0u8; INDEX_RECORD_SIZE];
        {
            let mut cursor = &mut buf[..];
            cursor.put_u64(self.chunk_id);
            cursor.put_i64(self.timestamp);
            cursor.put_u64(self.epoch);
            cursor.put_u32(self.position);
            cursor.put_u8(self.chunk_type as u8);
        }
        buf
    }

    /// Decode from at least 29 bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < INDEX_RECORD_SIZE {
            return Err(Error::TruncatedIndexRecord);
        }
        Ok(IndexRecord {
            chunk_id: u64::from_be_bytes(buf[0..8].try_into().expect("8 bytes")),
            timestamp: i64::from_be_bytes(buf[8..16].try_into().expect("8 bytes")),
            epoch: u64::from_be_bytes(buf[16..24].try_into().expect("8 bytes")),
            position: u32::from_be_bytes(buf[24..28].try_into().expect("4 bytes")),
            chunk_type: ChunkType::try_from(buf[28])?,
        })
    }
}

/// True when the 29 bytes are all zero. Recovery treats such records as a
/// preallocated-but-unwritten tail, distinct from a record for chunk 0
/// which always carries a nonzero position or type-check context.
pub fn is_all_zero(buf: &[u8]) -> bool {
    buf.iter().all(|b| *b == 0)
}

/// Round a file position down to the nearest record boundary.
pub fn align_position(pos: u64) -> u64 {
    if pos <= INDEX_HEADER_SIZE as u64 {
        return INDEX_HEADER_SIZE as u64;
    }
    let body = pos - INDEX_HEADER_SIZE as u64;
    INDEX_HEADER_SIZE as u64 + (body / INDEX_RECORD_SIZE as u64) * INDEX_RECORD_SIZE as u64
}

/// Encode the 8-byte index file header.
pub fn encode_index_header() -> [u8; INDEX_HEADER_SIZE] {
    let mut buf = [0u8; INDEX_HEADER_SIZE];
    buf[..4].copy_from_slice(&INDEX_MAGIC);
    buf[4..].copy_from_slice(&INDEX_VERSION.to_be_bytes());
    buf
}

/// Validate the 8-byte index file header.
pub fn validate_index_header(buf: &[u8]) -> Result<()> {
    if buf.len() < INDEX_HEADER_SIZE {
        return Err(Error::TruncatedIndexRecord);
    }
    if buf[..4] != INDEX_MAGIC {
        return Err(Error::InvalidMagic);
    }
    let version = u32::from_be_bytes(buf[4..8].try_into().expect("4 bytes"));
    if version != INDEX_VERSION {
        return Err(Error::UnsupportedVersion(version as u8));
    }
    Ok(())
}
