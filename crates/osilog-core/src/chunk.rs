//! Chunk Wire Format
//!
//! This module implements the binary layout of a chunk - the unit of write,
//! replication, and read in an osilog log.
//!
//! ## Chunk Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (56 bytes)                                           │
//! │ - Magic (4 bits = 5) | Version (4 bits = 1)     (1 byte)    │
//! │ - Chunk type: user / trk-delta / trk-snapshot   (1 byte)    │
//! │ - Entry count                                   (u16)       │
//! │ - Record count                                  (u32)       │
//! │ - Timestamp, milliseconds                       (i64)       │
//! │ - Epoch                                         (u64)       │
//! │ - Chunk id (offset of the first record)         (u64)       │
//! │ - CRC32 of the data region                      (u32)       │
//! │ - Data size                                     (u32)       │
//! │ - Trailer size                                  (u32)       │
//! │ - Filter size                                   (u8)        │
//! │ - Reserved, zero                                (11 bytes)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Bloom filter (filter size bytes, may be 0)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Data region (entry frames, CRC protected)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Trailer region (tracking entries, may be 0 bytes)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! All multi-byte integers are big-endian. The CRC covers exactly the data
//! region: not the header, not the filter, not the trailer.
//!
//! ## Entry Frames
//!
//! The data region is a sequence of entry frames. Two shapes exist:
//!
//! - **Simple entry**: a u32 whose top bit is 0, giving a 31-bit body
//!   length, followed by the body. One simple entry is one record.
//! - **Sub-batch entry**: a first byte `1ccc0000` (c = 3-bit compression
//!   type), then record count (u16), uncompressed length (u32), body
//!   length (u32), and the opaque body. A sub-batch spans `record count`
//!   record offsets but is never decompressed by the engine.
//!
//! ## Record Offsets
//!
//! Offsets are dense: the chunk id is the offset of the first record, and a
//! chunk with N records is followed by a chunk whose id is `chunk_id + N`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Magic bytes at the start of every segment file: "OSIL"
pub const LOG_MAGIC: [u8; 4] = *b"OSIL";

/// Segment file format version
pub const LOG_VERSION: u32 = 1;

/// Size of the segment file header (magic + version)
pub const LOG_HEADER_SIZE: usize = 8;

/// Chunk magic nibble, packed into the high half of the first header byte
pub const CHUNK_MAGIC: u8 = 5;

/// Chunk format version nibble, packed into the low half of the first byte
pub const CHUNK_VERSION: u8 = 1;

/// Size of a chunk header in bytes
pub const CHUNK_HEADER_SIZE: usize = 56;

/// The default Bloom filter width readers speculatively fetch along with
/// the header. Chunks may carry larger (or zero-width) filters.
pub const DEFAULT_FILTER_SIZE: u8 = 16;

/// Type of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChunkType {
    /// Producer records
    User = 0,
    /// Tracking deltas (consumer offsets, producer sequences)
    TrackingDelta = 1,
    /// Full tracking state snapshot
    TrackingSnapshot = 2,
}

impl TryFrom<u8> for ChunkType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ChunkType::User),
            1 => Ok(ChunkType::TrackingDelta),
            2 => Ok(ChunkType::TrackingSnapshot),
            other => Err(Error::InvalidChunkType(other)),
        }
    }
}

/// Decoded chunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Chunk type
    pub chunk_type: ChunkType,

    /// Number of entry frames in the data region
    pub num_entries: u16,

    /// Number of record offsets this chunk spans
    pub num_records: u32,

    /// Writer-supplied timestamp in milliseconds
    pub timestamp: i64,

    /// Epoch the chunk was written in
    pub epoch: u64,

    /// Offset of the first record; primary key of the chunk
    pub chunk_id: u64,

    /// CRC32 of the data region
    pub crc: u32,

    /// Size of the data region in bytes
    pub data_size: u32,

    /// Size of the trailer region in bytes
    pub trailer_size: u32,

    /// Size of the Bloom filter in bytes
    pub filter_size: u8,
}

impl ChunkHeader {
    /// Encode the header into its fixed 56-byte layout.
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let mut buf = [0u8; CHUNK_HEADER_SIZE];
        {
            let mut cursor = &mut buf[..];
            cursor.put_u8((CHUNK_MAGIC << 4) | CHUNK_VERSION);
            cursor.put_u8(self.chunk_type as u8);
            cursor.put_u16(self.num_entries);
            cursor.put_u32(self.num_records);
            cursor.put_i64(self.timestamp);
            cursor.put_u64(self.epoch);
            cursor.put_u64(self.chunk_id);
            cursor.put_u32(self.crc);
            cursor.put_u32(self.data_size);
            cursor.put_u32(self.trailer_size);
            cursor.put_u8(self.filter_size);
            // remaining 11 bytes stay zero (reserved)
        }
        buf
    }

    /// Decode and validate a header from at least 56 bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < CHUNK_HEADER_SIZE {
            return Err(Error::TruncatedChunk);
        }

        let magic_version = buf[0];
        if magic_version >> 4 != CHUNK_MAGIC {
            return Err(Error::InvalidMagic);
        }
        if magic_version & 0x0F != CHUNK_VERSION {
            return Err(Error::UnsupportedVersion(magic_version & 0x0F));
        }

        let chunk_type = ChunkType::try_from(buf[1])?;
        let num_entries = u16::from_be_bytes([buf[2], buf[3]]);
        let num_records = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let timestamp = i64::from_be_bytes(buf[8..16].try_into().expect("8 bytes"));
        let epoch = u64::from_be_bytes(buf[16..24].try_into().expect("8 bytes"));
        let chunk_id = u64::from_be_bytes(buf[24..32].try_into().expect("8 bytes"));
        let crc = u32::from_be_bytes(buf[32..36].try_into().expect("4 bytes"));
        let data_size = u32::from_be_bytes(buf[36..40].try_into().expect("4 bytes"));
        let trailer_size = u32::from_be_bytes(buf[40..44].try_into().expect("4 bytes"));
        let filter_size = buf[44];

        if num_records == 0 {
            return Err(Error::InvalidChunkHeader("zero record count"));
        }

        Ok(ChunkHeader {
            chunk_type,
            num_entries,
            num_records,
            timestamp,
            epoch,
            chunk_id,
            crc,
            data_size,
            trailer_size,
            filter_size,
        })
    }

    /// Size of everything after the header: filter + data + trailer.
    pub fn body_size(&self) -> u64 {
        self.filter_size as u64 + self.data_size as u64 + self.trailer_size as u64
    }

    /// Total on-disk footprint of the chunk, header included.
    pub fn total_size(&self) -> u64 {
        CHUNK_HEADER_SIZE as u64 + self.body_size()
    }

    /// Chunk id of the chunk that follows this one (offsets are dense).
    pub fn next_chunk_id(&self) -> u64 {
        self.chunk_id + self.num_records as u64
    }
}

/// Encode the 8-byte segment file header.
pub fn encode_log_header() -> [u8; LOG_HEADER_SIZE] {
    let mut buf = [0u8; LOG_HEADER_SIZE];
    buf[..4].copy_from_slice(&LOG_MAGIC);
    buf[4..].copy_from_slice(&LOG_VERSION.to_be_bytes());
    buf
}

/// Validate the 8-byte segment file header.
pub fn validate_log_header(buf: &[u8]) -> Result<()> {
    if buf.len() < LOG_HEADER_SIZE {
        return Err(Error::TruncatedChunk);
    }
    if buf[..4] != LOG_MAGIC {
        return Err(Error::InvalidMagic);
    }
    let version = u32::from_be_bytes(buf[4..8].try_into().expect("4 bytes"));
    if version != LOG_VERSION {
        return Err(Error::UnsupportedVersion(version as u8));
    }
    Ok(())
}

/// A single entry recovered from the data region of a chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordEntry {
    /// One record body
    Simple(Bytes),

    /// An opaque, possibly compressed batch of records. The engine
    /// preserves the frame verbatim for consumers that decompress
    /// client-side.
    SubBatch {
        compression: u8,
        num_records: u16,
        uncompressed_len: u32,
        data: Bytes,
    },
}

impl RecordEntry {
    /// Number of record offsets this entry spans.
    pub fn record_count(&self) -> u32 {
        match self {
            RecordEntry::Simple(_) => 1,
            RecordEntry::SubBatch { num_records, .. } => *num_records as u32,
        }
    }
}

/// Append a simple entry frame to `buf`. The body length must fit in 31 bits.
pub fn encode_simple_entry(buf: &mut BytesMut, body: &[u8]) -> Result<()> {
    if body.len() > 0x7FFF_FFFF {
        return Err(Error::InvalidChunkHeader("entry body exceeds 31-bit length"));
    }
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    Ok(())
}

/// Append a sub-batch entry frame to `buf`. The body is written verbatim.
pub fn encode_sub_batch_entry(
    buf: &mut BytesMut,
    compression: u8,
    num_records: u16,
    uncompressed_len: u32,
    body: &[u8],
) -> Result<()> {
    if compression > 0x07 {
        return Err(Error::InvalidChunkHeader("compression type exceeds 3 bits"));
    }
    if num_records == 0 {
        return Err(Error::InvalidChunkHeader("empty sub-batch"));
    }
    buf.put_u8(0x80 | (compression << 4));
    buf.put_u16(num_records);
    buf.put_u32(uncompressed_len);
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    Ok(())
}

/// Split a chunk's data region into `(record offset, entry)` pairs.
///
/// `chunk_id` seeds the offset numbering; a sub-batch advances it by its
/// record count. Sub-batch bodies are returned opaque.
pub fn parse_entries(data: &Bytes, chunk_id: u64) -> Result<Vec<(u64, RecordEntry)>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    let mut offset = chunk_id;

    while pos < data.len() {
        if data[pos] & 0x80 == 0 {
            // simple entry
            if pos + 4 > data.len() {
                return Err(Error::TruncatedEntry(pos));
            }
            let len = u32::from_be_bytes(data[pos..pos + 4].try_into().expect("4 bytes")) as usize;
            pos += 4;
            if pos + len > data.len() {
                return Err(Error::TruncatedEntry(pos));
            }
            entries.push((offset, RecordEntry::Simple(data.slice(pos..pos + len))));
            pos += len;
            offset += 1;
        } else {
            // sub-batch entry
            if pos + 11 > data.len() {
                return Err(Error::TruncatedEntry(pos));
            }
            let compression = (data[pos] >> 4) & 0x07;
            let num_records = u16::from_be_bytes([data[pos + 1], data[pos + 2]]);
            let uncompressed_len =
                u32::from_be_bytes(data[pos + 3..pos + 7].try_into().expect("4 bytes"));
            let len =
                u32::from_be_bytes(data[pos + 7..pos + 11].try_into().expect("4 bytes")) as usize;
            pos += 11;
            if pos + len > data.len() {
                return Err(Error::TruncatedEntry(pos));
            }
            if num_records == 0 {
                return Err(Error::InvalidChunkHeader("empty sub-batch"));
            }
            entries.push((
                offset,
                RecordEntry::SubBatch {
                    compression,
                    num_records,
                    uncompressed_len,
                    data: data.slice(pos..pos + len),
                },
            ));
            pos += len;
            offset += num_records as u64;
        }
    }

    Ok(entries)
}
