//! Tracking Entry Wire Format
//!
//! Tracking entries carry out-of-band per-chunk data: producer sequence
//! numbers for deduplication, consumer offsets, and per-id timestamps. They
//! appear in the trailer region of user chunks and as the body of tracking
//! delta and snapshot chunks.
//!
//! ## Layout
//!
//! ```text
//! ┌──────┬───────────┬──────────┬───────────────┐
//! │ Type │ Id length │ Id bytes │ Tracking data │
//! │ (u8) │ (u8)      │ (N)      │ (8 bytes, BE) │
//! └──────┴───────────┴──────────┴───────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of tracking data an entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TrackingType {
    /// Producer sequence number (deduplication)
    Sequence = 0,
    /// Consumer offset
    Offset = 1,
    /// Per-id timestamp
    Timestamp = 2,
}

impl TryFrom<u8> for TrackingType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TrackingType::Sequence),
            1 => Ok(TrackingType::Offset),
            2 => Ok(TrackingType::Timestamp),
            other => Err(Error::InvalidTrackingType(other)),
        }
    }
}

/// One decoded tracking entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingEntry {
    pub tracking_type: TrackingType,
    pub id: Bytes,
    /// Raw 8-byte payload. Timestamps are two's-complement milliseconds.
    pub value: u64,
}

impl TrackingEntry {
    /// Append the encoded entry to `buf`. Ids longer than 255 bytes are
    /// rejected.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        if self.id.len() > u8::MAX as usize {
            return Err(Error::TruncatedTrackingEntry);
        }
        buf.put_u8(self.tracking_type as u8);
        buf.put_u8(self.id.len() as u8);
        buf.put_slice(&self.id);
        buf.put_u64(self.value);
        Ok(())
    }
}

/// Parse a trailer or snapshot body into its tracking entries.
pub fn parse_tracking_entries(data: &Bytes) -> Result<Vec<TrackingEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        if pos + 2 > data.len() {
            return Err(Error::TruncatedTrackingEntry);
        }
        let tracking_type = TrackingType::try_from(data[pos])?;
        let id_len = data[pos + 1] as usize;
        pos += 2;
        if pos + id_len + 8 > data.len() {
            return Err(Error::TruncatedTrackingEntry);
        }
        let id = data.slice(pos..pos + id_len);
        pos += id_len;
        let value = u64::from_be_bytes(data[pos..pos + 8].try_into().expect("8 bytes"));
        pos += 8;
        entries.push(TrackingEntry {
            tracking_type,
            id,
            value,
        });
    }

    Ok(entries)
}
