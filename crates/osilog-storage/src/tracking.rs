//! Tracking State
//!
//! Tracking is out-of-band per-chunk data embedded in the log itself:
//! producer sequence numbers (deduplication), consumer offsets, and per-id
//! timestamps. The in-memory state here is transient; on startup it is
//! rebuilt by scanning chunks from a segment boundary:
//!
//! - a TRK_SNAPSHOT chunk resets the state from its single entry body
//! - a TRK_DELTA chunk applies its single entry body as deltas
//! - a USER chunk applies its trailer bytes (if any) as deltas
//!
//! The writer makes this scan complete by emitting a snapshot as the first
//! chunk of every new segment whenever the state is non-empty, so scanning
//! the most recent segment suffices for logs this engine wrote. For foreign
//! logs, `scan_older_segments` walks back until a segment that begins with
//! a snapshot.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use osilog_core::chunk::{ChunkHeader, ChunkType, CHUNK_HEADER_SIZE, LOG_HEADER_SIZE};
use osilog_core::tracking::{parse_tracking_entries, TrackingEntry, TrackingType};
use osilog_core::{parse_entries, RecordEntry};
use serde::{Deserialize, Serialize};

use crate::directory::SegmentPairInfo;
use crate::error::Result;
use crate::segment::{read_at_most, read_exact_at};

/// Configuration forwarded to the tracking module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Scan back past the most recent segment when it does not begin with
    /// a snapshot (needed only for logs written by other engines)
    #[serde(default)]
    pub scan_older_segments: bool,
}

/// In-memory tracking state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingState {
    /// Producer id -> (chunk id the sequence was last seen in, sequence)
    sequences: BTreeMap<Bytes, (u64, u64)>,
    /// Consumer id -> offset
    offsets: BTreeMap<Bytes, u64>,
    /// Id -> timestamp (two's-complement milliseconds)
    timestamps: BTreeMap<Bytes, u64>,
}

impl TrackingState {
    /// Build state from an optional serialized snapshot.
    pub fn init(snapshot: Option<&Bytes>, _config: &TrackingConfig) -> Result<Self> {
        let mut state = TrackingState::default();
        if let Some(bytes) = snapshot {
            state.reset_from(0, bytes)?;
        }
        Ok(state)
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty() && self.offsets.is_empty() && self.timestamps.is_empty()
    }

    /// Replace the state with the entries serialized in `bytes`, scoping
    /// sequences to `chunk_id` (the snapshot chunk's id).
    pub fn reset_from(&mut self, chunk_id: u64, bytes: &Bytes) -> Result<()> {
        self.sequences.clear();
        self.offsets.clear();
        self.timestamps.clear();
        self.append_trailer(chunk_id, bytes)
    }

    /// Apply trailer or delta bytes, scoped to the chunk they rode in.
    pub fn append_trailer(&mut self, chunk_id: u64, bytes: &Bytes) -> Result<()> {
        for entry in parse_tracking_entries(bytes)? {
            match entry.tracking_type {
                TrackingType::Sequence => {
                    self.sequences.insert(entry.id, (chunk_id, entry.value));
                }
                TrackingType::Offset => {
                    self.offsets.insert(entry.id, entry.value);
                }
                TrackingType::Timestamp => {
                    self.timestamps.insert(entry.id, entry.value);
                }
            }
        }
        Ok(())
    }

    /// Serialize the state for a snapshot chunk, first pruning entries
    /// that refer to data retention has already removed: sequences last
    /// seen before `first_offset` and timestamps older than
    /// `first_timestamp`.
    pub fn snapshot(&mut self, first_offset: u64, first_timestamp: i64) -> Result<Bytes> {
        self.sequences.retain(|_, (scope, _)| *scope >= first_offset);
        self.timestamps
            .retain(|_, ts| (*ts as i64) >= first_timestamp);

        let mut buf = BytesMut::new();
        for (id, (_, seq)) in &self.sequences {
            TrackingEntry {
                tracking_type: TrackingType::Sequence,
                id: id.clone(),
                value: *seq,
            }
            .encode(&mut buf)?;
        }
        for (id, offset) in &self.offsets {
            TrackingEntry {
                tracking_type: TrackingType::Offset,
                id: id.clone(),
                value: *offset,
            }
            .encode(&mut buf)?;
        }
        for (id, ts) in &self.timestamps {
            TrackingEntry {
                tracking_type: TrackingType::Timestamp,
                id: id.clone(),
                value: *ts,
            }
            .encode(&mut buf)?;
        }
        Ok(buf.freeze())
    }

    pub fn sequence(&self, id: &[u8]) -> Option<u64> {
        self.sequences.get(id).map(|(_, seq)| *seq)
    }

    pub fn offset(&self, id: &[u8]) -> Option<u64> {
        self.offsets.get(id).copied()
    }

    pub fn timestamp(&self, id: &[u8]) -> Option<i64> {
        self.timestamps.get(id).map(|ts| *ts as i64)
    }
}

/// Rebuild tracking state by scanning chunks across `pairs`, starting at
/// the most recent segment (or further back, see [`TrackingConfig`]).
pub(crate) fn recover(pairs: &[SegmentPairInfo], config: &TrackingConfig) -> Result<TrackingState> {
    let mut start = pairs.len().saturating_sub(1);
    if config.scan_older_segments {
        while start > 0 {
            let begins_with_snapshot = matches!(
                pairs[start].first_record()?,
                Some(record) if record.chunk_type == ChunkType::TrackingSnapshot
            );
            if begins_with_snapshot {
                break;
            }
            start -= 1;
        }
    }

    let mut state = TrackingState::default();
    for pair in &pairs[start..] {
        scan_segment(pair, &mut state)?;
    }
    Ok(state)
}

/// Walk one segment file chunk by chunk, folding tracking data into
/// `state`, until EOF.
fn scan_segment(pair: &SegmentPairInfo, state: &mut TrackingState) -> Result<()> {
    let segment = pair.open_segment()?;
    let mut position = LOG_HEADER_SIZE as u64;

    loop {
        let raw = read_at_most(&segment, position, CHUNK_HEADER_SIZE)?;
        if raw.len() < CHUNK_HEADER_SIZE {
            return Ok(());
        }
        let header = ChunkHeader::decode(&raw)?;
        let data_pos = position + CHUNK_HEADER_SIZE as u64 + header.filter_size as u64;

        match header.chunk_type {
            ChunkType::TrackingSnapshot | ChunkType::TrackingDelta => {
                let data = Bytes::from(read_exact_at(&segment, data_pos, header.data_size as usize)?);
                let body = match parse_entries(&data, header.chunk_id)?.into_iter().next() {
                    Some((_, RecordEntry::Simple(body))) => body,
                    _ => Bytes::new(),
                };
                if header.chunk_type == ChunkType::TrackingSnapshot {
                    state.reset_from(header.chunk_id, &body)?;
                } else {
                    state.append_trailer(header.chunk_id, &body)?;
                }
            }
            ChunkType::User => {
                if header.trailer_size > 0 {
                    let trailer_pos = data_pos + header.data_size as u64;
                    let trailer = Bytes::from(read_exact_at(
                        &segment,
                        trailer_pos,
                        header.trailer_size as usize,
                    )?);
                    state.append_trailer(header.chunk_id, &trailer)?;
                }
            }
        }

        position += header.total_size();
    }
}
