//! Writer Core
//!
//! One writer task owns the head of each log. It assembles chunks from
//! locally produced entries (`write`) or appends pre-framed chunks arriving
//! from replication (`accept_chunk`), keeps the index in lockstep, rolls
//! segments, and publishes progress through the shared cells and counters.
//!
//! ## Write Flow
//!
//! ```text
//! write(entries, type, timestamp, trailer)
//!     ↓
//! roll segment if thresholds met   ← new pair named by next chunk id,
//!     ↓                              tracking snapshot written first,
//!     ↓                              retention evaluation scheduled
//! frame entries                    ← Bloom accumulation, CRC over data
//!     ↓
//! append chunk to segment
//!     ↓
//! append 29-byte index record
//!     ↓
//! publish last_chunk_id            ← readers may now parse the chunk
//! ```
//!
//! ## Replication Path
//!
//! `accept_chunk` takes the leader's chunk bytes unchanged. The embedded
//! chunk id must equal the writer's next chunk id (anything else is a
//! fatal ordering violation) and the data CRC is re-validated before the
//! bytes touch disk.
//!
//! ## Epoch Safety
//!
//! At open, if the recovered tail carries an epoch greater than the
//! configured one the writer refuses to start: a newer leader has written
//! here and this process is stale.

use bytes::{BufMut, Bytes, BytesMut};

use osilog_core::chunk::{
    encode_simple_entry, encode_sub_batch_entry, ChunkHeader, ChunkType, CHUNK_HEADER_SIZE,
};
use osilog_core::{parse_entries, RecordEntry};

use std::sync::Arc;

use crate::bloom::ChunkFilter;
use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::recovery::recover_tail;
use crate::retention;
use crate::segment::SegmentAppender;
use crate::shared::{Counters, SharedCells};
use crate::tracking::{self, TrackingState};

/// Get current timestamp in milliseconds
fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One entry handed to [`Log::write`].
#[derive(Debug, Clone)]
pub enum WriteEntry {
    /// Raw record bytes
    Simple(Bytes),

    /// Record bytes with a Bloom filter value
    Filtered { filter: Bytes, data: Bytes },

    /// A pre-compressed batch passed through opaquely
    SubBatch {
        compression: u8,
        num_records: u16,
        uncompressed_len: u32,
        data: Bytes,
    },
}

/// Identity of the last chunk in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastChunkInfo {
    pub epoch: u64,
    pub chunk_id: u64,
    pub timestamp: i64,
}

/// The writer's cached tail state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailInfo {
    /// Id the next written chunk will carry
    pub next_chunk_id: u64,
    /// `None` on an empty log
    pub last_chunk: Option<LastChunkInfo>,
}

/// A log opened for writing.
pub struct Log {
    config: LogConfig,
    shared: SharedCells,
    counters: Option<Arc<Counters>>,
    appender: SegmentAppender,
    next_chunk_id: u64,
    last_chunk: Option<LastChunkInfo>,
    first_timestamp: i64,
    tracking: TrackingState,
}

impl Log {
    /// Open (and repair) the log in `config.dir` for appending.
    pub fn open(config: LogConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.dir).map_err(|e| Error::from_io(&config.dir, e))?;

        let recovered = recover_tail(
            &config.dir,
            config.initial_offset,
            config.index_files.as_deref(),
        )?;
        let last_pair = recovered.pairs.last().expect("recovery keeps one pair");

        let (next_chunk_id, last_chunk) = match &recovered.tail {
            Some(tail) => {
                if tail.header.epoch > config.epoch {
                    return Err(Error::InvalidEpoch {
                        last_found: tail.header.epoch,
                        configured: config.epoch,
                    });
                }
                (
                    tail.header.next_chunk_id(),
                    Some(LastChunkInfo {
                        epoch: tail.header.epoch,
                        chunk_id: tail.header.chunk_id,
                        timestamp: tail.header.timestamp,
                    }),
                )
            }
            None => (last_pair.first_chunk_id, None),
        };

        let tracking = tracking::recover(&recovered.pairs, &config.tracking_config)?;
        let first_record = recovered.pairs[0].first_record()?;
        let first_timestamp = first_record.map(|r| r.timestamp).unwrap_or(-1);

        let shared = config.shared.clone().unwrap_or_default();
        shared.set_first_chunk_id(first_record.map(|r| r.chunk_id as i64).unwrap_or(-1));
        shared.set_last_chunk_id(last_chunk.map(|c| c.chunk_id as i64).unwrap_or(-1));

        let counters = config
            .counter_spec
            .as_ref()
            .map(|spec| Counters::register(&spec.name, &spec.extra_fields));
        if let Some(counters) = &counters {
            counters.put("offset", last_chunk.map(|c| c.chunk_id as i64).unwrap_or(-1));
            counters.put(
                "first_offset",
                first_record.map(|r| r.chunk_id as i64).unwrap_or(-1),
            );
            counters.put("first_timestamp", first_timestamp);
            counters.put("chunks", 0);
            counters.put("segments", recovered.pairs.len() as i64);
        }

        let appender = SegmentAppender::open(&config.dir, last_pair.first_chunk_id)?;

        tracing::info!(
            log = %config.name,
            dir = %config.dir.display(),
            epoch = config.epoch,
            next_chunk_id,
            segments = recovered.pairs.len(),
            "log opened for writing"
        );

        Ok(Log {
            config,
            shared,
            counters,
            appender,
            next_chunk_id,
            last_chunk,
            first_timestamp,
            tracking,
        })
    }

    /// Assemble and append one chunk from `entries`.
    ///
    /// `(filter, data)` entries insert their filter value into the chunk's
    /// Bloom filter; plain entries insert the empty string. Sub-batches
    /// are framed verbatim. The optional `trailer` rides behind the data
    /// region, outside the CRC.
    pub fn write(
        &mut self,
        entries: &[WriteEntry],
        chunk_type: ChunkType,
        timestamp: i64,
        trailer: Option<Bytes>,
    ) -> Result<()> {
        if entries.is_empty() {
            return Err(Error::EmptyWrite);
        }
        self.maybe_roll(true)?;

        let mut filter = ChunkFilter::new(self.config.filter_size);
        let mut data = BytesMut::new();
        let mut num_records: u64 = 0;
        for entry in entries {
            match entry {
                WriteEntry::Simple(body) => {
                    filter.insert(b"");
                    encode_simple_entry(&mut data, body)?;
                    num_records += 1;
                }
                WriteEntry::Filtered { filter: value, data: body } => {
                    filter.insert(value);
                    encode_simple_entry(&mut data, body)?;
                    num_records += 1;
                }
                WriteEntry::SubBatch {
                    compression,
                    num_records: batch_records,
                    uncompressed_len,
                    data: body,
                } => {
                    filter.insert(b"");
                    encode_sub_batch_entry(
                        &mut data,
                        *compression,
                        *batch_records,
                        *uncompressed_len,
                        body,
                    )?;
                    num_records += *batch_records as u64;
                }
            }
        }

        let num_entries = u16::try_from(entries.len()).map_err(|_| Error::ChunkTooLarge {
            entries: entries.len(),
            records: num_records,
        })?;
        let num_records = u32::try_from(num_records).map_err(|_| Error::ChunkTooLarge {
            entries: entries.len(),
            records: u64::MAX,
        })?;

        let trailer = trailer.unwrap_or_default();
        let data = data.freeze();
        let chunk_id = self.append_assembled(
            chunk_type,
            num_entries,
            num_records,
            timestamp,
            filter.to_bytes(),
            data.clone(),
            trailer.clone(),
        )?;

        // keep the in-memory tracking state in step with what just became
        // durable
        match chunk_type {
            ChunkType::User if !trailer.is_empty() => {
                self.tracking.append_trailer(chunk_id, &trailer)?;
            }
            ChunkType::TrackingDelta => {
                for (_, entry) in parse_entries(&data, chunk_id)? {
                    if let RecordEntry::Simple(body) = entry {
                        self.tracking.append_trailer(chunk_id, &body)?;
                    }
                }
            }
            ChunkType::TrackingSnapshot => {
                if let Some((_, RecordEntry::Simple(body))) =
                    parse_entries(&data, chunk_id)?.into_iter().next()
                {
                    self.tracking.reset_from(chunk_id, &body)?;
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Append a pre-framed chunk arriving from replication, unchanged.
    pub fn accept_chunk(&mut self, bytes: &[u8]) -> Result<()> {
        let header = ChunkHeader::decode(bytes)?;
        if header.chunk_id != self.next_chunk_id {
            return Err(Error::AcceptChunkOutOfOrder {
                seen: header.chunk_id,
                expected: self.next_chunk_id,
            });
        }
        let total = header.total_size() as usize;
        if bytes.len() < total {
            return Err(Error::Codec(osilog_core::Error::TruncatedChunk));
        }

        let data_start = CHUNK_HEADER_SIZE + header.filter_size as usize;
        let data_end = data_start + header.data_size as usize;
        let data = &bytes[data_start..data_end];
        if crc32fast::hash(data) != header.crc {
            return Err(Error::CrcValidationFailure {
                chunk_id: header.chunk_id,
            });
        }

        self.maybe_roll(false)?;
        self.appender.append_chunk(
            &bytes[..total],
            header.chunk_id,
            header.timestamp,
            header.epoch,
            header.chunk_type,
        )?;

        match header.chunk_type {
            ChunkType::User if header.trailer_size > 0 => {
                let trailer = Bytes::copy_from_slice(&bytes[data_end..total]);
                self.tracking.append_trailer(header.chunk_id, &trailer)?;
            }
            ChunkType::TrackingSnapshot | ChunkType::TrackingDelta => {
                let data = Bytes::copy_from_slice(data);
                if let Some((_, RecordEntry::Simple(body))) =
                    parse_entries(&data, header.chunk_id)?.into_iter().next()
                {
                    if header.chunk_type == ChunkType::TrackingSnapshot {
                        self.tracking.reset_from(header.chunk_id, &body)?;
                    } else {
                        self.tracking.append_trailer(header.chunk_id, &body)?;
                    }
                }
            }
            _ => {}
        }

        self.publish_write(header.chunk_id, header.num_records, header.timestamp, header.epoch);
        Ok(())
    }

    /// The writer's cached tail state.
    pub fn tail_info(&self) -> TailInfo {
        TailInfo {
            next_chunk_id: self.next_chunk_id,
            last_chunk: self.last_chunk,
        }
    }

    /// Shared cells handle; clone it into reader configs.
    pub fn shared(&self) -> &SharedCells {
        &self.shared
    }

    /// Registered counters, if a counter spec was configured.
    pub fn counters(&self) -> Option<&Arc<Counters>> {
        self.counters.as_ref()
    }

    /// Current in-memory tracking state.
    pub fn tracking(&self) -> &TrackingState {
        &self.tracking
    }

    // Build the header, glue header ‖ filter ‖ data ‖ trailer, and append.
    fn append_assembled(
        &mut self,
        chunk_type: ChunkType,
        num_entries: u16,
        num_records: u32,
        timestamp: i64,
        filter: Bytes,
        data: Bytes,
        trailer: Bytes,
    ) -> Result<u64> {
        let data_size = u32::try_from(data.len()).map_err(|_| Error::ChunkTooLarge {
            entries: num_entries as usize,
            records: num_records as u64,
        })?;
        let trailer_size = u32::try_from(trailer.len()).map_err(|_| Error::ChunkTooLarge {
            entries: num_entries as usize,
            records: num_records as u64,
        })?;

        let chunk_id = self.next_chunk_id;
        let epoch = self.config.epoch;
        let header = ChunkHeader {
            chunk_type,
            num_entries,
            num_records,
            timestamp,
            epoch,
            chunk_id,
            crc: crc32fast::hash(&data),
            data_size,
            trailer_size,
            filter_size: filter.len() as u8,
        };

        let mut buf =
            BytesMut::with_capacity(CHUNK_HEADER_SIZE + filter.len() + data.len() + trailer.len());
        buf.put_slice(&header.encode());
        buf.put_slice(&filter);
        buf.put_slice(&data);
        buf.put_slice(&trailer);

        self.appender
            .append_chunk(&buf, chunk_id, timestamp, epoch, chunk_type)?;
        self.publish_write(chunk_id, num_records, timestamp, epoch);
        Ok(chunk_id)
    }

    // Advance the cached tail and make the write visible to readers.
    fn publish_write(&mut self, chunk_id: u64, num_records: u32, timestamp: i64, epoch: u64) {
        self.next_chunk_id = chunk_id + num_records as u64;
        self.last_chunk = Some(LastChunkInfo {
            epoch,
            chunk_id,
            timestamp,
        });

        if self.shared.get_first_chunk_id() < 0 {
            self.shared.set_first_chunk_id(chunk_id as i64);
            self.first_timestamp = timestamp;
            if let Some(counters) = &self.counters {
                counters.put("first_offset", chunk_id as i64);
                counters.put("first_timestamp", timestamp);
            }
        }
        self.shared.set_last_chunk_id(chunk_id as i64);
        if let Some(counters) = &self.counters {
            counters.put("offset", chunk_id as i64);
            counters.add("chunks", 1);
        }
    }

    /// Roll to a fresh pair when the current one is at its limits. On the
    /// local write path (`with_snapshot`) the new segment opens with a
    /// tracking snapshot so a single-segment scan can rebuild the state;
    /// replicated logs receive the leader's snapshot chunks instead.
    fn maybe_roll(&mut self, with_snapshot: bool) -> Result<()> {
        if self.appender.segment_size() < self.config.max_segment_size_bytes
            && self.appender.chunk_count() < self.config.max_segment_size_chunks
        {
            return Ok(());
        }

        let first_chunk_id = self.next_chunk_id;
        tracing::info!(
            log = %self.config.name,
            first_chunk_id,
            closed_bytes = self.appender.segment_size(),
            closed_chunks = self.appender.chunk_count(),
            "rolling segment"
        );
        self.appender = SegmentAppender::create(&self.config.dir, first_chunk_id)?;
        if let Some(counters) = &self.counters {
            counters.add("segments", 1);
        }

        retention::spawn_eval(
            self.config.name.clone(),
            self.config.dir.clone(),
            self.config.retention.clone(),
            Some(self.shared.clone()),
            self.counters.clone(),
            None,
        );

        if with_snapshot && !self.tracking.is_empty() {
            let first_offset = self.shared.get_first_chunk_id().max(0) as u64;
            let body = self.tracking.snapshot(first_offset, self.first_timestamp)?;
            if !body.is_empty() {
                let mut data = BytesMut::new();
                encode_simple_entry(&mut data, &body)?;
                self.append_assembled(
                    ChunkType::TrackingSnapshot,
                    1,
                    1,
                    now_ms(),
                    ChunkFilter::new(self.config.filter_size).to_bytes(),
                    data.freeze(),
                    Bytes::new(),
                )?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("name", &self.config.name)
            .field("next_chunk_id", &self.next_chunk_id)
            .field("last_chunk", &self.last_chunk)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &std::path::Path) -> LogConfig {
        LogConfig {
            dir: dir.to_path_buf(),
            name: "test".to_string(),
            epoch: 1,
            ..Default::default()
        }
    }

    fn simple(body: &str) -> WriteEntry {
        WriteEntry::Simple(Bytes::from(body.to_string()))
    }

    // ---------------------------------------------------------------
    // Basic writes
    // ---------------------------------------------------------------

    #[test]
    fn test_open_empty_log() {
        let dir = TempDir::new().unwrap();
        let log = Log::open(config(dir.path())).unwrap();
        let tail = log.tail_info();
        assert_eq!(tail.next_chunk_id, 0);
        assert!(tail.last_chunk.is_none());
        assert_eq!(log.shared().get_last_chunk_id(), -1);
    }

    #[test]
    fn test_write_advances_tail_by_record_count() {
        let dir = TempDir::new().unwrap();
        let mut log = Log::open(config(dir.path())).unwrap();

        log.write(&[simple("a")], ChunkType::User, 1000, None).unwrap();
        assert_eq!(log.tail_info().next_chunk_id, 1);

        log.write(&[simple("b"), simple("c")], ChunkType::User, 2000, None)
            .unwrap();
        let tail = log.tail_info();
        assert_eq!(tail.next_chunk_id, 3);
        let last = tail.last_chunk.unwrap();
        assert_eq!(last.chunk_id, 1);
        assert_eq!(last.timestamp, 2000);
        assert_eq!(log.shared().get_last_chunk_id(), 1);
        assert_eq!(log.shared().get_first_chunk_id(), 0);
    }

    #[test]
    fn test_sub_batch_spans_offsets() {
        let dir = TempDir::new().unwrap();
        let mut log = Log::open(config(dir.path())).unwrap();
        log.write(
            &[WriteEntry::SubBatch {
                compression: 1,
                num_records: 10,
                uncompressed_len: 1000,
                data: Bytes::from_static(b"opaque"),
            }],
            ChunkType::User,
            1000,
            None,
        )
        .unwrap();
        assert_eq!(log.tail_info().next_chunk_id, 10);
    }

    #[test]
    fn test_empty_write_rejected() {
        let dir = TempDir::new().unwrap();
        let mut log = Log::open(config(dir.path())).unwrap();
        assert!(matches!(
            log.write(&[], ChunkType::User, 0, None),
            Err(Error::EmptyWrite)
        ));
    }

    // ---------------------------------------------------------------
    // Reopen
    // ---------------------------------------------------------------

    #[test]
    fn test_reopen_restores_tail() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = Log::open(config(dir.path())).unwrap();
            log.write(&[simple("a"), simple("b")], ChunkType::User, 1000, None)
                .unwrap();
            log.write(&[simple("c")], ChunkType::User, 2000, None).unwrap();
        }
        let log = Log::open(config(dir.path())).unwrap();
        let tail = log.tail_info();
        assert_eq!(tail.next_chunk_id, 3);
        assert_eq!(tail.last_chunk.unwrap().chunk_id, 2);
    }

    #[test]
    fn test_stale_epoch_refused() {
        let dir = TempDir::new().unwrap();
        {
            let mut cfg = config(dir.path());
            cfg.epoch = 5;
            let mut log = Log::open(cfg).unwrap();
            log.write(&[simple("a")], ChunkType::User, 1000, None).unwrap();
        }
        let mut stale = config(dir.path());
        stale.epoch = 3;
        assert!(matches!(
            Log::open(stale),
            Err(Error::InvalidEpoch {
                last_found: 5,
                configured: 3
            })
        ));
    }

    // ---------------------------------------------------------------
    // Replication path
    // ---------------------------------------------------------------

    #[test]
    fn test_accept_chunk_roundtrip() {
        let leader_dir = TempDir::new().unwrap();
        let follower_dir = TempDir::new().unwrap();

        let mut leader = Log::open(config(leader_dir.path())).unwrap();
        leader
            .write(&[simple("x"), simple("y")], ChunkType::User, 1000, None)
            .unwrap();

        // lift the raw chunk out of the leader's segment
        let segment = std::fs::read(
            leader_dir.path().join("00000000000000000000.segment"),
        )
        .unwrap();
        let chunk = &segment[osilog_core::LOG_HEADER_SIZE..];

        let mut follower = Log::open(config(follower_dir.path())).unwrap();
        follower.accept_chunk(chunk).unwrap();
        assert_eq!(follower.tail_info().next_chunk_id, 2);

        let replica = std::fs::read(
            follower_dir.path().join("00000000000000000000.segment"),
        )
        .unwrap();
        assert_eq!(replica, segment);
    }

    #[test]
    fn test_accept_chunk_out_of_order_is_fatal() {
        let dir = TempDir::new().unwrap();
        let donor_dir = TempDir::new().unwrap();

        let mut donor = Log::open(config(donor_dir.path())).unwrap();
        donor.write(&[simple("a")], ChunkType::User, 1, None).unwrap();
        donor.write(&[simple("b")], ChunkType::User, 2, None).unwrap();
        let segment =
            std::fs::read(donor_dir.path().join("00000000000000000000.segment")).unwrap();
        // second chunk starts after the first
        let second_pos = {
            let header = ChunkHeader::decode(&segment[osilog_core::LOG_HEADER_SIZE..]).unwrap();
            osilog_core::LOG_HEADER_SIZE as u64 + header.total_size()
        };

        let mut follower = Log::open(config(dir.path())).unwrap();
        let err = follower
            .accept_chunk(&segment[second_pos as usize..])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AcceptChunkOutOfOrder { seen: 1, expected: 0 }
        ));
    }

    #[test]
    fn test_accept_chunk_bad_crc_is_fatal() {
        let donor_dir = TempDir::new().unwrap();
        let mut donor = Log::open(config(donor_dir.path())).unwrap();
        donor
            .write(&[simple("payload")], ChunkType::User, 1, None)
            .unwrap();
        let segment =
            std::fs::read(donor_dir.path().join("00000000000000000000.segment")).unwrap();
        let mut chunk = segment[osilog_core::LOG_HEADER_SIZE..].to_vec();
        let flip = chunk.len() - 2; // inside the data region
        chunk[flip] ^= 0xFF;

        let dir = TempDir::new().unwrap();
        let mut follower = Log::open(config(dir.path())).unwrap();
        assert!(matches!(
            follower.accept_chunk(&chunk),
            Err(Error::CrcValidationFailure { chunk_id: 0 })
        ));
    }

    // ---------------------------------------------------------------
    // Rollover
    // ---------------------------------------------------------------

    #[test]
    fn test_rollover_names_pair_by_next_chunk_id() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_segment_size_chunks = 2;
        let mut log = Log::open(cfg).unwrap();

        for ts in 0..5i64 {
            log.write(&[simple("r")], ChunkType::User, ts, None).unwrap();
        }

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.unwrap().file_name().into_string().ok())
            .filter(|n| n.ends_with(".segment"))
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "00000000000000000000.segment",
                "00000000000000000002.segment",
                "00000000000000000004.segment"
            ]
        );
    }

    #[test]
    fn test_tracking_snapshot_leads_new_segment() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_segment_size_chunks = 2;
        let mut log = Log::open(cfg).unwrap();

        // trailer seeds tracking state
        let mut trailer = BytesMut::new();
        osilog_core::TrackingEntry {
            tracking_type: osilog_core::TrackingType::Sequence,
            id: Bytes::from_static(b"p1"),
            value: 7,
        }
        .encode(&mut trailer)
        .unwrap();
        log.write(
            &[simple("a")],
            ChunkType::User,
            1,
            Some(trailer.freeze()),
        )
        .unwrap();
        log.write(&[simple("b")], ChunkType::User, 2, None).unwrap();
        // the pair is full; this write rolls and the snapshot goes first
        log.write(&[simple("c")], ChunkType::User, 3, None).unwrap();

        let pair = crate::directory::SegmentPairInfo::new(dir.path(), 2);
        let first = pair.first_record().unwrap().unwrap();
        assert_eq!(first.chunk_type, ChunkType::TrackingSnapshot);
        assert_eq!(first.chunk_id, 2);

        // reopening rebuilds the same tracking state from that snapshot
        drop(log);
        let reopened = Log::open(config(dir.path())).unwrap();
        assert_eq!(reopened.tracking().sequence(b"p1"), Some(7));
    }
}
