//! Reader Core
//!
//! Readers are independent tasks, each owning its own file handle and
//! cursor. Two variants share one header-streaming engine:
//!
//! - **Data readers** feed replication. They deliver every chunk (tracking
//!   included) and are bounded by the `last_chunk_id` cell.
//! - **Offset readers** feed consumers. They deliver only chunks matching
//!   their selector (user chunks by default) and are bounded by the
//!   `committed_chunk_id` cell.
//!
//! ## Streaming Algorithm
//!
//! On each request the reader:
//!
//! 1. Checks the bound cell; below it, `end_of_stream`.
//! 2. preads header + default-width filter (56 + 16 bytes) at its cursor.
//! 3. Asserts the header's chunk id equals the expected one.
//! 4. Fetches the filter remainder if the chunk carries a wider filter.
//! 5. Matches the filter: deliver, skip the chunk, or retry it with a
//!    resized matcher.
//! 6. On a short read, computes the next segment from
//!    `max(first_chunk_id, next_chunk_id)`, reopens, and continues; the
//!    same file again means `end_of_stream`.
//!
//! ## Delivery Variants
//!
//! - [`LogReader::read_chunk`] returns the raw regions, CRC validated.
//! - [`LogReader::read_chunk_parsed`] additionally splits the data region
//!   into records; sub-batches stay opaque.
//! - [`LogReader::send_chunk`] writes the header through the transport and
//!   hands the body to the zero-copy send path (tcp) or a buffered copy
//!   (ssl). Offset readers send only the data region of user chunks; data
//!   readers send filter, data, and trailer. A failed send leaves the
//!   cursor unchanged so a retry resumes at the same chunk.
//!
//! ## Attach Specs
//!
//! | spec | resolution |
//! |------|------------|
//! | `First` | first chunk of the first segment |
//! | `Last` | most recent user chunk, else `Next` |
//! | `Next` | just past the last chunk of the last segment |
//! | `Abs(k)` | error unless `first <= k <= last + 1` |
//! | `Offset(k)` | clamped to `[first, last + 1]` |
//! | `Timestamp(t)` | first chunk with timestamp `>= t` |
//!
//! Resolution races with retention: any `missing_file` is retried up to
//! three times against a freshly listed directory.

use std::fs::File;
use std::path::PathBuf;

use bytes::Bytes;

use osilog_core::chunk::{
    ChunkHeader, ChunkType, CHUNK_HEADER_SIZE, DEFAULT_FILTER_SIZE, LOG_HEADER_SIZE,
};
use osilog_core::{parse_entries, RecordEntry};

use crate::bloom::{FilterMatch, FilterMatcher};
use crate::config::{ChunkSelector, LogConfig, ReaderOptions, ReadersCounterFun, TransportKind};
use crate::directory::{find_pair_for, list_pairs, SegmentPairInfo};
use crate::error::{Error, Result};
use crate::segment::{read_at_most, read_chunk_header_at, read_exact_at};
use crate::shared::SharedCells;
use crate::transport::Transport;

const ATTACH_ATTEMPTS: u32 = 3;
const HEADER_PROBE: usize = CHUNK_HEADER_SIZE + DEFAULT_FILTER_SIZE as usize;

/// Where a reader should attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachSpec {
    /// Oldest stored chunk
    First,
    /// Most recent user chunk
    Last,
    /// Position just past the head; only new writes are delivered
    Next,
    /// Exact offset; out-of-range is an error
    Abs(u64),
    /// Offset clamped into the stored range
    Offset(u64),
    /// First chunk at or after this timestamp (milliseconds)
    Timestamp(i64),
}

/// Which bound cell gates the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderMode {
    Data,
    Offset,
}

/// `Ready(item)` or nothing more readable right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome<T> {
    Ready(T),
    EndOfStream,
}

impl<T> ReadOutcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            ReadOutcome::Ready(item) => Some(item),
            ReadOutcome::EndOfStream => None,
        }
    }
}

/// Raw chunk regions as stored on disk.
#[derive(Debug, Clone)]
pub struct ChunkData {
    pub header: ChunkHeader,
    pub filter: Bytes,
    pub data: Bytes,
    pub trailer: Bytes,
}

/// A chunk with its data region split into records.
#[derive(Debug, Clone)]
pub struct ParsedChunk {
    pub header: ChunkHeader,
    /// `(record offset, entry)`; sub-batches are not decompressed
    pub records: Vec<(u64, RecordEntry)>,
    pub trailer: Bytes,
}

struct Cursor {
    segment_first_chunk_id: u64,
    position: u64,
    next_chunk_id: u64,
}

/// A reader over one log.
pub struct LogReader {
    mode: ReaderMode,
    dir: PathBuf,
    name: String,
    shared: SharedCells,
    selector: ChunkSelector,
    matcher: Option<FilterMatcher>,
    transport_kind: TransportKind,
    file: File,
    segment_first_chunk_id: u64,
    position: u64,
    next_chunk_id: u64,
    counter_fun: Option<ReadersCounterFun>,
    released: bool,
}

impl LogReader {
    /// Attach an offset reader (consumer side).
    pub fn attach_offset(
        config: &LogConfig,
        spec: AttachSpec,
        options: ReaderOptions,
    ) -> Result<Self> {
        Self::attach(config, ReaderMode::Offset, spec, options)
    }

    /// Attach a data reader (replication side). Data readers always see
    /// every chunk type.
    pub fn attach_data(
        config: &LogConfig,
        spec: AttachSpec,
        mut options: ReaderOptions,
    ) -> Result<Self> {
        options.chunk_selector = ChunkSelector::All;
        Self::attach(config, ReaderMode::Data, spec, options)
    }

    /// Attach a data reader immediately after the chunk a replica reports
    /// as its tail, validating that the chunk exists locally in the
    /// reported epoch. `None` means the replica is empty and attaches at
    /// the first chunk.
    pub fn attach_data_after(
        config: &LogConfig,
        last_epoch_offset: Option<(u64, u64)>,
        options: ReaderOptions,
    ) -> Result<Self> {
        let Some((epoch, chunk_id)) = last_epoch_offset else {
            return Self::attach_data(config, AttachSpec::First, options);
        };

        let mut reader = Self::attach_data(config, AttachSpec::Offset(chunk_id), options)?;
        let probe = read_at_most(&reader.file, reader.position, CHUNK_HEADER_SIZE)?;
        if probe.len() < CHUNK_HEADER_SIZE {
            return Err(Error::InvalidLastOffsetEpoch {
                expected_epoch: epoch,
                expected_chunk_id: chunk_id,
                actual_epoch: None,
            });
        }
        let header = ChunkHeader::decode(&probe)?;
        if header.chunk_id != chunk_id {
            return Err(Error::InvalidLastOffsetEpoch {
                expected_epoch: epoch,
                expected_chunk_id: chunk_id,
                actual_epoch: None,
            });
        }
        if header.epoch != epoch {
            return Err(Error::InvalidLastOffsetEpoch {
                expected_epoch: epoch,
                expected_chunk_id: chunk_id,
                actual_epoch: Some(header.epoch),
            });
        }

        reader.position += header.total_size();
        reader.next_chunk_id = header.next_chunk_id();
        Ok(reader)
    }

    fn attach(
        config: &LogConfig,
        mode: ReaderMode,
        spec: AttachSpec,
        options: ReaderOptions,
    ) -> Result<Self> {
        let shared = config.shared.clone().unwrap_or_default();

        for attempt in 0..ATTACH_ATTEMPTS {
            match Self::try_attach(config, mode, spec, &options, &shared) {
                Ok(reader) => {
                    if let Some(fun) = &reader.counter_fun {
                        fun(1);
                    }
                    tracing::debug!(
                        log = %reader.name,
                        ?mode,
                        ?spec,
                        next_chunk_id = reader.next_chunk_id,
                        "reader attached"
                    );
                    return Ok(reader);
                }
                Err(error) if error.is_missing_file() => {
                    // retention deleted a file under us; relist and retry
                    tracing::debug!(log = %config.name, attempt, %error, "attach raced retention");
                }
                Err(error) => return Err(error),
            }
        }
        Err(Error::RetriesExhausted)
    }

    fn try_attach(
        config: &LogConfig,
        mode: ReaderMode,
        spec: AttachSpec,
        options: &ReaderOptions,
        shared: &SharedCells,
    ) -> Result<Self> {
        let pairs = list_pairs(&config.dir)?;
        if pairs.is_empty() {
            return Err(Error::NoIndexFile);
        }

        let cursor = resolve(&pairs, spec, shared)?;
        let pair = SegmentPairInfo::new(&config.dir, cursor.segment_first_chunk_id);
        let file = pair.open_segment()?;

        Ok(LogReader {
            mode,
            dir: config.dir.clone(),
            name: config.name.clone(),
            shared: shared.clone(),
            selector: options.chunk_selector,
            matcher: options
                .filter_spec
                .as_ref()
                .map(|spec| FilterMatcher::new(spec, config.filter_size)),
            transport_kind: options.transport,
            file,
            segment_first_chunk_id: cursor.segment_first_chunk_id,
            position: cursor.position,
            next_chunk_id: cursor.next_chunk_id,
            counter_fun: config.readers_counter_fun.clone(),
            released: false,
        })
    }

    /// Chunk id the next delivery starts at.
    pub fn next_chunk_id(&self) -> u64 {
        self.next_chunk_id
    }

    pub fn mode(&self) -> ReaderMode {
        self.mode
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport_kind
    }

    /// Release the reader's handles and fire the readers counter.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            if let Some(fun) = &self.counter_fun {
                fun(-1);
            }
            tracing::debug!(log = %self.name, "reader closed");
        }
    }

    fn can_read_next(&self) -> bool {
        let bound = match self.mode {
            ReaderMode::Data => self.shared.get_last_chunk_id(),
            ReaderMode::Offset => self.shared.get_committed_chunk_id(),
        };
        bound >= 0 && self.next_chunk_id <= bound as u64
    }

    fn selects(&self, chunk_type: ChunkType) -> bool {
        match self.selector {
            ChunkSelector::All => true,
            ChunkSelector::UserData => chunk_type == ChunkType::User,
        }
    }

    fn skip_chunk(&mut self, header: &ChunkHeader) {
        self.position += header.total_size();
        self.next_chunk_id = header.next_chunk_id();
    }

    /// Core streaming step: the header of the next chunk to deliver,
    /// together with its filter bytes.
    fn next_header(&mut self) -> Result<ReadOutcome<(ChunkHeader, Bytes)>> {
        loop {
            if !self.can_read_next() {
                return Ok(ReadOutcome::EndOfStream);
            }

            let probe = read_at_most(&self.file, self.position, HEADER_PROBE)?;
            if probe.len() < CHUNK_HEADER_SIZE {
                if self.advance_segment()? {
                    continue;
                }
                return Ok(ReadOutcome::EndOfStream);
            }

            let header = ChunkHeader::decode(&probe)?;
            if header.chunk_id != self.next_chunk_id {
                return Err(Error::UnexpectedChunkId {
                    seen: header.chunk_id,
                    expected: self.next_chunk_id,
                });
            }

            if !self.selects(header.chunk_type) {
                self.skip_chunk(&header);
                continue;
            }

            let filter_size = header.filter_size as usize;
            let filter = if filter_size == 0 {
                Bytes::new()
            } else if probe.len() >= CHUNK_HEADER_SIZE + filter_size {
                Bytes::copy_from_slice(&probe[CHUNK_HEADER_SIZE..CHUNK_HEADER_SIZE + filter_size])
            } else {
                Bytes::from(read_exact_at(
                    &self.file,
                    self.position + CHUNK_HEADER_SIZE as u64,
                    filter_size,
                )?)
            };

            if let Some(matcher) = &self.matcher {
                match matcher.is_match(&filter) {
                    FilterMatch::Match => {}
                    FilterMatch::NoMatch => {
                        self.skip_chunk(&header);
                        continue;
                    }
                    FilterMatch::RetryWith(resized) => {
                        self.matcher = Some(resized);
                        continue;
                    }
                }
            }

            return Ok(ReadOutcome::Ready((header, filter)));
        }
    }

    /// Move to the segment holding `max(first_chunk_id, next_chunk_id)`.
    /// Returns false when that is the segment already open.
    fn advance_segment(&mut self) -> Result<bool> {
        let first = self.shared.get_first_chunk_id().max(0) as u64;
        let target = first.max(self.next_chunk_id);

        let pairs = list_pairs(&self.dir)?;
        let pair = match find_pair_for(&pairs, target).or_else(|| pairs.first()) {
            Some(pair) => pair,
            None => return Err(Error::NoIndexFile),
        };
        if pair.first_chunk_id == self.segment_first_chunk_id {
            return Ok(false);
        }

        tracing::debug!(
            log = %self.name,
            from = self.segment_first_chunk_id,
            to = pair.first_chunk_id,
            "reader crossing segment boundary"
        );
        self.file = pair.open_segment()?;
        self.segment_first_chunk_id = pair.first_chunk_id;
        self.position = LOG_HEADER_SIZE as u64;
        self.next_chunk_id = target;
        Ok(true)
    }

    /// Read the next chunk's raw regions, validating the data CRC.
    pub fn read_chunk(&mut self) -> Result<ReadOutcome<ChunkData>> {
        let (header, filter) = match self.next_header()? {
            ReadOutcome::Ready(found) => found,
            ReadOutcome::EndOfStream => return Ok(ReadOutcome::EndOfStream),
        };

        let data_pos = self.position + CHUNK_HEADER_SIZE as u64 + header.filter_size as u64;
        let rest = read_exact_at(
            &self.file,
            data_pos,
            header.data_size as usize + header.trailer_size as usize,
        )?;
        let rest = Bytes::from(rest);
        let data = rest.slice(..header.data_size as usize);
        let trailer = rest.slice(header.data_size as usize..);

        if crc32fast::hash(&data) != header.crc {
            return Err(Error::CrcValidationFailure {
                chunk_id: header.chunk_id,
            });
        }

        self.skip_chunk(&header);
        Ok(ReadOutcome::Ready(ChunkData {
            header,
            filter,
            data,
            trailer,
        }))
    }

    /// Read the next chunk and split its data region into records.
    pub fn read_chunk_parsed(&mut self) -> Result<ReadOutcome<ParsedChunk>> {
        let chunk = match self.read_chunk()? {
            ReadOutcome::Ready(chunk) => chunk,
            ReadOutcome::EndOfStream => return Ok(ReadOutcome::EndOfStream),
        };
        let records = parse_entries(&chunk.data, chunk.header.chunk_id)?;
        Ok(ReadOutcome::Ready(ParsedChunk {
            header: chunk.header,
            records,
            trailer: chunk.trailer,
        }))
    }

    /// Stream the next chunk to a socket: header bytes first, then the
    /// body straight from the file. Returns the bytes put on the wire.
    ///
    /// The cursor only advances after the full transfer, so an error
    /// leaves the reader positioned to retry the same chunk.
    pub async fn send_chunk(&mut self, transport: &mut Transport) -> Result<ReadOutcome<u64>> {
        let (header, _filter) = match self.next_header()? {
            ReadOutcome::Ready(found) => found,
            ReadOutcome::EndOfStream => return Ok(ReadOutcome::EndOfStream),
        };

        let raw_header = read_exact_at(&self.file, self.position, CHUNK_HEADER_SIZE)?;
        let (body_offset, body_len) = match self.mode {
            // replication gets the chunk verbatim
            ReaderMode::Data => (self.position + CHUNK_HEADER_SIZE as u64, header.body_size()),
            // consumers get the records; the trailer (and filter) are
            // writer-side concerns
            ReaderMode::Offset => (
                self.position + CHUNK_HEADER_SIZE as u64 + header.filter_size as u64,
                header.data_size as u64,
            ),
        };

        transport.send(&raw_header).await?;
        let sent = transport.sendfile(&self.file, body_offset, body_len).await?;

        self.skip_chunk(&header);
        Ok(ReadOutcome::Ready(CHUNK_HEADER_SIZE as u64 + sent))
    }
}

impl Drop for LogReader {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReader")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("segment", &self.segment_first_chunk_id)
            .field("position", &self.position)
            .field("next_chunk_id", &self.next_chunk_id)
            .finish()
    }
}

// ---------------------------------------------------------------------
// Attach resolution
// ---------------------------------------------------------------------

fn resolve(pairs: &[SegmentPairInfo], spec: AttachSpec, shared: &SharedCells) -> Result<Cursor> {
    match spec {
        AttachSpec::First => first_cursor(&pairs[0]),
        AttachSpec::Next => next_cursor(pairs.last().expect("non-empty")),
        AttachSpec::Last => last_cursor(pairs),
        AttachSpec::Abs(k) => {
            let last = shared.get_last_chunk_id();
            if last < 0 {
                // empty log accepts only its bootstrap offset
                let boundary = pairs[0].first_chunk_id;
                if k == boundary {
                    return next_cursor(pairs.last().expect("non-empty"));
                }
                return Err(Error::OffsetOutOfRange {
                    requested: k,
                    first: boundary,
                    last: boundary,
                });
            }
            let first = shared.get_first_chunk_id().max(0) as u64;
            let last = last as u64;
            if k < first || k > last + 1 {
                return Err(Error::OffsetOutOfRange {
                    requested: k,
                    first,
                    last,
                });
            }
            if k == last + 1 {
                return next_cursor(pairs.last().expect("non-empty"));
            }
            offset_cursor(pairs, k)
        }
        AttachSpec::Offset(k) => {
            let last = shared.get_last_chunk_id();
            if last < 0 {
                return next_cursor(pairs.last().expect("non-empty"));
            }
            let first = shared.get_first_chunk_id().max(0) as u64;
            let k = k.max(first);
            if k > last as u64 {
                // at or past the head: only new writes
                return next_cursor(pairs.last().expect("non-empty"));
            }
            offset_cursor(pairs, k)
        }
        AttachSpec::Timestamp(t) => timestamp_cursor(pairs, t),
    }
}

fn first_cursor(pair: &SegmentPairInfo) -> Result<Cursor> {
    Ok(match pair.first_record()? {
        Some(record) => Cursor {
            segment_first_chunk_id: pair.first_chunk_id,
            position: record.position as u64,
            next_chunk_id: record.chunk_id,
        },
        None => Cursor {
            segment_first_chunk_id: pair.first_chunk_id,
            position: LOG_HEADER_SIZE as u64,
            next_chunk_id: pair.first_chunk_id,
        },
    })
}

fn next_cursor(pair: &SegmentPairInfo) -> Result<Cursor> {
    match pair.last_record()? {
        Some(record) => {
            let segment = pair.open_segment()?;
            let header = read_chunk_header_at(&segment, record.position as u64)?;
            Ok(Cursor {
                segment_first_chunk_id: pair.first_chunk_id,
                position: record.position as u64 + header.total_size(),
                next_chunk_id: header.next_chunk_id(),
            })
        }
        None => Ok(Cursor {
            segment_first_chunk_id: pair.first_chunk_id,
            position: LOG_HEADER_SIZE as u64,
            next_chunk_id: pair.first_chunk_id,
        }),
    }
}

/// Backward scan for the most recent user chunk; `Next` if the log holds
/// none.
fn last_cursor(pairs: &[SegmentPairInfo]) -> Result<Cursor> {
    for pair in pairs.iter().rev() {
        let index = pair.open_index()?;
        let count = crate::segment::index_record_count(&index)?;
        for nth in (0..count).rev() {
            let record = crate::segment::index_record_at(&index, nth)?;
            if record.chunk_type == ChunkType::User {
                return Ok(Cursor {
                    segment_first_chunk_id: pair.first_chunk_id,
                    position: record.position as u64,
                    next_chunk_id: record.chunk_id,
                });
            }
        }
    }
    next_cursor(pairs.last().expect("non-empty"))
}

/// The chunk containing offset `k`: within the covering segment, the last
/// index record whose chunk id is `<= k`.
fn offset_cursor(pairs: &[SegmentPairInfo], k: u64) -> Result<Cursor> {
    let pair = find_pair_for(pairs, k).unwrap_or(&pairs[0]);
    let index = pair.open_index()?;
    let count = crate::segment::index_record_count(&index)?;

    let mut best = None;
    for nth in 0..count {
        let record = crate::segment::index_record_at(&index, nth)?;
        if record.chunk_id <= k {
            best = Some(record);
        } else {
            break;
        }
    }

    Ok(match best {
        Some(record) => Cursor {
            segment_first_chunk_id: pair.first_chunk_id,
            position: record.position as u64,
            next_chunk_id: record.chunk_id,
        },
        None => Cursor {
            segment_first_chunk_id: pair.first_chunk_id,
            position: LOG_HEADER_SIZE as u64,
            next_chunk_id: pair.first_chunk_id,
        },
    })
}

/// Newest-to-oldest scan per the timestamp table: past the newest tail
/// means `Next`; inside a segment's span means the first record at or
/// after `t`; between segments means the newer segment's first chunk;
/// before everything means the oldest chunk.
fn timestamp_cursor(pairs: &[SegmentPairInfo], t: i64) -> Result<Cursor> {
    let mut newer: Option<&SegmentPairInfo> = None;

    for pair in pairs.iter().rev() {
        let (first, last) = match (pair.first_record()?, pair.last_record()?) {
            (Some(first), Some(last)) => (first, last),
            _ => continue,
        };

        if t > last.timestamp {
            return match newer {
                // gap between this pair and the next newer one
                Some(newer) => first_cursor(newer),
                // past the newest chunk in the log
                None => next_cursor(pair),
            };
        }

        if t >= first.timestamp {
            let index = pair.open_index()?;
            let count = crate::segment::index_record_count(&index)?;
            for nth in 0..count {
                let record = crate::segment::index_record_at(&index, nth)?;
                if record.timestamp >= t {
                    return Ok(Cursor {
                        segment_first_chunk_id: pair.first_chunk_id,
                        position: record.position as u64,
                        next_chunk_id: record.chunk_id,
                    });
                }
            }
        }

        newer = Some(pair);
    }

    // older than everything stored: the oldest chunk
    first_cursor(&pairs[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::writer::{Log, WriteEntry};
    use tempfile::TempDir;

    fn write_log(dir: &std::path::Path, timestamps: &[i64]) -> LogConfig {
        let config = LogConfig {
            dir: dir.to_path_buf(),
            name: "reader-test".to_string(),
            epoch: 1,
            ..Default::default()
        };
        let mut log = Log::open(config.clone()).unwrap();
        for ts in timestamps {
            log.write(
                &[WriteEntry::Simple(Bytes::from(format!("t{}", ts)))],
                ChunkType::User,
                *ts,
                None,
            )
            .unwrap();
        }
        let mut config = config;
        config.shared = Some(log.shared().clone());
        log.shared()
            .set_committed_chunk_id(log.shared().get_last_chunk_id());
        config
    }

    #[test]
    fn test_attach_empty_directory_is_no_index_file() {
        let dir = TempDir::new().unwrap();
        let config = LogConfig {
            dir: dir.path().to_path_buf(),
            name: "none".to_string(),
            ..Default::default()
        };
        let err =
            LogReader::attach_offset(&config, AttachSpec::First, ReaderOptions::default())
                .unwrap_err();
        assert!(matches!(err, Error::NoIndexFile));
    }

    #[test]
    fn test_abs_out_of_range() {
        let dir = TempDir::new().unwrap();
        let config = write_log(dir.path(), &[1000, 2000]);
        let err = LogReader::attach_offset(&config, AttachSpec::Abs(9), ReaderOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::OffsetOutOfRange {
                requested: 9,
                first: 0,
                last: 1
            }
        ));
    }

    #[test]
    fn test_abs_next_boundary_is_accepted() {
        let dir = TempDir::new().unwrap();
        let config = write_log(dir.path(), &[1000, 2000]);
        let reader =
            LogReader::attach_offset(&config, AttachSpec::Abs(2), ReaderOptions::default())
                .unwrap();
        assert_eq!(reader.next_chunk_id(), 2);
    }

    #[test]
    fn test_offset_clamps_low_and_high() {
        let dir = TempDir::new().unwrap();
        let config = write_log(dir.path(), &[1000, 2000, 3000]);

        let low = LogReader::attach_offset(&config, AttachSpec::Offset(0), ReaderOptions::default())
            .unwrap();
        assert_eq!(low.next_chunk_id(), 0);

        let high =
            LogReader::attach_offset(&config, AttachSpec::Offset(99), ReaderOptions::default())
                .unwrap();
        assert_eq!(high.next_chunk_id(), 3);
    }

    #[test]
    fn test_readers_counter_fires_on_attach_and_close() {
        use std::sync::atomic::{AtomicI64, Ordering};
        use std::sync::Arc;

        let dir = TempDir::new().unwrap();
        let mut config = write_log(dir.path(), &[1000]);
        let live = Arc::new(AtomicI64::new(0));
        let cell = live.clone();
        config.readers_counter_fun = Some(Arc::new(move |delta| {
            cell.fetch_add(delta, Ordering::SeqCst);
        }));

        let reader =
            LogReader::attach_offset(&config, AttachSpec::First, ReaderOptions::default())
                .unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 1);
        reader.close();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_data_reader_waits_for_last_cell() {
        let dir = TempDir::new().unwrap();
        let config = write_log(dir.path(), &[1000]);
        let shared = config.shared.clone().unwrap();

        let mut reader =
            LogReader::attach_data(&config, AttachSpec::First, ReaderOptions::default()).unwrap();
        // pretend nothing is published yet
        shared.set_last_chunk_id(-1);
        assert!(reader.read_chunk().unwrap().ready().is_none());

        shared.set_last_chunk_id(0);
        let chunk = reader.read_chunk().unwrap().ready().unwrap();
        assert_eq!(chunk.header.chunk_id, 0);
    }
}
