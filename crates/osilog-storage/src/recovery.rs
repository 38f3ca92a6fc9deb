//! Startup Tail Repair
//!
//! A crash can leave the last segment pair with a partially written tail:
//! a fractional or zeroed index record, an index record pointing past the
//! segment's end, or chunk bytes in the segment that never got their index
//! record. Repair walks the last index file backwards, validates each
//! candidate record against the segment contents (header fields and data
//! CRC), and truncates both files to the last chunk that checks out.
//!
//! Records earlier than the repaired tail are immutable and never
//! revisited, so running repair twice leaves the directory bitwise
//! identical.
//!
//! If a pair ends up with no valid chunk at all it is deleted and repair
//! recurses onto the prior pair; after two such retreats the log is
//! declared corrupted.

use std::fs::OpenOptions;
use std::path::Path;

use osilog_core::chunk::{validate_log_header, ChunkHeader, CHUNK_HEADER_SIZE, LOG_HEADER_SIZE};
use osilog_core::index::{
    align_position, is_all_zero, validate_index_header, INDEX_HEADER_SIZE, INDEX_RECORD_SIZE,
};
use osilog_core::IndexRecord;

use crate::directory::{delete_pair, list_pairs, pairs_from_index_paths, SegmentPairInfo};
use crate::error::{Error, Result};
use crate::segment::{open_read, read_at_most, read_exact_at, SegmentAppender};

/// The last valid chunk of the log after repair.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TailChunk {
    pub header: ChunkHeader,
    /// Position of the chunk header inside its segment file
    pub position: u64,
    /// Position just past the chunk (filter + data + trailer included)
    pub end: u64,
}

/// Result of tail repair: the surviving pairs (sorted) and the tail chunk,
/// if the log holds any chunk at all.
#[derive(Debug)]
pub(crate) struct RecoveredTail {
    pub pairs: Vec<SegmentPairInfo>,
    pub tail: Option<TailChunk>,
}

/// Repair the tail of the log in `dir` per the startup protocol. Creates
/// the first pair (named by `initial_offset`) when the directory is empty.
pub(crate) fn recover_tail(
    dir: &Path,
    initial_offset: u64,
    cached_index_files: Option<&[std::path::PathBuf]>,
) -> Result<RecoveredTail> {
    let mut pairs = match cached_index_files {
        Some(paths) => pairs_from_index_paths(dir, paths),
        None => list_pairs(dir)?,
    };

    if pairs.is_empty() {
        // bootstrap an empty log
        SegmentAppender::create(dir, initial_offset)?;
        tracing::info!(dir = %dir.display(), first_chunk_id = initial_offset, "initialized empty log");
        return Ok(RecoveredTail {
            pairs: vec![SegmentPairInfo::new(dir, initial_offset)],
            tail: None,
        });
    }

    let mut retreats = 0u32;
    loop {
        let last = pairs.last().expect("at least one pair");
        if let Some(tail) = repair_pair(last)? {
            return Ok(RecoveredTail {
                pairs,
                tail: Some(tail),
            });
        }

        if pairs.len() == 1 {
            // a single empty pair is a fresh log; make sure the headers
            // are in place and keep it
            let only = &pairs[0];
            SegmentAppender::open(dir, only.first_chunk_id)?;
            return Ok(RecoveredTail { pairs, tail: None });
        }

        if retreats == 2 {
            return Err(Error::CorruptedSegment {
                path: last.segment_path.clone(),
            });
        }
        retreats += 1;
        tracing::warn!(
            segment = %last.segment_path.display(),
            "no valid chunk in tail pair, retreating"
        );
        let doomed = pairs.pop().expect("non-empty");
        delete_pair(&doomed)?;
    }
}

/// Repair one pair in place. Returns its last valid chunk, or `None` when
/// the pair holds no valid chunk (its files are then truncated to bare
/// headers).
fn repair_pair(pair: &SegmentPairInfo) -> Result<Option<TailChunk>> {
    let index = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&pair.index_path)
        .map_err(|e| Error::from_io(&pair.index_path, e))?;

    let index_len = index.metadata()?.len();
    if index_len >= INDEX_HEADER_SIZE as u64 {
        let header = read_exact_at(&index, 0, INDEX_HEADER_SIZE)?;
        validate_index_header(&header).map_err(|_| Error::CorruptedSegment {
            path: pair.index_path.clone(),
        })?;
    }

    // drop fractional trailing bytes
    let mut valid_end = align_position(index_len);
    if valid_end < index_len {
        tracing::warn!(
            index = %pair.index_path.display(),
            dropped = index_len - valid_end,
            "dropping fractional index tail"
        );
        index.set_len(valid_end)?;
    }

    let segment = open_read(&pair.segment_path)?;
    let segment_len = segment.metadata()?.len();
    if segment_len >= LOG_HEADER_SIZE as u64 {
        let header = read_exact_at(&segment, 0, LOG_HEADER_SIZE)?;
        validate_log_header(&header).map_err(|_| Error::CorruptedSegment {
            path: pair.segment_path.clone(),
        })?;
    }

    // walk records from the end until one survives validation
    let mut tail = None;
    while valid_end >= (INDEX_HEADER_SIZE + INDEX_RECORD_SIZE) as u64 {
        let record_pos = valid_end - INDEX_RECORD_SIZE as u64;
        let raw = read_exact_at(&index, record_pos, INDEX_RECORD_SIZE)?;

        if is_all_zero(&raw) {
            valid_end = record_pos;
            continue;
        }
        match IndexRecord::decode(&raw) {
            Ok(record) => match validate_chunk(&segment, segment_len, &record)? {
                Some(found) => {
                    tail = Some(found);
                    break;
                }
                None => {
                    tracing::warn!(
                        index = %pair.index_path.display(),
                        chunk_id = record.chunk_id,
                        "dropping index record with no valid chunk"
                    );
                    valid_end = record_pos;
                }
            },
            Err(_) => {
                valid_end = record_pos;
            }
        }
    }

    if index.metadata()?.len() > valid_end {
        index.set_len(valid_end)?;
    }

    // truncate the segment to the end of the last valid chunk; with no
    // valid chunk left, any remaining bytes are an unacknowledged torso
    let keep = tail.map(|t| t.end).unwrap_or(LOG_HEADER_SIZE as u64);
    if segment_len > keep {
        tracing::warn!(
            segment = %pair.segment_path.display(),
            dropped = segment_len - keep,
            "truncating segment past last valid chunk"
        );
        let writable = OpenOptions::new()
            .write(true)
            .open(&pair.segment_path)
            .map_err(|e| Error::from_io(&pair.segment_path, e))?;
        writable.set_len(keep)?;
    }

    Ok(tail)
}

/// Check that an index record points at a chunk whose header fields match
/// and whose data region passes its CRC.
fn validate_chunk(
    segment: &std::fs::File,
    segment_len: u64,
    record: &IndexRecord,
) -> Result<Option<TailChunk>> {
    let position = record.position as u64;
    if position < LOG_HEADER_SIZE as u64 || position + CHUNK_HEADER_SIZE as u64 > segment_len {
        return Ok(None);
    }

    let raw = read_at_most(segment, position, CHUNK_HEADER_SIZE)?;
    let header = match ChunkHeader::decode(&raw) {
        Ok(h) => h,
        Err(_) => return Ok(None),
    };
    if header.chunk_id != record.chunk_id
        || header.epoch != record.epoch
        || header.timestamp != record.timestamp
        || header.chunk_type != record.chunk_type
    {
        return Ok(None);
    }

    let end = position + header.total_size();
    if end > segment_len {
        return Ok(None);
    }

    let data_pos = position + CHUNK_HEADER_SIZE as u64 + header.filter_size as u64;
    let data = read_exact_at(segment, data_pos, header.data_size as usize)?;
    if crc32fast::hash(&data) != header.crc {
        return Ok(None);
    }

    Ok(Some(TailChunk {
        header,
        position,
        end,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bootstrap_empty_directory() {
        let dir = TempDir::new().unwrap();
        let recovered = recover_tail(dir.path(), 0, None).unwrap();
        assert_eq!(recovered.pairs.len(), 1);
        assert!(recovered.tail.is_none());

        let segment = std::fs::read(&recovered.pairs[0].segment_path).unwrap();
        assert_eq!(segment.len(), LOG_HEADER_SIZE);
    }

    #[test]
    fn test_bootstrap_honors_initial_offset() {
        let dir = TempDir::new().unwrap();
        let recovered = recover_tail(dir.path(), 5000, None).unwrap();
        assert_eq!(recovered.pairs[0].first_chunk_id, 5000);
        assert!(recovered.pairs[0]
            .segment_path
            .ends_with("00000000000000005000.segment"));
    }

    #[test]
    fn test_recovery_is_idempotent_on_empty_log() {
        let dir = TempDir::new().unwrap();
        recover_tail(dir.path(), 0, None).unwrap();
        let before = std::fs::read(dir.path().join("00000000000000000000.index")).unwrap();
        recover_tail(dir.path(), 0, None).unwrap();
        let after = std::fs::read(dir.path().join("00000000000000000000.index")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_foreign_index_magic_is_corruption() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("00000000000000000000.index"),
            b"XXXX\x00\x00\x00\x01",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("00000000000000000000.segment"),
            b"OSIL\x00\x00\x00\x01",
        )
        .unwrap();
        let err = recover_tail(dir.path(), 0, None).unwrap_err();
        assert!(matches!(err, Error::CorruptedSegment { .. }));
    }
}
