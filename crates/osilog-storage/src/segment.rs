//! Segment Pair File Operations
//!
//! A log is a directory of segment pairs. This module owns the file-level
//! operations on one pair: naming, header bootstrap, positional reads, and
//! the append path that keeps the index in lockstep with the segment.
//!
//! ## Naming
//!
//! Both files of a pair share a prefix: the chunk id of the first chunk in
//! the segment, zero-padded to 20 decimal digits. Lexicographic filename
//! order therefore equals chunk-id order.
//!
//! ```text
//! 00000000000000001042.segment
//! 00000000000000001042.index
//! ```
//!
//! ## Write Ordering
//!
//! A chunk is appended to the segment file first, its 29-byte index record
//! second. A reader that observes an index record is therefore guaranteed
//! to find the chunk bytes on disk.
//!
//! ## Concurrent Growth
//!
//! Readers open the same files the writer is extending. Any position
//! derived from a file length is aligned down to a record boundary before
//! use (see [`osilog_core::index::align_position`]).

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use osilog_core::chunk::{encode_log_header, ChunkHeader, ChunkType, CHUNK_HEADER_SIZE};
use osilog_core::index::{
    align_position, encode_index_header, IndexRecord, INDEX_HEADER_SIZE, INDEX_RECORD_SIZE,
};

use crate::error::{Error, Result};

/// Segment file name for the pair whose first chunk is `chunk_id`.
pub(crate) fn segment_file_name(chunk_id: u64) -> String {
    format!("{:020}.segment", chunk_id)
}

/// Index file name for the pair whose first chunk is `chunk_id`.
pub(crate) fn index_file_name(chunk_id: u64) -> String {
    format!("{:020}.index", chunk_id)
}

/// Extract the first chunk id encoded in a segment or index file name.
pub(crate) fn parse_first_chunk_id(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 20 {
        return None;
    }
    stem.parse::<u64>().ok()
}

/// Open a file read-only, mapping not-found to the retryable
/// [`Error::MissingFile`].
pub(crate) fn open_read(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::from_io(path, e))
}

/// pread exactly `len` bytes at `pos`, or fail.
pub(crate) fn read_exact_at(file: &File, pos: u64, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    file.read_exact_at(&mut buf, pos)?;
    Ok(buf)
}

/// pread up to `len` bytes at `pos`, tolerating a short read at EOF.
pub(crate) fn read_at_most(file: &File, pos: u64, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut read = 0usize;
    while read < len {
        match file.read_at(&mut buf[read..], pos + read as u64) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(read);
    Ok(buf)
}

/// pread and decode the 56-byte chunk header at `pos`.
pub(crate) fn read_chunk_header_at(file: &File, pos: u64) -> Result<ChunkHeader> {
    let buf = read_exact_at(file, pos, CHUNK_HEADER_SIZE)?;
    Ok(ChunkHeader::decode(&buf)?)
}

/// Number of whole index records currently in the file.
pub(crate) fn index_record_count(index: &File) -> Result<u64> {
    let len = index.metadata()?.len();
    let aligned = align_position(len);
    Ok((aligned - INDEX_HEADER_SIZE as u64) / INDEX_RECORD_SIZE as u64)
}

/// pread the `nth` index record (0-based).
pub(crate) fn index_record_at(index: &File, nth: u64) -> Result<IndexRecord> {
    let pos = INDEX_HEADER_SIZE as u64 + nth * INDEX_RECORD_SIZE as u64;
    let buf = read_exact_at(index, pos, INDEX_RECORD_SIZE)?;
    Ok(IndexRecord::decode(&buf)?)
}

/// First index record of the file, if any.
pub(crate) fn first_index_record(index: &File) -> Result<Option<IndexRecord>> {
    if index_record_count(index)? == 0 {
        return Ok(None);
    }
    index_record_at(index, 0).map(Some)
}

/// Last whole index record of the file, if any. The EOF position is
/// aligned down first because the writer may be extending the file.
pub(crate) fn last_index_record(index: &File) -> Result<Option<IndexRecord>> {
    let count = index_record_count(index)?;
    if count == 0 {
        return Ok(None);
    }
    index_record_at(index, count - 1).map(Some)
}

/// Truncate `path` to `len` bytes.
pub(crate) fn truncate_file(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| Error::from_io(path, e))?;
    file.set_len(len)?;
    Ok(())
}

/// The open (segment, index) pair the writer appends to.
#[derive(Debug)]
pub(crate) struct SegmentAppender {
    segment_path: PathBuf,
    index_path: PathBuf,
    segment: File,
    index: File,
    segment_size: u64,
    chunk_count: u32,
}

impl SegmentAppender {
    /// Create a fresh pair named by `first_chunk_id` and write both 8-byte
    /// file headers.
    pub fn create(dir: &Path, first_chunk_id: u64) -> Result<Self> {
        let segment_path = dir.join(segment_file_name(first_chunk_id));
        let index_path = dir.join(index_file_name(first_chunk_id));

        let segment = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&segment_path)
            .map_err(|e| Error::from_io(&segment_path, e))?;
        let index = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .map_err(|e| Error::from_io(&index_path, e))?;

        let mut appender = SegmentAppender {
            segment_path,
            index_path,
            segment,
            index,
            segment_size: 0,
            chunk_count: 0,
        };
        appender.ensure_headers()?;
        Ok(appender)
    }

    /// Open an existing pair for append, recovering byte and chunk counts
    /// from the files.
    pub fn open(dir: &Path, first_chunk_id: u64) -> Result<Self> {
        let segment_path = dir.join(segment_file_name(first_chunk_id));
        let index_path = dir.join(index_file_name(first_chunk_id));

        let segment = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&segment_path)
            .map_err(|e| Error::from_io(&segment_path, e))?;
        let index = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .map_err(|e| Error::from_io(&index_path, e))?;

        let segment_size = segment.metadata()?.len();
        let index_len = index.metadata()?.len();
        let chunk_count = if index_len > INDEX_HEADER_SIZE as u64 {
            ((align_position(index_len) - INDEX_HEADER_SIZE as u64) / INDEX_RECORD_SIZE as u64)
                as u32
        } else {
            0
        };

        let mut appender = SegmentAppender {
            segment_path,
            index_path,
            segment,
            index,
            segment_size,
            chunk_count,
        };
        appender.ensure_headers()?;
        Ok(appender)
    }

    /// Write the 8-byte headers into any file that is still empty.
    fn ensure_headers(&mut self) -> Result<()> {
        use std::io::Write;
        if self.segment_size == 0 {
            self.segment.write_all(&encode_log_header())?;
            self.segment_size = osilog_core::LOG_HEADER_SIZE as u64;
        }
        if self.index.metadata()?.len() == 0 {
            self.index.write_all(&encode_index_header())?;
        }
        Ok(())
    }

    /// Append a fully assembled chunk, then its index record. Returns the
    /// segment position the chunk landed at.
    pub fn append_chunk(
        &mut self,
        bytes: &[u8],
        chunk_id: u64,
        timestamp: i64,
        epoch: u64,
        chunk_type: ChunkType,
    ) -> Result<u32> {
        use std::io::Write;

        // index records carry a u32 segment position
        let position = u32::try_from(self.segment_size).map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "segment position exceeds index record width",
            ))
        })?;

        self.segment.write_all(bytes)?;
        let record = IndexRecord {
            chunk_id,
            timestamp,
            epoch,
            position,
            chunk_type,
        };
        self.index.write_all(&record.encode())?;

        self.segment_size += bytes.len() as u64;
        self.chunk_count += 1;
        Ok(position)
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    pub fn segment_path(&self) -> &Path {
        &self.segment_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}
