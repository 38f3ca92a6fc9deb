//! Storage Error Types
//!
//! This module defines the error taxonomy of the storage engine.
//!
//! ## Error Categories
//!
//! ### Range Errors (recoverable, returned to the caller)
//! - `OffsetOutOfRange`: an absolute attach offset is outside the log
//! - `NoIndexFile`: the log directory holds no index files at all
//! - `RetriesExhausted`: repeated missing-file races exhausted the retry
//!   budget
//!
//! ### Transient Races (caught and retried internally)
//! - `MissingFile`: a file operation hit a path retention deleted mid-scan
//!
//! ### Protocol Violations (fatal)
//! - `InvalidEpoch`: the on-disk epoch exceeds the configured one at init
//! - `AcceptChunkOutOfOrder`: a replicated chunk's id is not the expected
//!   next chunk id
//! - `UnexpectedChunkId`: a reader found a durable chunk whose id is not
//!   the one its cursor expects
//! - `CrcValidationFailure`: a durable chunk fails its CRC (disk
//!   corruption)
//! - `InvalidLastOffsetEpoch`: a replica's (epoch, chunk id) vector doesn't
//!   match the local chunk at the requested position
//! - `CorruptedSegment`: tail repair retreated twice without finding a
//!   valid chunk
//!
//! End-of-stream is not an error: reader APIs surface it through
//! [`crate::reader::ReadOutcome`].

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] osilog_core::Error),

    #[error("Missing file: {path}")]
    MissingFile { path: PathBuf },

    #[error("No index file found in log directory")]
    NoIndexFile,

    #[error("Offset {requested} out of range [{first}, {last}]")]
    OffsetOutOfRange {
        requested: u64,
        first: u64,
        last: u64,
    },

    #[error("Retries exhausted resolving attach position")]
    RetriesExhausted,

    #[error("Invalid epoch: last found {last_found}, configured {configured}")]
    InvalidEpoch { last_found: u64, configured: u64 },

    #[error("Accepted chunk out of order: seen {seen}, expected {expected}")]
    AcceptChunkOutOfOrder { seen: u64, expected: u64 },

    #[error("Unexpected chunk id: seen {seen}, expected {expected}")]
    UnexpectedChunkId { seen: u64, expected: u64 },

    #[error("CRC validation failure for chunk {chunk_id}")]
    CrcValidationFailure { chunk_id: u64 },

    #[error(
        "Last offset epoch mismatch: expected chunk {expected_chunk_id} in epoch \
         {expected_epoch}, found {actual_epoch:?}"
    )]
    InvalidLastOffsetEpoch {
        expected_epoch: u64,
        expected_chunk_id: u64,
        /// `None` when the requested chunk id cannot be located at all;
        /// callers treat this the same as a mismatch (full re-sync).
        actual_epoch: Option<u64>,
    },

    #[error("Corrupted segment: {path}")]
    CorruptedSegment { path: PathBuf },

    #[error("Refusing to write an empty chunk")]
    EmptyWrite,

    #[error("Chunk exceeds frame limits: {entries} entries, {records} records")]
    ChunkTooLarge { entries: usize, records: u64 },
}

impl Error {
    /// Map an I/O error against `path`, turning not-found into the
    /// retryable [`Error::MissingFile`].
    pub(crate) fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::MissingFile {
                path: path.to_path_buf(),
            }
        } else {
            Error::Io(err)
        }
    }

    /// True for the transient race the attach retry wrapper absorbs.
    pub fn is_missing_file(&self) -> bool {
        matches!(self, Error::MissingFile { .. })
    }
}
