//! osilog Core Types and Wire Codecs
//!
//! This crate defines the on-disk binary format of an osilog log and the
//! types shared between the storage engine and its collaborators. It has no
//! I/O of its own: every function here transforms bytes.
//!
//! ## The Format at a Glance
//!
//! A log is a directory of segment pairs. Each pair is two files named by
//! the chunk id of their first chunk, zero-padded to 20 digits:
//!
//! ```text
//! 00000000000000000000.segment   "OSIL" + version, then contiguous chunks
//! 00000000000000000000.index     "OSIX" + version, then 29-byte records
//! ```
//!
//! - [`chunk`] — the 56-byte chunk header, Bloom filter region, entry
//!   framing (simple entries and opaque sub-batches), and the segment file
//!   header.
//! - [`index`] — the 29-byte index record and the racy-EOF alignment rule.
//! - [`tracking`] — the tracking entry codec used in chunk trailers and
//!   tracking chunks.
//!
//! All multi-byte integers are big-endian. Timestamps are signed 64-bit
//! milliseconds.

pub mod chunk;
pub mod error;
pub mod index;
pub mod tracking;

pub use chunk::{
    encode_log_header, encode_simple_entry, encode_sub_batch_entry, parse_entries,
    validate_log_header, ChunkHeader, ChunkType, RecordEntry, CHUNK_HEADER_SIZE,
    DEFAULT_FILTER_SIZE, LOG_HEADER_SIZE, LOG_MAGIC, LOG_VERSION,
};
pub use error::{Error, Result};
pub use index::{
    align_position, encode_index_header, validate_index_header, IndexRecord, INDEX_HEADER_SIZE,
    INDEX_MAGIC, INDEX_RECORD_SIZE,
};
pub use tracking::{parse_tracking_entries, TrackingEntry, TrackingType};
