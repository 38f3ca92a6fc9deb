//! Error Types for osilog Codecs
//!
//! This module defines the error type shared by every wire-format codec in
//! the core crate.
//!
//! ## Error Categories
//!
//! ### Framing Errors
//! - `InvalidMagic`: a file or chunk header doesn't carry the expected magic
//! - `UnsupportedVersion`: the header was written by a newer format version
//! - `InvalidChunkHeader`: a chunk header field fails validation
//!
//! ### Truncation Errors
//! - `TruncatedChunk`: fewer bytes than the header promised
//! - `TruncatedEntry`: an entry frame runs past the end of the data region
//! - `TruncatedIndexRecord`: an index record is shorter than 29 bytes
//!
//! ### Tracking Errors
//! - `InvalidTrackingType`: unknown tracking entry type byte
//! - `TruncatedTrackingEntry`: a tracking entry runs past its buffer
//!
//! All codec functions return `Result<T>` which is aliased to
//! `Result<T, Error>` so `?` propagation works throughout.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid chunk header: {0}")]
    InvalidChunkHeader(&'static str),

    #[error("Invalid chunk type: {0}")]
    InvalidChunkType(u8),

    #[error("Truncated chunk")]
    TruncatedChunk,

    #[error("Truncated entry at offset {0}")]
    TruncatedEntry(usize),

    #[error("Truncated index record")]
    TruncatedIndexRecord,

    #[error("Invalid tracking entry type: {0}")]
    InvalidTrackingType(u8),

    #[error("Truncated tracking entry")]
    TruncatedTrackingEntry,
}

pub type Result<T> = std::result::Result<T, Error>;
