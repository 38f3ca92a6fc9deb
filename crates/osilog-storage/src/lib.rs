//! osilog Storage Engine
//!
//! An append-only, segmented, chunk-oriented log: the storage substrate
//! for a replicated streaming message system. Producers append batches of
//! records ("chunks") at the head, replicas mirror the raw chunk bytes,
//! and many concurrent readers stream bytes to sockets from any position.
//!
//! The log is the single source of truth for ordering (monotonic chunk
//! ids), for epoch-based replica reconciliation, for consumer offsets and
//! producer deduplication state (embedded as tracking chunks), and for
//! retention.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────┐ entries            ┌────────────┐ chunk bytes
//! │ Producers ├────────┐          ┌┤  Leader    ├──────────────┐
//! └───────────┘        ▼          │└────────────┘              ▼
//!                ┌───────────┐    │ accept_chunk        ┌────────────┐
//!                │ Log       │◄───┘                     │ Follower   │
//!                │ (writer)  │                          │ Log        │
//!                └─────┬─────┘                          └────────────┘
//!                      │ segment + index files
//!                      ▼
//!        00000000000000000000.segment / .index
//!        00000000000000004096.segment / .index
//!                      │
//!          ┌───────────┴─────────────┐
//!          ▼                         ▼
//!   ┌────────────┐            ┌─────────────┐
//!   │ LogReader  │            │ LogReader   │
//!   │ (data)     │            │ (offset)    │
//!   │ replication│            │ consumers   │
//!   └────────────┘            └─────────────┘
//! ```
//!
//! ## Main Components
//!
//! - [`Log`](writer::Log) — the single writer per log: chunk assembly,
//!   CRC, index maintenance, segment rollover, replication accepts, epoch
//!   validation, tracking snapshots.
//! - [`LogReader`](reader::LogReader) — cursor-owning readers in data or
//!   offset mode, with Bloom-filter skipping, attach-spec resolution and
//!   the zero-copy send path.
//! - [`recovery`] — startup tail repair of the last segment pair.
//! - [`acceptor`] — truncating a follower to the largest prefix shared
//!   with a leader.
//! - [`retention`] — size- and age-based segment eviction.
//! - [`tracking`] — producer/consumer tracking state and its chunk-scan
//!   recovery.
//! - [`shared`] — the lock-free cells and counters that cross task
//!   boundaries.
//!
//! ## Concurrency Model
//!
//! Exactly one writer task per log; readers are independent tasks with
//! their own file handles. No locks protect the files. The writer appends
//! to the segment before the index and publishes `last_chunk_id` last, so
//! any chunk a reader is allowed to parse is already durable. Retention
//! may delete files readers still hold open; attach-time races surface as
//! `missing_file` and are retried against a fresh directory listing.

pub mod acceptor;
pub mod bloom;
pub mod config;
pub mod directory;
pub mod error;
pub mod reader;
pub mod recovery;
pub mod retention;
pub mod segment;
pub mod shared;
pub mod tracking;
pub mod transport;
pub mod writer;

pub use acceptor::truncate_to;
pub use bloom::{ChunkFilter, FilterMatch, FilterMatcher, FilterSpec};
pub use config::{
    ChunkSelector, CounterSpec, LogConfig, ReaderOptions, ReadersCounterFun, TransportKind,
};
pub use directory::SegmentPairInfo;
pub use error::{Error, Result};
pub use reader::{
    AttachSpec, ChunkData, LogReader, ParsedChunk, ReadOutcome, ReaderMode,
};
pub use retention::{RetentionCallback, RetentionReport, RetentionSpec};
pub use shared::{Counters, SharedCells, COUNTER_FIELDS};
pub use tracking::{TrackingConfig, TrackingState};
pub use transport::Transport;
pub use writer::{LastChunkInfo, Log, TailInfo, WriteEntry};

pub use osilog_core::{ChunkHeader, ChunkType, RecordEntry};
