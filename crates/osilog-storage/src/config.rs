//! Log Configuration
//!
//! This module defines the configuration accepted when opening a log for
//! writing ([`LogConfig`]) and when attaching a reader ([`ReaderOptions`]).
//!
//! ## Rollover Defaults
//!
//! - **max_segment_size_bytes**: 500 MB
//! - **max_segment_size_chunks**: 256 000
//!
//! A segment rolls when either threshold is met; the new pair is named by
//! the next chunk id.
//!
//! ## Usage
//!
//! ```ignore
//! use osilog_storage::{Log, LogConfig};
//!
//! let config = LogConfig {
//!     dir: "/var/lib/osilog/orders".into(),
//!     name: "orders".to_string(),
//!     epoch: 3,
//!     max_segment_size_bytes: 64 * 1024 * 1024, // small segments for tests
//!     ..Default::default()
//! };
//! let mut log = Log::open(config)?;
//! ```
//!
//! Runtime-only handles (shared cells, counter registration, callbacks,
//! cached directory listings) are carried on the same struct but skipped by
//! serde: they exist per-process, not in config files.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bloom::FilterSpec;
use crate::retention::RetentionSpec;
use crate::shared::SharedCells;
use crate::tracking::TrackingConfig;

/// Invoked with +1 / -1 as readers attach and close.
pub type ReadersCounterFun = Arc<dyn Fn(i64) + Send + Sync>;

/// Registration request for the global counters registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSpec {
    pub name: String,
    #[serde(default)]
    pub extra_fields: Vec<String>,
}

/// Configuration for opening a log.
#[derive(Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log root directory
    pub dir: PathBuf,

    /// Log name (used for counters and diagnostics)
    pub name: String,

    /// Writer's epoch; refuses to open if the on-disk tail is newer
    #[serde(default)]
    pub epoch: u64,

    /// Rollover threshold in bytes (default: 500 MB)
    #[serde(default = "default_max_segment_size_bytes")]
    pub max_segment_size_bytes: u64,

    /// Rollover threshold in chunks (default: 256 000)
    #[serde(default = "default_max_segment_size_chunks")]
    pub max_segment_size_chunks: u32,

    /// Ordered retention specs, evaluated oldest-segment-first
    #[serde(default)]
    pub retention: Vec<RetentionSpec>,

    /// Bloom filter width written per chunk (default: 16 bytes)
    #[serde(default = "default_filter_size")]
    pub filter_size: u8,

    /// Forwarded to the tracking module
    #[serde(default)]
    pub tracking_config: TrackingConfig,

    /// First chunk id when opening an acceptor against an empty log
    #[serde(default)]
    pub initial_offset: u64,

    /// Pre-existing shared cells handle; a fresh one is created if absent
    #[serde(skip)]
    pub shared: Option<SharedCells>,

    /// Counter registration; no counters are kept if absent
    #[serde(skip)]
    pub counter_spec: Option<CounterSpec>,

    /// Cached pre-listed index file paths, used instead of a directory scan
    #[serde(skip)]
    pub index_files: Option<Vec<PathBuf>>,

    /// Reader open/close callback
    #[serde(skip)]
    pub readers_counter_fun: Option<ReadersCounterFun>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            name: String::new(),
            epoch: 0,
            max_segment_size_bytes: default_max_segment_size_bytes(),
            max_segment_size_chunks: default_max_segment_size_chunks(),
            retention: Vec::new(),
            filter_size: default_filter_size(),
            tracking_config: TrackingConfig::default(),
            initial_offset: 0,
            shared: None,
            counter_spec: None,
            index_files: None,
            readers_counter_fun: None,
        }
    }
}

impl fmt::Debug for LogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogConfig")
            .field("dir", &self.dir)
            .field("name", &self.name)
            .field("epoch", &self.epoch)
            .field("max_segment_size_bytes", &self.max_segment_size_bytes)
            .field("max_segment_size_chunks", &self.max_segment_size_chunks)
            .field("retention", &self.retention)
            .field("filter_size", &self.filter_size)
            .field("tracking_config", &self.tracking_config)
            .field("initial_offset", &self.initial_offset)
            .field("readers_counter_fun", &self.readers_counter_fun.is_some())
            .finish()
    }
}

fn default_max_segment_size_bytes() -> u64 {
    500 * 1000 * 1000 // 500 MB
}

fn default_max_segment_size_chunks() -> u32 {
    256_000
}

fn default_filter_size() -> u8 {
    16
}

/// Which chunk types an offset reader delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSelector {
    /// Every chunk, tracking included
    All,
    /// User chunks only
    #[default]
    UserData,
}

/// Transport used by the reader's send path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain socket, zero-copy sendfile
    #[default]
    Tcp,
    /// TLS, buffered copy
    Ssl,
}

/// Per-reader options.
#[derive(Debug, Clone, Default)]
pub struct ReaderOptions {
    pub chunk_selector: ChunkSelector,
    pub filter_spec: Option<FilterSpec>,
    pub transport: TransportKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.max_segment_size_bytes, 500 * 1000 * 1000);
        assert_eq!(config.max_segment_size_chunks, 256_000);
        assert_eq!(config.filter_size, 16);
        assert!(config.retention.is_empty());
        assert!(config.shared.is_none());
    }

    #[test]
    fn test_reader_options_defaults() {
        let options = ReaderOptions::default();
        assert_eq!(options.chunk_selector, ChunkSelector::UserData);
        assert_eq!(options.transport, TransportKind::Tcp);
        assert!(options.filter_spec.is_none());
    }
}
