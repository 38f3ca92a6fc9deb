//! Shared Cells and Counters
//!
//! Mutable state crosses task boundaries only through the typed cells and
//! named counters defined here. There is exactly one writer task per log;
//! readers are independent tasks that gate on the cells before parsing a
//! chunk header (a reader may not read chunk `k` until `last_chunk_id >= k`,
//! or `committed_chunk_id >= k` for offset readers).
//!
//! All access is lock-free atomic load/store. Cells are signed 64-bit with
//! -1 meaning "empty log".

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// The chunk-id cells every log publishes.
#[derive(Debug, Clone, Default)]
pub struct SharedCells {
    inner: Arc<CellsInner>,
}

#[derive(Debug)]
struct CellsInner {
    first_chunk_id: AtomicI64,
    last_chunk_id: AtomicI64,
    committed_chunk_id: AtomicI64,
}

impl Default for CellsInner {
    fn default() -> Self {
        Self {
            first_chunk_id: AtomicI64::new(-1),
            last_chunk_id: AtomicI64::new(-1),
            committed_chunk_id: AtomicI64::new(-1),
        }
    }
}

impl SharedCells {
    /// Create a fresh handle with all cells at -1 (empty log).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_first_chunk_id(&self, value: i64) {
        self.inner.first_chunk_id.store(value, Ordering::Release);
    }

    pub fn get_first_chunk_id(&self) -> i64 {
        self.inner.first_chunk_id.load(Ordering::Acquire)
    }

    pub fn set_last_chunk_id(&self, value: i64) {
        self.inner.last_chunk_id.store(value, Ordering::Release);
    }

    pub fn get_last_chunk_id(&self) -> i64 {
        self.inner.last_chunk_id.load(Ordering::Acquire)
    }

    /// Updated by the replication layer once a quorum acknowledges.
    pub fn set_committed_chunk_id(&self, value: i64) {
        self.inner.committed_chunk_id.store(value, Ordering::Release);
    }

    pub fn get_committed_chunk_id(&self) -> i64 {
        self.inner.committed_chunk_id.load(Ordering::Acquire)
    }
}

/// Counter fields every log registers.
pub const COUNTER_FIELDS: [&str; 5] = [
    "offset",
    "first_offset",
    "first_timestamp",
    "chunks",
    "segments",
];

/// A named set of independently-addressed atomic counters.
///
/// Each cell carries one semantic field. Unknown fields are ignored on
/// writes and read as zero, so a stale dashboard never panics a writer.
#[derive(Debug)]
pub struct Counters {
    name: String,
    fields: HashMap<String, AtomicI64>,
}

impl Counters {
    /// Register a counter set under `name` with the standard fields plus
    /// `extra_fields`.
    pub fn register(name: &str, extra_fields: &[String]) -> Arc<Counters> {
        let mut fields: HashMap<String, AtomicI64> = COUNTER_FIELDS
            .iter()
            .map(|f| (f.to_string(), AtomicI64::new(0)))
            .collect();
        for field in extra_fields {
            fields.entry(field.clone()).or_insert_with(|| AtomicI64::new(0));
        }
        Arc::new(Counters {
            name: name.to_string(),
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn put(&self, field: &str, value: i64) {
        match self.fields.get(field) {
            Some(cell) => cell.store(value, Ordering::Release),
            None => tracing::warn!(counter = %self.name, field, "put on unknown counter field"),
        }
    }

    pub fn add(&self, field: &str, value: i64) {
        match self.fields.get(field) {
            Some(cell) => {
                cell.fetch_add(value, Ordering::AcqRel);
            }
            None => tracing::warn!(counter = %self.name, field, "add on unknown counter field"),
        }
    }

    pub fn get(&self, field: &str) -> i64 {
        self.fields
            .get(field)
            .map(|cell| cell.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cells_start_empty() {
        let cells = SharedCells::new();
        assert_eq!(cells.get_first_chunk_id(), -1);
        assert_eq!(cells.get_last_chunk_id(), -1);
        assert_eq!(cells.get_committed_chunk_id(), -1);
    }

    #[test]
    fn test_cells_shared_across_clones() {
        let cells = SharedCells::new();
        let other = cells.clone();
        cells.set_last_chunk_id(42);
        assert_eq!(other.get_last_chunk_id(), 42);
        other.set_committed_chunk_id(40);
        assert_eq!(cells.get_committed_chunk_id(), 40);
    }

    #[test]
    fn test_counters_standard_and_extra_fields() {
        let counters = Counters::register("log-1", &["readers".to_string()]);
        counters.put("offset", 10);
        counters.add("offset", 5);
        counters.add("readers", 1);
        assert_eq!(counters.get("offset"), 15);
        assert_eq!(counters.get("readers"), 1);
        assert_eq!(counters.get("segments"), 0);
    }

    #[test]
    fn test_counters_unknown_field_is_inert() {
        let counters = Counters::register("log-2", &[]);
        counters.put("no_such_field", 7);
        assert_eq!(counters.get("no_such_field"), 0);
    }
}
