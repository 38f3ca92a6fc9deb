//! Retention
//!
//! Whole segment pairs are deleted oldest-first according to an ordered
//! list of retention specs. The newest pair always survives, so the log
//! never loses its write position.
//!
//! ## Spec Kinds
//!
//! - **max_bytes**: delete oldest pairs until the cumulative segment size
//!   fits the budget
//! - **max_age**: delete pairs whose newest chunk is older than the cutoff
//!
//! Specs are evaluated in the order configured; each sees the survivors of
//! the previous one.
//!
//! ## Scheduling
//!
//! The writer schedules an evaluation after every rollover. Evaluation is
//! ordinary blocking filesystem work, so inside a tokio runtime it runs on
//! the blocking pool. Readers may race a deletion; their attach path
//! retries on `missing_file`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::directory::{delete_pair, list_pairs, SegmentPairInfo};
use crate::error::Result;
use crate::shared::{Counters, SharedCells};

/// One retention rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetentionSpec {
    /// Keep at most this many bytes of segment data
    MaxBytes { bytes: u64 },
    /// Keep only chunks younger than this
    MaxAge {
        #[serde(with = "duration_ms")]
        age: Duration,
    },
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// What an evaluation left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionReport {
    /// Surviving chunk id range, `None` when the log holds no chunks
    pub range: Option<(u64, u64)>,
    /// Timestamp of the oldest surviving chunk, -1 when none
    pub first_timestamp: i64,
    /// Surviving segment pair count
    pub segments_left: usize,
}

/// Invoked with the report after a successful evaluation.
pub type RetentionCallback = Arc<dyn Fn(&RetentionReport) + Send + Sync>;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Apply `specs` to the pairs in `dir`, deleting evicted pairs, and report
/// what survived.
pub fn evaluate(dir: &Path, specs: &[RetentionSpec]) -> Result<RetentionReport> {
    let mut pairs = list_pairs(dir)?;

    for spec in specs {
        match spec {
            RetentionSpec::MaxBytes { bytes } => {
                let mut sizes: Vec<u64> = Vec::with_capacity(pairs.len());
                for pair in &pairs {
                    sizes.push(
                        std::fs::metadata(&pair.segment_path)
                            .map(|m| m.len())
                            .unwrap_or(0),
                    );
                }
                let mut total: u64 = sizes.iter().sum();
                while pairs.len() > 1 && total > *bytes {
                    let doomed = pairs.remove(0);
                    total -= sizes.remove(0);
                    tracing::info!(
                        segment = %doomed.segment_path.display(),
                        "retention (max_bytes) deleting segment pair"
                    );
                    delete_pair(&doomed)?;
                }
            }
            RetentionSpec::MaxAge { age } => {
                let cutoff = now_ms() - age.as_millis() as i64;
                while pairs.len() > 1 {
                    let oldest = &pairs[0];
                    let newest_ts = match oldest.last_record()? {
                        Some(record) => record.timestamp,
                        None => break,
                    };
                    if newest_ts >= cutoff {
                        break;
                    }
                    let doomed = pairs.remove(0);
                    tracing::info!(
                        segment = %doomed.segment_path.display(),
                        newest_ts,
                        cutoff,
                        "retention (max_age) deleting segment pair"
                    );
                    delete_pair(&doomed)?;
                }
            }
        }
    }

    report(&pairs)
}

fn report(pairs: &[SegmentPairInfo]) -> Result<RetentionReport> {
    let first = pairs.iter().find_map(|p| p.first_record().ok().flatten());
    let last = pairs.iter().rev().find_map(|p| p.last_record().ok().flatten());
    let range = match (first, last) {
        (Some(f), Some(l)) => Some((f.chunk_id, l.chunk_id)),
        _ => None,
    };
    Ok(RetentionReport {
        range,
        first_timestamp: first.map(|f| f.timestamp).unwrap_or(-1),
        segments_left: pairs.len(),
    })
}

/// Run an evaluation and publish the result: the `first_chunk_id` cell and
/// the `first_offset` / `first_timestamp` / `segments` counters, then the
/// caller's callback.
pub fn eval(
    name: &str,
    dir: &Path,
    specs: &[RetentionSpec],
    shared: Option<SharedCells>,
    counters: Option<Arc<Counters>>,
    callback: Option<RetentionCallback>,
) -> Result<RetentionReport> {
    let report = evaluate(dir, specs)?;

    if let Some(shared) = &shared {
        if let Some((first, _)) = report.range {
            shared.set_first_chunk_id(first as i64);
        }
    }
    if let Some(counters) = &counters {
        if let Some((first, _)) = report.range {
            counters.put("first_offset", first as i64);
        }
        counters.put("first_timestamp", report.first_timestamp);
        counters.put("segments", report.segments_left as i64);
    }

    tracing::debug!(
        log = name,
        segments_left = report.segments_left,
        range = ?report.range,
        "retention evaluation complete"
    );
    if let Some(callback) = callback {
        callback(&report);
    }
    Ok(report)
}

/// Schedule an evaluation off the writer's thread. Inside a tokio runtime
/// the work goes to the blocking pool; otherwise it runs inline.
pub(crate) fn spawn_eval(
    name: String,
    dir: PathBuf,
    specs: Vec<RetentionSpec>,
    shared: Option<SharedCells>,
    counters: Option<Arc<Counters>>,
    callback: Option<RetentionCallback>,
) {
    if specs.is_empty() {
        return;
    }
    let run = move || {
        if let Err(error) = eval(&name, &dir, &specs, shared, counters, callback) {
            tracing::warn!(log = %name, %error, "retention evaluation failed");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(run);
        }
        Err(_) => run(),
    }
}
