//! Acceptor Reconciliation
//!
//! Before a follower can accept chunks from a leader, its log must be a
//! prefix of the leader's. The leader describes its history as a vector of
//! `(epoch, last chunk id written in that epoch)` pairs plus its stored
//! chunk range; `truncate_to` cuts the local log back to the largest
//! prefix both sides share.
//!
//! Walking the vector from the newest epoch down:
//!
//! - If the local log holds chunk `k` with epoch `e`, everything after it
//!   diverged: the segment and index are truncated at the end of that
//!   chunk and newer segments are deleted.
//! - If the local tail is in epoch `e` but ends before `k`, the local log
//!   is already a prefix, provided the two ranges overlap at all; with no
//!   overlap the local data is useless and is dropped wholesale.
//! - If the vector is exhausted the histories share nothing; every local
//!   pair is deleted and the follower attaches fresh.
//!
//! A remote range of `None` (leader holds no chunks) is a valid input,
//! never an error.

use std::path::Path;

use crate::directory::{delete_pair, find_pair_for, list_pairs, SegmentPairInfo};
use crate::error::Result;
use crate::segment::{
    index_record_at, index_record_count, read_chunk_header_at, truncate_file,
};

use osilog_core::index::{INDEX_HEADER_SIZE, INDEX_RECORD_SIZE};
use osilog_core::IndexRecord;

/// Cut the local log in `dir` back to the largest prefix shared with a
/// remote whose stored range is `remote_range` and whose epoch history is
/// `epoch_offsets`. Returns the surviving pairs, oldest first; an empty
/// list means "attach fresh".
pub fn truncate_to(
    dir: &Path,
    name: &str,
    remote_range: Option<(u64, u64)>,
    epoch_offsets: &[(u64, u64)],
) -> Result<Vec<SegmentPairInfo>> {
    let pairs = list_pairs(dir)?;
    if pairs.is_empty() {
        return Ok(pairs);
    }

    let local_first = pairs.iter().find_map(|p| p.first_record().ok().flatten());
    let local_last = pairs.iter().rev().find_map(|p| p.last_record().ok().flatten());
    let (Some(local_first), Some(local_last)) = (local_first, local_last) else {
        // only bare headers on disk; nothing to reconcile
        return Ok(pairs);
    };

    let mut vector: Vec<(u64, u64)> = epoch_offsets.to_vec();
    vector.sort_unstable_by(|a, b| b.cmp(a));

    for (epoch, chunk_id) in vector {
        if chunk_id > local_last.chunk_id || find_pair_for(&pairs, chunk_id).is_none() {
            // the remote wrote past our tail in this epoch; if our tail is
            // in the same epoch we are already a clean prefix
            if local_last.epoch == epoch && local_last.chunk_id < chunk_id {
                let overlaps = matches!(
                    remote_range,
                    Some((remote_first, remote_last))
                        if remote_first <= local_last.chunk_id
                            && local_first.chunk_id <= remote_last
                );
                if overlaps {
                    tracing::debug!(
                        log = name,
                        epoch,
                        chunk_id,
                        "local log is a prefix of the remote"
                    );
                    return Ok(pairs);
                }
                tracing::info!(
                    log = name,
                    epoch,
                    chunk_id,
                    "no overlap with remote range, dropping local log"
                );
                return delete_all(pairs);
            }
            continue;
        }

        let pair = find_pair_for(&pairs, chunk_id).expect("covering pair checked above");
        if let Some((nth, record)) = locate_exact(pair, chunk_id, epoch)? {
            let segment = pair.open_segment()?;
            let header = read_chunk_header_at(&segment, record.position as u64)?;
            let chunk_end = record.position as u64 + header.total_size();
            drop(segment);

            truncate_file(&pair.segment_path, chunk_end)?;
            truncate_file(
                &pair.index_path,
                INDEX_HEADER_SIZE as u64 + (nth + 1) * INDEX_RECORD_SIZE as u64,
            )?;
            tracing::info!(
                log = name,
                epoch,
                chunk_id,
                segment = %pair.segment_path.display(),
                "truncated local log at shared chunk"
            );

            let mut survivors = Vec::new();
            for candidate in pairs {
                if candidate.first_chunk_id > chunk_id {
                    delete_pair(&candidate)?;
                } else {
                    survivors.push(candidate);
                }
            }
            return Ok(survivors);
        }
    }

    tracing::info!(log = name, "no shared chunk with remote, dropping local log");
    delete_all(pairs)
}

fn delete_all(pairs: Vec<SegmentPairInfo>) -> Result<Vec<SegmentPairInfo>> {
    for pair in &pairs {
        delete_pair(pair)?;
    }
    Ok(Vec::new())
}

/// Find the index record for exactly `(chunk_id, epoch)` in `pair`.
fn locate_exact(
    pair: &SegmentPairInfo,
    chunk_id: u64,
    epoch: u64,
) -> Result<Option<(u64, IndexRecord)>> {
    let index = pair.open_index()?;
    let count = index_record_count(&index)?;
    for nth in 0..count {
        let record = index_record_at(&index, nth)?;
        if record.chunk_id == chunk_id {
            if record.epoch == epoch {
                return Ok(Some((nth, record)));
            }
            return Ok(None);
        }
        if record.chunk_id > chunk_id {
            return Ok(None);
        }
    }
    Ok(None)
}
