//! Directory Model
//!
//! Operations over the set of segment pairs in a log directory: sorted
//! enumeration, metadata extraction from the first and last pairs, and
//! selection of the pair covering a target chunk id. Because the first
//! chunk id is encoded in every filename, enumeration never opens a file.

use std::fs::File;
use std::path::{Path, PathBuf};

use osilog_core::index::IndexRecord;

use crate::error::{Error, Result};
use crate::segment::{
    first_index_record, index_file_name, last_index_record, open_read, parse_first_chunk_id,
    segment_file_name,
};

/// One segment pair, identified by the first chunk id in its filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPairInfo {
    pub first_chunk_id: u64,
    pub segment_path: PathBuf,
    pub index_path: PathBuf,
}

impl SegmentPairInfo {
    pub(crate) fn new(dir: &Path, first_chunk_id: u64) -> Self {
        Self {
            first_chunk_id,
            segment_path: dir.join(segment_file_name(first_chunk_id)),
            index_path: dir.join(index_file_name(first_chunk_id)),
        }
    }

    pub(crate) fn open_index(&self) -> Result<File> {
        open_read(&self.index_path)
    }

    pub(crate) fn open_segment(&self) -> Result<File> {
        open_read(&self.segment_path)
    }

    pub(crate) fn first_record(&self) -> Result<Option<IndexRecord>> {
        first_index_record(&self.open_index()?)
    }

    pub(crate) fn last_record(&self) -> Result<Option<IndexRecord>> {
        last_index_record(&self.open_index()?)
    }
}

/// List the segment pairs in `dir`, sorted by first chunk id.
///
/// Pairs are discovered through their index files; a stray segment file
/// without an index sibling is not a pair.
pub(crate) fn list_pairs(dir: &Path) -> Result<Vec<SegmentPairInfo>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::from_io(dir, e))?;
    let mut ids: Vec<u64> = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("index") {
            if let Some(id) = parse_first_chunk_id(&path) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids
        .into_iter()
        .map(|id| SegmentPairInfo::new(dir, id))
        .collect())
}

/// Build pair infos from a cached index file listing, sorted.
pub(crate) fn pairs_from_index_paths(dir: &Path, paths: &[PathBuf]) -> Vec<SegmentPairInfo> {
    let mut ids: Vec<u64> = paths
        .iter()
        .filter_map(|p| parse_first_chunk_id(p))
        .collect();
    ids.sort_unstable();
    ids.into_iter()
        .map(|id| SegmentPairInfo::new(dir, id))
        .collect()
}

/// The pair whose name offset is the greatest one `<= chunk_id`, i.e. the
/// pair that would hold the chunk if it is stored at all.
pub(crate) fn find_pair_for(pairs: &[SegmentPairInfo], chunk_id: u64) -> Option<&SegmentPairInfo> {
    pairs
        .iter()
        .rev()
        .find(|pair| pair.first_chunk_id <= chunk_id)
}

/// Delete both files of a pair.
pub(crate) fn delete_pair(pair: &SegmentPairInfo) -> Result<()> {
    for path in [&pair.segment_path, &pair.index_path] {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    tracing::debug!(segment = %pair.segment_path.display(), "deleted segment pair");
    Ok(())
}
