//! Per-Chunk Bloom Filters
//!
//! Each chunk may carry a small Bloom filter over the filter values of its
//! entries. Readers attach with a set of values they care about and skip
//! whole chunks whose filter proves none of those values can be present.
//!
//! ## Determinism
//!
//! The filter is written by one process and matched by another, so the hash
//! must be stable across processes and builds. Bits are derived from two
//! SipHash-1-3 digests with pinned keys, combined by double hashing.
//!
//! ## Width Negotiation
//!
//! The filter width is a per-chunk property (u8, default 16 bytes, may be 0
//! or up to 255). A matcher precomputes nothing about width; when it meets
//! a chunk whose filter has a different width than the one it was built
//! for, matching returns [`FilterMatch::RetryWith`] carrying a matcher
//! resized for that chunk, and the caller retries the same chunk.
//!
//! ## Unfiltered Entries
//!
//! The writer inserts the empty string for entries without a filter value.
//! A matcher built with `match_unfiltered` probes for the empty string too,
//! so chunks holding plain entries keep matching.

use std::hash::Hasher;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

/// Pinned SipHash keys. Changing these changes the on-disk filter format.
const HASH_KEY_A: (u64, u64) = (0x6f73_696c_6f67_2d61, 0x626c_6f6f_6d2d_6b31);
const HASH_KEY_B: (u64, u64) = (0x6f73_696c_6f67_2d62, 0x626c_6f6f_6d2d_6b32);

/// Probes set/checked per value.
const NUM_PROBES: u64 = 2;

fn hash_pair(value: &[u8]) -> (u64, u64) {
    let mut a = SipHasher13::new_with_keys(HASH_KEY_A.0, HASH_KEY_A.1);
    a.write(value);
    let mut b = SipHasher13::new_with_keys(HASH_KEY_B.0, HASH_KEY_B.1);
    b.write(value);
    (a.finish(), b.finish())
}

fn probe_bits(value: &[u8], num_bits: u64) -> impl Iterator<Item = u64> {
    let (h1, h2) = hash_pair(value);
    (0..NUM_PROBES).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2))) % num_bits)
}

/// Accumulates filter values while a chunk is assembled.
#[derive(Debug, Clone)]
pub struct ChunkFilter {
    bits: Vec<u8>,
}

impl ChunkFilter {
    /// A filter of `size` bytes; size 0 disables filtering for the chunk.
    pub fn new(size: u8) -> Self {
        Self {
            bits: vec![0u8; size as usize],
        }
    }

    pub fn insert(&mut self, value: &[u8]) {
        if self.bits.is_empty() {
            return;
        }
        let num_bits = self.bits.len() as u64 * 8;
        for bit in probe_bits(value, num_bits) {
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    /// Serialized filter region, exactly as many bytes as the configured
    /// width.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.bits.clone())
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

/// What readers pass in `ReaderOptions::filter_spec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Values to match; a chunk matches if any value may be present
    pub values: Vec<Bytes>,

    /// Also deliver chunks containing entries without a filter value
    #[serde(default = "default_match_unfiltered")]
    pub match_unfiltered: bool,
}

fn default_match_unfiltered() -> bool {
    true
}

/// Outcome of matching a chunk filter.
#[derive(Debug, Clone)]
pub enum FilterMatch {
    /// The chunk may contain a wanted value; deliver it
    Match,
    /// The chunk definitely contains no wanted value; skip it
    NoMatch,
    /// The chunk's filter width differs; retry the same chunk with this
    /// matcher
    RetryWith(FilterMatcher),
}

/// A reader-side matcher over chunk filters of one width.
#[derive(Debug, Clone)]
pub struct FilterMatcher {
    values: Vec<Bytes>,
    size: u8,
}

impl FilterMatcher {
    /// Build a matcher for filters of `size` bytes. `match_unfiltered`
    /// folds in the empty-string probe the writer uses for plain entries.
    pub fn new(spec: &FilterSpec, size: u8) -> Self {
        let mut values = spec.values.clone();
        if spec.match_unfiltered {
            values.push(Bytes::new());
        }
        Self { values, size }
    }

    /// Match `chunk_filter` against the wanted values.
    ///
    /// A zero-width chunk filter cannot prove absence, so it matches.
    pub fn is_match(&self, chunk_filter: &[u8]) -> FilterMatch {
        if chunk_filter.is_empty() {
            return FilterMatch::Match;
        }
        if chunk_filter.len() != self.size as usize {
            let mut resized = self.clone();
            resized.size = chunk_filter.len() as u8;
            return FilterMatch::RetryWith(resized);
        }

        let num_bits = chunk_filter.len() as u64 * 8;
        for value in &self.values {
            let present = probe_bits(value, num_bits)
                .all(|bit| chunk_filter[(bit / 8) as usize] & (1 << (bit % 8)) != 0);
            if present {
                return FilterMatch::Match;
            }
        }
        FilterMatch::NoMatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(values: &[&str], match_unfiltered: bool, size: u8) -> FilterMatcher {
        let spec = FilterSpec {
            values: values.iter().map(|v| Bytes::from(v.to_string())).collect(),
            match_unfiltered,
        };
        FilterMatcher::new(&spec, size)
    }

    #[test]
    fn test_inserted_value_matches() {
        let mut filter = ChunkFilter::new(16);
        filter.insert(b"region-eu");
        let bytes = filter.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert!(matches!(
            matcher(&["region-eu"], false, 16).is_match(&bytes),
            FilterMatch::Match
        ));
    }

    #[test]
    fn test_absent_value_skips() {
        let mut filter = ChunkFilter::new(16);
        filter.insert(b"region-eu");
        let bytes = filter.to_bytes();
        assert!(matches!(
            matcher(&["region-us"], false, 16).is_match(&bytes),
            FilterMatch::NoMatch
        ));
    }

    #[test]
    fn test_match_unfiltered_sees_plain_chunks() {
        // the writer inserts "" for entries without a filter value
        let mut filter = ChunkFilter::new(16);
        filter.insert(b"");
        let bytes = filter.to_bytes();
        assert!(matches!(
            matcher(&["region-us"], true, 16).is_match(&bytes),
            FilterMatch::Match
        ));
        assert!(matches!(
            matcher(&["region-us"], false, 16).is_match(&bytes),
            FilterMatch::NoMatch
        ));
    }

    #[test]
    fn test_width_mismatch_returns_retry() {
        let mut filter = ChunkFilter::new(32);
        filter.insert(b"v");
        let bytes = filter.to_bytes();

        let m = matcher(&["v"], false, 16);
        match m.is_match(&bytes) {
            FilterMatch::RetryWith(resized) => {
                assert!(matches!(resized.is_match(&bytes), FilterMatch::Match));
            }
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_width_filter_always_matches() {
        let filter = ChunkFilter::new(0);
        assert!(filter.is_empty());
        assert!(matches!(
            matcher(&["anything"], false, 16).is_match(&filter.to_bytes()),
            FilterMatch::Match
        ));
    }

    #[test]
    fn test_filter_is_deterministic() {
        let mut a = ChunkFilter::new(16);
        let mut b = ChunkFilter::new(16);
        for value in ["x", "yy", "zzz"] {
            a.insert(value.as_bytes());
            b.insert(value.as_bytes());
        }
        assert_eq!(a.to_bytes(), b.to_bytes());
    }
}
