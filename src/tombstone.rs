//! Range tombstone data types.
//!
//! A range tombstone asserts that every user key in `[start_key, end_key)`
//! is deleted at sequence `seq`. Inside the aggregator, tombstones are kept
//! in a *truncated* form whose endpoints are [`BoundaryKey`]s: positions in
//! internal-key space rather than bare user keys. An untruncated tombstone
//! `[s, e) @ q` has boundaries `(s, MAX_SEQ)` and `(e, MAX_SEQ)` — it covers
//! every version of `s` and no version of `e`. Clamping against a compaction
//! file's point-record boundary produces a boundary with a finite sequence,
//! which splits the coverage of a single user key by sequence number.

use std::cmp::Ordering;

use crate::comparator::UserComparator;
use crate::key::{Seq, MAX_SEQ};

/// A range tombstone over user keys, as surfaced by iterators and written to
/// table builders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub seq: Seq,
}

impl Tombstone {
    pub fn new(start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>, seq: Seq) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
            seq,
        }
    }
}

/// A position in internal-key space: a user key plus the sequence at which
/// coverage begins or ends. Ordered by user key ascending, then sequence
/// descending, matching the internal-key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryKey {
    pub user_key: Vec<u8>,
    pub seq: Seq,
}

impl BoundaryKey {
    pub fn new(user_key: impl Into<Vec<u8>>, seq: Seq) -> Self {
        Self {
            user_key: user_key.into(),
            seq,
        }
    }

    /// The boundary covering every version of `user_key`.
    pub fn before(user_key: impl Into<Vec<u8>>) -> Self {
        Self::new(user_key, MAX_SEQ)
    }

    pub fn compare(&self, ucmp: &dyn UserComparator, other: &BoundaryKey) -> Ordering {
        self.compare_to(ucmp, &other.user_key, other.seq)
    }

    /// Compares this boundary against a raw (user key, seq) position.
    pub fn compare_to(&self, ucmp: &dyn UserComparator, user_key: &[u8], seq: Seq) -> Ordering {
        ucmp.compare(&self.user_key, user_key)
            .then(seq.cmp(&self.seq))
    }
}

/// A tombstone clamped to boundary-key endpoints. This is the form the maps
/// store; `start < end` in boundary order for every tombstone that carries
/// coverage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TruncatedTombstone {
    pub start: BoundaryKey,
    pub end: BoundaryKey,
    pub seq: Seq,
}

impl TruncatedTombstone {
    pub fn tombstone(&self) -> Tombstone {
        Tombstone {
            start_key: self.start.user_key.clone(),
            end_key: self.end.user_key.clone(),
            seq: self.seq,
        }
    }
}

/// The result of a gap query: the staircase interval containing the probed
/// key. Either boundary is absent at the edge of the map. A `seq` of zero
/// means no tombstone covers the probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialTombstone {
    pub start: Option<BoundaryKey>,
    pub end: Option<BoundaryKey>,
    pub seq: Seq,
}

impl PartialTombstone {
    pub fn new(start: Option<BoundaryKey>, end: Option<BoundaryKey>, seq: Seq) -> Self {
        Self { start, end, seq }
    }
}
