//! The uncollapsed tombstone map: a start-ordered multiset of raw
//! tombstones. Quick to build, O(N) to query. Used where ingest cost matters
//! and lookups are rare, such as the file-ingestion overlap check.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::comparator::UserComparator;
use crate::key::ParsedInternalKey;
use crate::map::PositioningMode;
use crate::tombstone::{BoundaryKey, Tombstone, TruncatedTombstone};

pub(crate) struct UncollapsedMap {
    ucmp: Arc<dyn UserComparator>,
    /// Tombstones ordered by start boundary. Duplicates are allowed;
    /// insertion order is preserved among equal starts.
    rep: Vec<TruncatedTombstone>,
}

impl UncollapsedMap {
    pub fn new(ucmp: Arc<dyn UserComparator>) -> Self {
        Self {
            ucmp,
            rep: Vec::new(),
        }
    }

    pub fn add(&mut self, tombstone: TruncatedTombstone) {
        // Fast path: sources yield tombstones in ascending order, so most
        // inserts append.
        let at_end = self
            .rep
            .last()
            .is_none_or(|last| last.start.compare(&*self.ucmp, &tombstone.start) != Ordering::Greater);
        if at_end {
            self.rep.push(tombstone);
        } else {
            let idx = self
                .rep
                .partition_point(|t| t.start.compare(&*self.ucmp, &tombstone.start) != Ordering::Greater);
            self.rep.insert(idx, tombstone);
        }
    }

    /// Scans tombstones in start order. Stops early once starts pass the
    /// probed key, since later tombstones cannot contain it.
    pub fn should_delete(&self, key: &ParsedInternalKey, mode: PositioningMode) -> bool {
        debug_assert_eq!(mode, PositioningMode::FullScan);
        for tombstone in &self.rep {
            if tombstone
                .start
                .compare_to(&*self.ucmp, key.user_key, key.seq)
                == Ordering::Greater
            {
                break;
            }
            if key.seq < tombstone.seq
                && tombstone.end.compare_to(&*self.ucmp, key.user_key, key.seq) == Ordering::Greater
            {
                return true;
            }
        }
        false
    }

    /// Whether any non-empty tombstone overlaps `[start, end]`. The query
    /// range is inclusive on both ends while tombstone ends stay exclusive:
    /// the ingestion collision check wants any touch, including a tombstone
    /// beginning exactly at `end`.
    pub fn is_range_overlapped(&self, start: &[u8], end: &[u8]) -> bool {
        self.rep.iter().any(|t| {
            self.ucmp.compare(start, &t.end.user_key) == Ordering::Less
                && self.ucmp.compare(&t.start.user_key, end) != Ordering::Greater
                && self.ucmp.compare(&t.start.user_key, &t.end.user_key) == Ordering::Less
        })
    }

    pub fn size(&self) -> usize {
        self.rep.len()
    }

    pub fn iter(&self) -> UncollapsedIter<'_> {
        UncollapsedIter {
            rep: &self.rep,
            idx: 0,
        }
    }
}

/// Iterates tombstones in ascending start order, stable among equal starts.
pub(crate) struct UncollapsedIter<'a> {
    rep: &'a [TruncatedTombstone],
    idx: usize,
}

impl UncollapsedIter<'_> {
    pub(crate) fn valid(&self) -> bool {
        self.idx < self.rep.len()
    }

    pub(crate) fn next(&mut self) {
        self.idx += 1;
    }

    pub(crate) fn seek(&mut self, _target: &[u8]) {
        panic!("seek is not supported on an uncollapsed tombstone map");
    }

    pub(crate) fn tombstone(&self) -> Tombstone {
        self.rep[self.idx].tombstone()
    }

    pub(crate) fn start_bound(&self) -> &BoundaryKey {
        &self.rep[self.idx].start
    }
}
