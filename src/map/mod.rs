//! Tombstone map representations.
//!
//! A stripe's tombstones live in one of two representations, chosen when the
//! aggregator is constructed:
//!
//! - [`UncollapsedMap`]: cheap to build, O(N) to query. A start-ordered
//!   multiset of raw tombstones, scanned in full on every lookup.
//! - [`CollapsedMap`]: more work per insert, O(log N) to query. Overlapping
//!   tombstones are merged into a non-overlapping transition staircase.
//!
//! The [`DeletionMap`] enum dispatches between them statically; the choice
//! is fixed for the lifetime of the aggregator, so no trait objects are
//! needed.

mod collapsed;
mod uncollapsed;

use std::sync::Arc;

use crate::comparator::UserComparator;
use crate::key::{ParsedInternalKey, Seq};
use crate::tombstone::{BoundaryKey, PartialTombstone, Tombstone, TruncatedTombstone};

pub(crate) use collapsed::{CollapsedIter, CollapsedMap};
pub(crate) use uncollapsed::{UncollapsedIter, UncollapsedMap};

/// How a `should_delete` lookup positions itself within a map.
///
/// `FullScan` is the only mode an uncollapsed map supports. The traversal
/// modes amortize repeated lookups on a collapsed map by reusing a cursor:
/// they are correct only while queries move monotonically in the indicated
/// direction, which holds during iterator-driven scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositioningMode {
    FullScan,
    ForwardTraversal,
    BackwardTraversal,
    BinarySearch,
}

/// Uniform traversal over the tombstones of either map representation.
///
/// Tombstones are produced in ascending start-key order. On collapsed maps,
/// sentinel transitions (seq 0) are skipped transparently.
pub trait TombstoneIterator {
    fn valid(&self) -> bool;

    /// Advances to the next tombstone. Must only be called while `valid`.
    fn next(&mut self);

    /// Positions at the first tombstone whose interval contains `target` or
    /// begins after it.
    ///
    /// # Panics
    ///
    /// Panics on uncollapsed maps, which do not support seeking.
    fn seek(&mut self, target: &[u8]);

    /// The tombstone at the current position. Must only be called while
    /// `valid`.
    fn tombstone(&self) -> Tombstone;
}

/// A tombstone map in one of its two representations.
pub(crate) enum DeletionMap {
    Uncollapsed(UncollapsedMap),
    Collapsed(CollapsedMap),
}

impl DeletionMap {
    pub fn new(ucmp: Arc<dyn UserComparator>, collapse: bool) -> Self {
        if collapse {
            DeletionMap::Collapsed(CollapsedMap::new(ucmp))
        } else {
            DeletionMap::Uncollapsed(UncollapsedMap::new(ucmp))
        }
    }

    pub fn add(&mut self, tombstone: TruncatedTombstone) {
        match self {
            DeletionMap::Uncollapsed(map) => map.add(tombstone),
            DeletionMap::Collapsed(map) => map.add(&tombstone),
        }
    }

    pub fn should_delete(&mut self, key: &ParsedInternalKey, mode: PositioningMode) -> bool {
        match self {
            DeletionMap::Uncollapsed(map) => map.should_delete(key, mode),
            DeletionMap::Collapsed(map) => map.should_delete(key, mode),
        }
    }

    /// Whether entries with seq above `seq` cover all of `[begin, end)`.
    /// Only supported on collapsed maps.
    pub fn should_delete_range(
        &self,
        begin: &ParsedInternalKey,
        end: &ParsedInternalKey,
        seq: Seq,
    ) -> bool {
        match self {
            DeletionMap::Uncollapsed(_) => {
                panic!("should_delete_range is not supported on an uncollapsed map")
            }
            DeletionMap::Collapsed(map) => map.should_delete_range(begin, end, seq),
        }
    }

    /// The staircase interval containing `key`. Only supported on collapsed
    /// maps.
    pub fn get_tombstone(&self, key: &ParsedInternalKey, seq: Seq) -> PartialTombstone {
        match self {
            DeletionMap::Uncollapsed(_) => {
                panic!("get_tombstone is not supported on an uncollapsed map")
            }
            DeletionMap::Collapsed(map) => map.get_tombstone(key, seq),
        }
    }

    /// Whether any non-empty tombstone overlaps the inclusive range
    /// `[start, end]`. Only supported on uncollapsed maps.
    pub fn is_range_overlapped(&self, start: &[u8], end: &[u8]) -> bool {
        match self {
            DeletionMap::Uncollapsed(map) => map.is_range_overlapped(start, end),
            DeletionMap::Collapsed(_) => {
                panic!("is_range_overlapped is not supported on a collapsed map")
            }
        }
    }

    pub fn size(&self) -> usize {
        match self {
            DeletionMap::Uncollapsed(map) => map.size(),
            DeletionMap::Collapsed(map) => map.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn invalidate_position(&mut self) {
        match self {
            DeletionMap::Uncollapsed(_) => {} // no cursor to invalidate
            DeletionMap::Collapsed(map) => map.invalidate_position(),
        }
    }

    pub fn iter(&self) -> MapIter<'_> {
        match self {
            DeletionMap::Uncollapsed(map) => MapIter::Uncollapsed(map.iter()),
            DeletionMap::Collapsed(map) => MapIter::Collapsed(map.iter()),
        }
    }
}

/// An iterator over either map representation.
pub(crate) enum MapIter<'a> {
    Uncollapsed(UncollapsedIter<'a>),
    Collapsed(CollapsedIter<'a>),
}

impl MapIter<'_> {
    /// The start boundary of the current tombstone, for merge ordering.
    pub(crate) fn start_bound(&self) -> &BoundaryKey {
        match self {
            MapIter::Uncollapsed(iter) => iter.start_bound(),
            MapIter::Collapsed(iter) => iter.start_bound(),
        }
    }
}

impl TombstoneIterator for MapIter<'_> {
    fn valid(&self) -> bool {
        match self {
            MapIter::Uncollapsed(iter) => iter.valid(),
            MapIter::Collapsed(iter) => iter.valid(),
        }
    }

    fn next(&mut self) {
        match self {
            MapIter::Uncollapsed(iter) => iter.next(),
            MapIter::Collapsed(iter) => iter.next(),
        }
    }

    fn seek(&mut self, target: &[u8]) {
        match self {
            MapIter::Uncollapsed(iter) => iter.seek(target),
            MapIter::Collapsed(iter) => iter.seek(target),
        }
    }

    fn tombstone(&self) -> Tombstone {
        match self {
            MapIter::Uncollapsed(iter) => iter.tombstone(),
            MapIter::Collapsed(iter) => iter.tombstone(),
        }
    }
}
