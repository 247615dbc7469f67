//! The collapsed tombstone map: slow to build, quick to query.
//!
//! Wherever tombstones overlap, only the one with the largest seq matters.
//! Suppose the map holds [b, n) @ 1, [e, h) @ 2, [q, t) @ 2 and [g, k) @ 3:
//!
//! ```text
//!     3:        g---k
//!     2:     e---h        q--t
//!     1:  b------------n
//! ```
//!
//! From the perspective of any read, that set is equivalent to the
//! non-overlapping set below, which an ordered map of transitions represents
//! directly — each entry names the seq in force from its key up to the next
//! entry's key:
//!
//! ```text
//!     b -> 1, e -> 2, g -> 3, k -> 1, n -> 0, q -> 2, t -> 0
//! ```
//!
//! A seq of 0 is the sentinel for "no tombstone here"; it terminates a run
//! of covered intervals. A probe binary-searches for the last entry at or
//! before its key and is covered iff that entry's seq is larger than its
//! own. Probing h @ 4 finds g -> 3 and stays alive; h @ 2 is covered.
//!
//! Entries are keyed by [`BoundaryKey`], not bare user key: clamping a
//! tombstone against a compaction file's point-record boundary produces a
//! transition partway through a user key's versions, and two transitions may
//! then share a user key. For untruncated tombstones the boundary seq is
//! `MAX_SEQ` and the staircase degenerates to plain user-key transitions.

use std::cmp::Ordering;
use std::sync::Arc;

use itertools::Itertools as _;

use crate::comparator::UserComparator;
use crate::key::{ParsedInternalKey, Seq};
use crate::map::PositioningMode;
use crate::tombstone::{BoundaryKey, PartialTombstone, Tombstone, TruncatedTombstone};

pub(crate) struct CollapsedMap {
    ucmp: Arc<dyn UserComparator>,
    /// The transition staircase, strictly ascending by boundary key. The
    /// final entry always carries seq 0.
    rep: Vec<(BoundaryKey, Seq)>,
    /// Position of the entry governing the last probe, reused by the
    /// traversal modes. `None` after any mutation.
    cursor: Option<usize>,
}

impl CollapsedMap {
    pub fn new(ucmp: Arc<dyn UserComparator>) -> Self {
        Self {
            ucmp,
            rep: Vec::new(),
            cursor: None,
        }
    }

    /// First index whose boundary is strictly greater than `(user_key, seq)`.
    fn upper_bound(&self, user_key: &[u8], seq: Seq) -> usize {
        self.rep
            .partition_point(|(k, _)| k.compare_to(&*self.ucmp, user_key, seq) != Ordering::Greater)
    }

    fn seq_at(&self, idx: usize) -> Seq {
        if idx == 0 {
            0
        } else {
            self.rep[idx - 1].1
        }
    }

    /// Whether the probed key is covered by a tombstone newer than it.
    ///
    /// The traversal modes reuse the cursor from the previous probe and only
    /// walk the staircase forward or backward, so a full scan over an
    /// iterator costs the keys traversed plus the staircase size, not their
    /// product. An invalidated cursor silently upgrades the probe to a
    /// binary search.
    pub fn should_delete(&mut self, key: &ParsedInternalKey, mode: PositioningMode) -> bool {
        if self.rep.is_empty() {
            return false;
        }
        let mut mode = mode;
        if self.cursor.is_none()
            && matches!(
                mode,
                PositioningMode::ForwardTraversal | PositioningMode::BackwardTraversal
            )
        {
            // The cursor died with the last mutation; reseek.
            mode = PositioningMode::BinarySearch;
        }
        let ucmp = &*self.ucmp;
        let rep = &self.rep;
        let after = |idx: usize| -> bool {
            rep[idx].0.compare_to(ucmp, key.user_key, key.seq) == Ordering::Greater
        };
        match mode {
            PositioningMode::FullScan => {
                panic!("full scan is not supported on a collapsed map")
            }
            PositioningMode::ForwardTraversal => {
                let mut idx = self.cursor.expect("cursor must be valid for traversal");
                if idx == 0 && after(0) {
                    // Probe precedes every deletion interval.
                    return false;
                }
                while idx + 1 < self.rep.len() && !after(idx + 1) {
                    idx += 1;
                }
                self.cursor = Some(idx);
            }
            PositioningMode::BackwardTraversal => {
                let mut idx = self.cursor.expect("cursor must be valid for traversal");
                while idx > 0 && after(idx) {
                    idx -= 1;
                }
                self.cursor = Some(idx);
                if idx == 0 && after(0) {
                    return false;
                }
            }
            PositioningMode::BinarySearch => {
                let ub = self.upper_bound(key.user_key, key.seq);
                if ub == 0 {
                    self.cursor = Some(0);
                    return false;
                }
                self.cursor = Some(ub - 1);
            }
        }
        let idx = self.cursor.expect("cursor positioned above");
        debug_assert!(!after(idx));
        debug_assert!(idx + 1 >= self.rep.len() || after(idx + 1));
        key.seq < self.rep[idx].1
    }

    /// Whether entries with seq strictly above `seq` cover all of
    /// `[begin, end)`. Fails as soon as a weaker entry is hit before the
    /// walk passes `end`.
    pub fn should_delete_range(
        &self,
        begin: &ParsedInternalKey,
        end: &ParsedInternalKey,
        seq: Seq,
    ) -> bool {
        if self.ucmp.compare(begin.user_key, end.user_key) != Ordering::Less {
            return false;
        }
        let ub = self.upper_bound(begin.user_key, begin.seq);
        if ub == 0 {
            // The range begins before the first deletion interval.
            return false;
        }
        let mut idx = ub - 1;
        loop {
            if self.rep[idx].1 <= seq {
                return false;
            }
            idx += 1;
            if idx == self.rep.len() {
                return false;
            }
            if self.rep[idx].0.compare_to(&*self.ucmp, end.user_key, end.seq) == Ordering::Greater {
                return true;
            }
        }
    }

    /// The staircase interval containing `key`. The returned seq is the
    /// interval's value when it exceeds the probe `seq`, else 0.
    pub fn get_tombstone(&self, key: &ParsedInternalKey, seq: Seq) -> PartialTombstone {
        let ub = self.upper_bound(key.user_key, key.seq);
        if ub == 0 {
            return PartialTombstone::new(None, self.rep.first().map(|(k, _)| k.clone()), 0);
        }
        let (bound, entry_seq) = &self.rep[ub - 1];
        PartialTombstone::new(
            Some(bound.clone()),
            self.rep.get(ub).map(|(k, _)| k.clone()),
            if seq < *entry_seq { *entry_seq } else { 0 },
        )
    }

    /// Collapses a new tombstone into the staircase.
    ///
    /// Each region of the new tombstone — its start point, each existing
    /// transition it spans, and its end point — is classified against the
    /// seq already in force there and handled independently. `end_seq`
    /// tracks the last seq the new tombstone covered over; it is what
    /// resumes if the tombstone's end lands inside existing coverage.
    /// `open` tracks whether the seq in force at the walk position equals
    /// `t.seq` *because of this insertion*: only then does the end need a
    /// closing transition. (A pre-existing equal-seq region that extends
    /// past the end is already terminated by its own transition.)
    pub fn add(&mut self, t: &TruncatedTombstone) {
        self.cursor = None;
        if t.start.compare(&*self.ucmp, &t.end) != Ordering::Less {
            // Empty interval; contributes no coverage.
            return;
        }

        let mut idx = self.upper_bound(&t.start.user_key, t.start.seq);
        let covering = self.seq_at(idx);
        let mut end_seq: Seq = 0;
        let mut open = false;

        if t.seq > covering {
            // The start point covers whatever was in force there. Install a
            // transition at the start, or raise the existing one.
            end_seq = covering;
            open = true;
            let at_start =
                idx > 0 && self.rep[idx - 1].0.compare(&*self.ucmp, &t.start) == Ordering::Equal;
            if at_start {
                if self.seq_at(idx - 1) == t.seq {
                    // The previous run already carries this seq; the entry
                    // at the start point became redundant.
                    self.rep.remove(idx - 1);
                    idx -= 1;
                } else {
                    self.rep[idx - 1].1 = t.seq;
                }
            } else {
                self.rep.insert(idx, (t.start.clone(), t.seq));
                idx += 1;
            }
        }
        // Otherwise the start point is inside an existing region at or above
        // t.seq; it needs no transition.

        // Walk the existing transitions the new tombstone spans.
        while idx < self.rep.len()
            && self.rep[idx].0.compare(&*self.ucmp, &t.end) == Ordering::Less
        {
            let val = self.rep[idx].1;
            match val.cmp(&t.seq) {
                Ordering::Less => {
                    // Transition into a weaker region: the new tombstone
                    // overrides it. Remember what it covered in case the end
                    // lands inside this region.
                    end_seq = val;
                    open = true;
                    if self.seq_at(idx) == t.seq {
                        // Superseded: same seq on both sides.
                        self.rep.remove(idx);
                    } else {
                        self.rep[idx].1 = t.seq;
                        idx += 1;
                    }
                }
                Ordering::Greater => {
                    // A stronger region; the new tombstone is absorbed until
                    // it ends.
                    open = false;
                    idx += 1;
                }
                Ordering::Equal => {
                    // Start of an equal-seq region: merge with it and let its
                    // own terminator govern from here.
                    open = false;
                    if self.seq_at(idx) == t.seq {
                        self.rep.remove(idx);
                    } else {
                        idx += 1;
                    }
                }
            }
        }

        if open {
            // The new tombstone's run is unterminated; close it at the end
            // point, restoring what it covered over. An existing transition
            // at exactly the end point wins, since end keys are exclusive.
            let at_end = idx < self.rep.len()
                && self.rep[idx].0.compare(&*self.ucmp, &t.end) == Ordering::Equal;
            if !at_end {
                self.rep.insert(idx, (t.end.clone(), end_seq));
            }
        }

        self.assert_valid();
    }

    /// Staircase invariants: strictly ascending boundaries, terminated by a
    /// sentinel.
    fn assert_valid(&self) {
        if cfg!(debug_assertions) {
            debug_assert!(self
                .rep
                .iter()
                .tuple_windows()
                .all(|((a, _), (b, _))| a.compare(&*self.ucmp, b) == Ordering::Less));
            debug_assert!(self.rep.last().is_none_or(|(_, seq)| *seq == 0));
        }
    }

    /// Entry count minus the trailing sentinel.
    pub fn size(&self) -> usize {
        self.rep.len().saturating_sub(1)
    }

    pub fn invalidate_position(&mut self) {
        self.cursor = None;
    }

    pub fn iter(&self) -> CollapsedIter<'_> {
        let mut iter = CollapsedIter {
            ucmp: &*self.ucmp,
            rep: &self.rep,
            idx: 0,
        };
        iter.skip_sentinels();
        iter
    }
}

/// Emits a tombstone for every adjacent pair of transitions whose first
/// entry is not a sentinel.
pub(crate) struct CollapsedIter<'a> {
    ucmp: &'a dyn UserComparator,
    rep: &'a [(BoundaryKey, Seq)],
    idx: usize,
}

impl CollapsedIter<'_> {
    fn skip_sentinels(&mut self) {
        while self.valid() && self.rep[self.idx].1 == 0 {
            self.idx += 1;
        }
    }

    pub(crate) fn valid(&self) -> bool {
        self.idx + 1 < self.rep.len()
    }

    pub(crate) fn next(&mut self) {
        self.idx += 1;
        self.skip_sentinels();
    }

    pub(crate) fn seek(&mut self, target: &[u8]) {
        // Position at the last transition whose user key is at or below the
        // target, so a target inside a seq-split user key lands on the
        // interval containing it.
        self.idx = self
            .rep
            .partition_point(|(k, _)| self.ucmp.compare(&k.user_key, target) != Ordering::Greater);
        if self.idx > 0 {
            self.idx -= 1;
        }
        self.skip_sentinels();
    }

    pub(crate) fn tombstone(&self) -> Tombstone {
        Tombstone {
            start_key: self.rep[self.idx].0.user_key.clone(),
            end_key: self.rep[self.idx + 1].0.user_key.clone(),
            seq: self.rep[self.idx].1,
        }
    }

    pub(crate) fn start_bound(&self) -> &BoundaryKey {
        &self.rep[self.idx].0
    }
}
