//! The range-deletion aggregator.
//!
//! Compaction and reads both need a single answer to "is this key covered by
//! a range tombstone?" across many on-disk sources and the memtable. The
//! aggregator ingests tombstones from source iterators, buckets them into
//! per-snapshot *stripes*, and answers coverage queries against the stripe a
//! key's sequence number falls in.
//!
//! # Stripes
//!
//! Two tombstones may only be merged if every snapshot sees them the same
//! way. The stripe map is keyed by snapshot upper bounds (plus a catch-all
//! at `MAX_SEQ`); a tombstone with seq `t` lands in the stripe with the
//! smallest upper bound at or above `t`, and a probe with seq `s` consults
//! only that same stripe. Tombstones in other stripes are invisible to it,
//! which is exactly MVCC visibility.
//!
//! # Truncation
//!
//! During compaction a tombstone must not extend past the key range assigned
//! to an output file. Ingest optionally clamps each tombstone to the file's
//! `[smallest, largest]` internal keys, in boundary-key space: a point-record
//! boundary clips coverage of its own user key at its sequence number, not
//! just at user-key granularity.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::comparator::UserComparator;
use crate::error::Result;
use crate::key::{InternalKey, ParsedInternalKey, Seq, ValueKind, MAX_SEQ};
use crate::map::{DeletionMap, MapIter, PositioningMode, TombstoneIterator};
use crate::table::{CompactionStats, FileMetadata, TableBuilder};
use crate::tombstone::{BoundaryKey, PartialTombstone, Tombstone, TruncatedTombstone};

pub struct RangeDelAggregator {
    ucmp: Arc<dyn UserComparator>,
    /// Upper bound of the newest stripe: `MAX_SEQ` for compaction, the read
    /// snapshot for point reads.
    upper_bound: Seq,
    collapse: bool,
    /// Stripe maps keyed by snapshot upper bound. `None` until the first
    /// ingest that carries data (always present for the compaction form).
    stripes: Option<BTreeMap<Seq, DeletionMap>>,
}

impl RangeDelAggregator {
    /// The compaction form: tombstones are bucketed by the snapshot list and
    /// merged within each stripe. Pass `collapse = true` unless lookups will
    /// be rare.
    pub fn new(ucmp: Arc<dyn UserComparator>, snapshots: &[Seq], collapse: bool) -> Self {
        let mut agg = Self {
            ucmp,
            upper_bound: MAX_SEQ,
            collapse,
            stripes: None,
        };
        agg.init_stripes(snapshots);
        agg
    }

    /// The read form: a single stripe bounded by the read snapshot, built
    /// lazily since most reads never see a tombstone.
    pub fn for_snapshot(ucmp: Arc<dyn UserComparator>, snapshot: Seq, collapse: bool) -> Self {
        Self {
            ucmp,
            upper_bound: snapshot,
            collapse,
            stripes: None,
        }
    }

    fn init_stripes(&mut self, snapshots: &[Seq]) {
        debug_assert!(self.stripes.is_none());
        let mut stripes = BTreeMap::new();
        for &snapshot in snapshots {
            stripes.insert(snapshot, DeletionMap::new(Arc::clone(&self.ucmp), self.collapse));
        }
        // Tombstones newer than every snapshot land in the catch-all stripe.
        stripes.insert(MAX_SEQ, DeletionMap::new(Arc::clone(&self.ucmp), self.collapse));
        self.stripes = Some(stripes);
    }

    /// The stripe covering `seq`: the one with the least upper bound at or
    /// above it.
    fn stripe_for(&mut self, seq: Seq) -> &mut DeletionMap {
        let stripes = self.stripes.as_mut().expect("stripes are initialized");
        stripes
            .range_mut(seq..)
            .next()
            .expect("catch-all stripe always exists")
            .1
    }

    /// Drains a source iterator of `(encoded internal key, end user key)`
    /// pairs into the stripe maps, optionally clamping each tombstone to a
    /// compaction file's boundary keys. Returns `Corruption` if an internal
    /// key fails to parse.
    pub fn add_tombstones<I>(
        &mut self,
        tombstones: I,
        smallest: Option<&InternalKey>,
        largest: Option<&InternalKey>,
    ) -> Result<()>
    where
        I: IntoIterator<Item = Result<(Vec<u8>, Vec<u8>)>>,
    {
        let lower = smallest.map(file_boundary);
        let upper = largest.map(file_boundary);
        let mut first = true;
        let mut added = 0usize;
        let mut dropped = 0usize;
        for item in tombstones {
            let (key, end_key) = item?;
            if first {
                if self.stripes.is_none() {
                    self.init_stripes(&[self.upper_bound]);
                } else {
                    // Ingest moves transitions; stale cursors must reseek.
                    self.invalidate_positions();
                }
                first = false;
            }
            let parsed = ParsedInternalKey::parse(&key)?;
            let mut tombstone = TruncatedTombstone {
                start: BoundaryKey::before(parsed.user_key.to_vec()),
                end: BoundaryKey::before(end_key),
                seq: parsed.seq,
            };
            let empty_before = tombstone.start.compare(&*self.ucmp, &tombstone.end) != Ordering::Less;
            if let Some(lower) = &lower {
                if tombstone.start.compare(&*self.ucmp, lower) == Ordering::Less {
                    tombstone.start = lower.clone();
                }
            }
            if let Some(upper) = &upper {
                if tombstone.end.compare(&*self.ucmp, upper) == Ordering::Greater {
                    tombstone.end = upper.clone();
                }
            }
            if !empty_before
                && tombstone.start.compare(&*self.ucmp, &tombstone.end) != Ordering::Less
            {
                // Truncation left nothing inside the file's range.
                dropped += 1;
                continue;
            }
            let seq = tombstone.seq;
            self.stripe_for(seq).add(tombstone);
            added += 1;
        }
        if added > 0 || dropped > 0 {
            tracing::trace!(added, dropped, "ingested range tombstones");
        }
        Ok(())
    }

    /// Whether `key` is covered by a tombstone visible to its snapshot
    /// stripe and newer than it.
    pub fn should_delete(&mut self, key: &ParsedInternalKey, mode: PositioningMode) -> bool {
        if self.stripes.is_none() {
            return false;
        }
        let map = self.stripe_for(key.seq);
        if map.is_empty() {
            return false;
        }
        map.should_delete(key, mode)
    }

    /// Whether tombstones above `seq` cover all of `[begin, end)` within
    /// `seq`'s stripe. Requires a collapsed aggregator.
    pub fn should_delete_range(
        &self,
        begin: &ParsedInternalKey,
        end: &ParsedInternalKey,
        seq: Seq,
    ) -> bool {
        let Some(stripes) = self.stripes.as_ref() else {
            return false;
        };
        let map = stripes
            .range(seq..)
            .next()
            .expect("catch-all stripe always exists")
            .1;
        map.should_delete_range(begin, end, seq)
    }

    /// The staircase interval containing `key` within `seq`'s stripe.
    /// Requires a collapsed aggregator.
    pub fn get_tombstone(&self, key: &ParsedInternalKey, seq: Seq) -> PartialTombstone {
        let Some(stripes) = self.stripes.as_ref() else {
            return PartialTombstone::default();
        };
        let map = stripes
            .range(seq..)
            .next()
            .expect("catch-all stripe always exists")
            .1;
        map.get_tombstone(key, seq)
    }

    /// Whether any tombstone in any stripe overlaps the inclusive range
    /// `[start, end]`. Requires an uncollapsed aggregator; the only caller
    /// is the file-ingestion collision check.
    pub fn is_range_overlapped(&self, start: &[u8], end: &[u8]) -> bool {
        let Some(stripes) = self.stripes.as_ref() else {
            return false;
        };
        stripes.values().any(|map| map.is_range_overlapped(start, end))
    }

    /// Whether `add_to_builder` would emit anything. On the bottommost level
    /// the oldest stripe is excluded: nothing below it can need those
    /// tombstones anymore.
    pub fn should_add_tombstones(&self, bottommost_level: bool) -> bool {
        let Some(stripes) = self.stripes.as_ref() else {
            return false;
        };
        stripes
            .values()
            .skip(usize::from(bottommost_level))
            .any(|map| !map.is_empty())
    }

    /// Writes the effective tombstones, stripe by stripe, into a table
    /// builder, clipping bookkeeping to the `[lower_bound, upper_bound)`
    /// range assigned to the output file and keeping `meta` consistent with
    /// what was written.
    pub fn add_to_builder<B: TableBuilder>(
        &self,
        builder: &mut B,
        lower_bound: Option<&[u8]>,
        upper_bound: Option<&[u8]>,
        meta: &mut FileMetadata,
        stats: Option<&mut CompactionStats>,
        bottommost_level: bool,
    ) -> Result<()> {
        let Some(stripes) = self.stripes.as_ref() else {
            return Ok(());
        };
        let mut stripe_maps = stripes.values();
        if bottommost_level {
            if let Some(oldest) = stripe_maps.next() {
                // Keys under the oldest stripe's tombstones were compacted
                // away, so the tombstones themselves are obsolete.
                if let Some(stats) = stats {
                    stats.num_range_del_drop_obsolete += oldest.size() as u64;
                    stats.num_record_drop_obsolete += oldest.size() as u64;
                }
            }
        }

        let mut emitted = 0usize;
        for stripe in stripe_maps {
            let mut first_added = false;
            let mut iter = stripe.iter();
            while iter.valid() {
                let tombstone = iter.tombstone();
                if let Some(upper) = upper_bound {
                    if self.ucmp.compare(upper, &tombstone.start_key) != Ordering::Greater {
                        // Starts at or past the upper bound: it belongs to
                        // the next file, as does everything after it.
                        break;
                    }
                }
                if let Some(lower) = lower_bound {
                    if self.ucmp.compare(&tombstone.end_key, lower) != Ordering::Greater {
                        // Ends at or before the lower bound: belongs to the
                        // previous file, but later tombstones may still
                        // overlap this one's range.
                        iter.next();
                        continue;
                    }
                }

                let ikey = InternalKey::new(
                    tombstone.start_key.clone(),
                    tombstone.seq,
                    ValueKind::RangeDeletion,
                );
                builder.add(&ikey.encode(), &tombstone.end_key)?;
                emitted += 1;

                if !first_added {
                    first_added = true;
                    let mut smallest_candidate = ikey;
                    if let Some(lower) = lower_bound {
                        if self.ucmp.compare(&smallest_candidate.user_key, lower)
                            != Ordering::Greater
                        {
                            // Pretend the file starts at the lower bound so
                            // output files appear key-space partitioned. Seq
                            // 0 sorts the fake key after the previous file's
                            // largest; the read path only compares user keys
                            // when picking files.
                            smallest_candidate =
                                InternalKey::new(lower.to_vec(), 0, ValueKind::RangeDeletion);
                        }
                    }
                    meta.update_smallest(&*self.ucmp, smallest_candidate);
                }
                let mut largest_candidate = InternalKey::new(
                    tombstone.end_key.clone(),
                    tombstone.seq,
                    ValueKind::RangeDeletion,
                );
                if let Some(upper) = upper_bound {
                    if self.ucmp.compare(upper, &largest_candidate.user_key) != Ordering::Greater {
                        // Symmetric: MAX_SEQ sorts the fake key before any
                        // real record of the upper-bound user key, so a
                        // lookup there is directed to the next file.
                        largest_candidate =
                            InternalKey::new(upper.to_vec(), MAX_SEQ, ValueKind::RangeDeletion);
                    }
                }
                meta.update_largest(&*self.ucmp, largest_candidate);
                meta.note_seq(tombstone.seq);
                iter.next();
            }
        }
        tracing::debug!(
            emitted,
            bottommost_level,
            "flushed range tombstones to table builder"
        );
        Ok(())
    }

    /// Invalidates every stripe's query cursor. Must run after any mutation
    /// that interleaves with traversal-mode queries.
    pub fn invalidate_positions(&mut self) {
        if let Some(stripes) = self.stripes.as_mut() {
            for map in stripes.values_mut() {
                map.invalidate_position();
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.stripes {
            None => true,
            Some(stripes) => stripes.values().all(|map| map.is_empty()),
        }
    }

    /// An iterator over the effective tombstones of all stripes, merged in
    /// ascending start order (ties broken by stripe age). Supports `seek`
    /// when the aggregator is collapsed.
    pub fn iter(&self) -> AggregationIter<'_> {
        let iters = match &self.stripes {
            None => Vec::new(),
            Some(stripes) => stripes.values().map(|map| map.iter()).collect(),
        };
        let mut iter = AggregationIter {
            ucmp: &*self.ucmp,
            iters,
            current: None,
        };
        iter.select();
        iter
    }
}

/// Converts a file boundary key into the boundary-key space tombstones are
/// clamped in. A range-deletion boundary is a tombstone's own endpoint and
/// clips nothing within its user key; a point-record boundary splits
/// coverage of its user key at its sequence number.
fn file_boundary(key: &InternalKey) -> BoundaryKey {
    match key.kind {
        ValueKind::RangeDeletion => BoundaryKey::before(key.user_key.clone()),
        ValueKind::Value => BoundaryKey::new(key.user_key.clone(), key.seq),
    }
}

/// Merges the per-stripe iterators by repeatedly selecting the one with the
/// smallest current start boundary. The stream count is the stripe count,
/// so linear selection beats heap bookkeeping here.
pub struct AggregationIter<'a> {
    ucmp: &'a dyn UserComparator,
    iters: Vec<MapIter<'a>>,
    current: Option<usize>,
}

impl AggregationIter<'_> {
    fn select(&mut self) {
        let mut best: Option<usize> = None;
        for idx in 0..self.iters.len() {
            if !self.iters[idx].valid() {
                continue;
            }
            best = match best {
                None => Some(idx),
                Some(prev) => {
                    let ordering = self.iters[idx]
                        .start_bound()
                        .compare(self.ucmp, self.iters[prev].start_bound());
                    if ordering == Ordering::Less {
                        Some(idx)
                    } else {
                        Some(prev)
                    }
                }
            };
        }
        self.current = best;
    }
}

impl TombstoneIterator for AggregationIter<'_> {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) {
        if let Some(idx) = self.current {
            self.iters[idx].next();
            self.select();
        }
    }

    fn seek(&mut self, target: &[u8]) {
        for iter in &mut self.iters {
            iter.seek(target);
        }
        self.select();
    }

    fn tombstone(&self) -> Tombstone {
        self.iters[self.current.expect("iterator is valid")].tombstone()
    }
}
