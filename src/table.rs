//! The emission seam between the aggregator and compaction output files.
//!
//! Compaction hands the aggregator a table builder and the key range the
//! output file owns; the aggregator writes the effective tombstones into the
//! builder and keeps the file's metadata consistent with what was written.

use crate::comparator::UserComparator;
use crate::error::Result;
use crate::key::{internal_key_cmp, InternalKey, Seq, MAX_SEQ};

/// Receives the `(internal key, end user key)` entries of a compaction
/// output file. Entries arrive in ascending internal-key order.
pub trait TableBuilder {
    fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
}

/// Metadata of a compaction output file, updated as tombstones are emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// The smallest internal key in the file, once anything was written.
    pub smallest: Option<InternalKey>,
    /// The largest internal key in the file, once anything was written.
    pub largest: Option<InternalKey>,
    pub smallest_seqno: Seq,
    pub largest_seqno: Seq,
}

impl Default for FileMetadata {
    fn default() -> Self {
        Self {
            smallest: None,
            largest: None,
            smallest_seqno: MAX_SEQ,
            largest_seqno: 0,
        }
    }
}

impl FileMetadata {
    /// Lowers `smallest` to `candidate` if it is smaller.
    pub fn update_smallest(&mut self, ucmp: &dyn UserComparator, candidate: InternalKey) {
        let replace = match &self.smallest {
            None => true,
            Some(current) => {
                internal_key_cmp(ucmp, &candidate.parsed(), &current.parsed())
                    == std::cmp::Ordering::Less
            }
        };
        if replace {
            self.smallest = Some(candidate);
        }
    }

    /// Raises `largest` to `candidate` if it is larger.
    pub fn update_largest(&mut self, ucmp: &dyn UserComparator, candidate: InternalKey) {
        let replace = match &self.largest {
            None => true,
            Some(current) => {
                internal_key_cmp(ucmp, &current.parsed(), &candidate.parsed())
                    == std::cmp::Ordering::Less
            }
        };
        if replace {
            self.largest = Some(candidate);
        }
    }

    /// Widens the file's seqno range to include `seq`.
    pub fn note_seq(&mut self, seq: Seq) {
        self.smallest_seqno = self.smallest_seqno.min(seq);
        self.largest_seqno = self.largest_seqno.max(seq);
    }
}

/// Counters credited when compaction drops provably obsolete tombstones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub num_range_del_drop_obsolete: u64,
    pub num_record_drop_obsolete: u64,
}
