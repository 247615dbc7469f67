//! Internal key format: user key + sequence number + value kind.
//!
//! Every record in the engine is addressed by an internal key. The encoded
//! form is the user key followed by an 8-byte little-endian trailer packing
//! the sequence number (upper 56 bits) and the value kind (low byte):
//!
//! ```text
//! +----------------------+--------------------------------+
//! | user key (variable)  | (seq << 8) | kind   (8 bytes)  |
//! +----------------------+--------------------------------+
//! ```
//!
//! Ordering: user key ascending, then sequence *descending*, then kind
//! descending. The newest version of a key always sorts first, which is what
//! lets reads and compactions stop at the first visible version.

use std::cmp::Ordering;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::comparator::UserComparator;
use crate::errcorrupt;
use crate::error::{Error, Result};

/// A sequence number. Monotonically increasing version tag; higher is newer.
pub type Seq = u64;

/// The largest representable sequence number (all ones in the 56-bit seq
/// field). Sorts before every other sequence of the same user key.
pub const MAX_SEQ: Seq = (1 << 56) - 1;

/// Length of the encoded trailer.
const TRAILER_SIZE: usize = 8;

/// Distinguishes record kinds in the internal key trailer. Only the two
/// kinds the aggregator handles are represented; the numeric values are
/// fixed by the engine's table format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueKind {
    /// A normal put record.
    Value = 0x01,
    /// A range deletion record. Sorts after `Value` at the same user key and
    /// sequence, so kind-descending order puts it first.
    RangeDeletion = 0x0F,
}

impl ValueKind {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0x01 => Ok(ValueKind::Value),
            0x0F => Ok(ValueKind::RangeDeletion),
            _ => errcorrupt!("unknown value kind {v:#04x}"),
        }
    }
}

/// An owned internal key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Vec<u8>,
    pub seq: Seq,
    pub kind: ValueKind,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Vec<u8>>, seq: Seq, kind: ValueKind) -> Self {
        Self {
            user_key: user_key.into(),
            seq,
            kind,
        }
    }

    /// Encodes the key into its on-disk form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.user_key.len() + TRAILER_SIZE);
        buf.extend_from_slice(&self.user_key);
        buf.write_u64::<LittleEndian>((self.seq << 8) | self.kind as u64)
            .expect("write to Vec cannot fail");
        buf
    }

    /// Decodes an internal key, copying the user key.
    pub fn decode(encoded: &[u8]) -> Result<Self> {
        let parsed = ParsedInternalKey::parse(encoded)?;
        Ok(Self {
            user_key: parsed.user_key.to_vec(),
            seq: parsed.seq,
            kind: parsed.kind,
        })
    }

    pub fn parsed(&self) -> ParsedInternalKey<'_> {
        ParsedInternalKey {
            user_key: &self.user_key,
            seq: self.seq,
            kind: self.kind,
        }
    }
}

/// A borrowed view of an internal key, as produced by parsing an encoded key
/// or by splitting an owned one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub seq: Seq,
    pub kind: ValueKind,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn new(user_key: &'a [u8], seq: Seq, kind: ValueKind) -> Self {
        Self {
            user_key,
            seq,
            kind,
        }
    }

    /// Splits an encoded internal key into its parts without copying.
    pub fn parse(encoded: &'a [u8]) -> Result<Self> {
        if encoded.len() < TRAILER_SIZE {
            return errcorrupt!(
                "internal key too short: {} bytes, need at least {TRAILER_SIZE}",
                encoded.len()
            );
        }
        let (user_key, mut trailer) = encoded.split_at(encoded.len() - TRAILER_SIZE);
        let packed = trailer
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::Corruption(e.to_string()))?;
        Ok(Self {
            user_key,
            seq: packed >> 8,
            kind: ValueKind::from_u8(packed as u8)?,
        })
    }
}

/// Compares two internal keys: user key ascending under `ucmp`, then
/// sequence descending, then kind descending.
pub fn internal_key_cmp(
    ucmp: &dyn UserComparator,
    a: &ParsedInternalKey,
    b: &ParsedInternalKey,
) -> Ordering {
    ucmp.compare(a.user_key, b.user_key)
        .then(b.seq.cmp(&a.seq))
        .then(b.kind.cmp(&a.kind))
}
