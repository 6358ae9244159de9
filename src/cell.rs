//! Cell Model
//!
//! Keys, values, and tombstones, plus the ordering every sorted stream in
//! the engine obeys.
//!
//! ## Ordering
//! - Keys compare byte-wise (unsigned, lexicographic)
//! - Among equal keys, the higher sequence number sorts first
//!
//! With this ordering, deduplicating a merged stream reduces to keeping the
//! first cell of every run of equal keys.

use std::cmp::Ordering;

use bytes::Bytes;

/// Byte-wise key comparison.
#[inline]
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}

/// The value half of a cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A live payload
    Present(Bytes),

    /// A tombstone (deleted key)
    Deleted,
}

impl Value {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Value::Deleted)
    }

    /// Payload bytes, or `None` for a tombstone
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            Value::Present(payload) => Some(payload),
            Value::Deleted => None,
        }
    }

    /// Payload length in bytes (0 for a tombstone)
    pub fn payload_len(&self) -> usize {
        self.payload().map_or(0, Bytes::len)
    }
}

/// A key paired with its value and the sequence number it was written at
#[derive(Debug, Clone)]
pub struct Cell {
    pub key: Bytes,
    pub seq: u64,
    pub value: Value,
}

impl Cell {
    /// A live cell. `seq` must come from the engine's sequence counter.
    pub fn present(key: impl Into<Bytes>, payload: impl Into<Bytes>, seq: u64) -> Self {
        Self {
            key: key.into(),
            seq,
            value: Value::Present(payload.into()),
        }
    }

    /// A tombstone cell. `seq` must come from the engine's sequence counter.
    pub fn tombstone(key: impl Into<Bytes>, seq: u64) -> Self {
        Self {
            key: key.into(),
            seq,
            value: Value::Deleted,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_deleted()
    }
}

// Equality follows the ordering: two cells are equal when key and sequence match.
impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cell {}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.key, &other.key).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
