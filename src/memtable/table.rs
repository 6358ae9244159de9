//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::cell::{Cell, Value};

/// Fixed per-entry overhead added to the size estimate
/// (sequence number plus record framing)
pub const ENTRY_OVERHEAD: usize = 16;

/// Cells copied out of the table per lock acquisition during a scan
const SCAN_BATCH: usize = 256;

/// In-memory table for recent writes
pub struct MemTable {
    /// key → (sequence, value)
    data: RwLock<BTreeMap<Bytes, (u64, Value)>>,
    /// Approximate size of the current contents in bytes
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Insert or overwrite `key` with a live payload.
    ///
    /// Returns the new size estimate.
    pub fn upsert(&self, key: Bytes, payload: Bytes, seq: u64) -> usize {
        self.insert(key, seq, Value::Present(payload))
    }

    /// Record a tombstone for `key`.
    ///
    /// Tombstones count toward the size estimate until compaction drops them.
    /// Returns the new size estimate.
    pub fn remove(&self, key: Bytes, seq: u64) -> usize {
        self.insert(key, seq, Value::Deleted)
    }

    fn insert(&self, key: Bytes, seq: u64, value: Value) -> usize {
        let added = entry_size(&key, &value);
        let mut data = self.data.write();
        let replaced = data
            .insert(key.clone(), (seq, value))
            .map_or(0, |(_, old)| entry_size(&key, &old));

        // Updated under the map's write lock, so the subtraction never underflows.
        let size = self.size.load(Ordering::Acquire) - replaced + added;
        self.size.store(size, Ordering::Release);
        size
    }

    /// Look up the entry for `key`, tombstones included
    pub fn get(&self, key: &[u8]) -> Option<Cell> {
        let data = self.data.read();
        data.get_key_value(key).map(|(k, (seq, value))| Cell {
            key: k.clone(),
            seq: *seq,
            value: value.clone(),
        })
    }

    /// Approximate size in bytes. O(1).
    pub fn size_in_bytes(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Number of entries, tombstones included
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Ascending scan over every cell with key >= `from`.
    ///
    /// Nothing is read until the first pull. Calling `scan` again restarts
    /// from `from`.
    pub fn scan(self: &Arc<Self>, from: &[u8]) -> MemTableScan {
        MemTableScan {
            table: Arc::clone(self),
            lower: Bound::Included(Bytes::copy_from_slice(from)),
            batch: Vec::new().into_iter(),
            exhausted: false,
        }
    }

    /// Copy up to `limit` cells starting at `lower`
    fn collect_batch(&self, lower: Bound<&[u8]>, limit: usize) -> Vec<Cell> {
        let data = self.data.read();
        data.range::<[u8], _>((lower, Bound::Unbounded))
            .take(limit)
            .map(|(key, (seq, value))| Cell {
                key: key.clone(),
                seq: *seq,
                value: value.clone(),
            })
            .collect()
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_size(key: &[u8], value: &Value) -> usize {
    key.len() + value.payload_len() + ENTRY_OVERHEAD
}

/// Lazy ascending scan over a MemTable.
///
/// Cells are copied out in batches. Each batch resumes strictly after the
/// last key returned, so the output stays ordered and duplicate-free even
/// if the table is written to between batches.
pub struct MemTableScan {
    table: Arc<MemTable>,
    lower: Bound<Bytes>,
    batch: std::vec::IntoIter<Cell>,
    exhausted: bool,
}

impl Iterator for MemTableScan {
    type Item = Cell;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(cell) = self.batch.next() {
            self.lower = Bound::Excluded(cell.key.clone());
            return Some(cell);
        }
        if self.exhausted {
            return None;
        }

        let lower = match &self.lower {
            Bound::Included(k) => Bound::Included(k.as_ref()),
            Bound::Excluded(k) => Bound::Excluded(k.as_ref()),
            Bound::Unbounded => Bound::Unbounded,
        };
        let batch = self.table.collect_batch(lower, SCAN_BATCH);
        if batch.len() < SCAN_BATCH {
            self.exhausted = true;
        }
        self.batch = batch.into_iter();

        let cell = self.batch.next()?;
        self.lower = Bound::Excluded(cell.key.clone());
        Some(cell)
    }
}
