//! Merge Iterator
//!
//! Heap-based k-way merge over ascending cell streams.
//!
//! Sources are passed oldest first; a source's position in that list is its
//! recency rank. When two sources hold the same key, the higher rank wins
//! regardless of the sequence numbers stored in the cells, since a fresh
//! memtable may reuse sequence numbers already present in older segments.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;

use crate::cell::{compare_keys, Cell, Value};
use crate::error::Result;

/// One ascending, internally deduplicated stream of cells
pub type CellSource = Box<dyn Iterator<Item = Result<Cell>> + Send>;

struct HeapEntry {
    cell: Cell,
    rank: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: smallest key pops first, then highest rank.
        compare_keys(&other.cell.key, &self.cell.key)
            .then_with(|| self.rank.cmp(&other.rank))
            .then_with(|| self.cell.seq.cmp(&other.cell.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Merged, deduplicated cell stream. Tombstones are still present.
///
/// Yields strictly ascending keys. The first error from any source is
/// yielded once and ends the stream.
pub struct MergeIterator {
    sources: Vec<CellSource>,
    heap: BinaryHeap<HeapEntry>,
    last_key: Option<Bytes>,
    primed: bool,
    done: bool,
}

impl MergeIterator {
    /// Merge `sources`, ordered oldest (lowest rank) to newest.
    ///
    /// Nothing is pulled from the sources until the first call to `next`.
    pub fn new(sources: Vec<CellSource>) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            last_key: None,
            primed: false,
            done: false,
        }
    }

    /// Pull the next cell of source `rank` into the heap
    fn refill(&mut self, rank: usize) -> Result<()> {
        if let Some(next) = self.sources[rank].next() {
            self.heap.push(HeapEntry { cell: next?, rank });
        }
        Ok(())
    }

    fn prime(&mut self) -> Result<()> {
        self.primed = true;
        for rank in 0..self.sources.len() {
            self.refill(rank)?;
        }
        Ok(())
    }

    fn advance(&mut self) -> Result<Option<Cell>> {
        if !self.primed {
            self.prime()?;
        }
        while let Some(HeapEntry { cell, rank }) = self.heap.pop() {
            self.refill(rank)?;

            // Older copy of a key already yielded
            if self.last_key.as_deref() == Some(&cell.key[..]) {
                continue;
            }
            self.last_key = Some(cell.key.clone());
            return Ok(Some(cell));
        }
        Ok(None)
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(cell)) => Some(Ok(cell)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Live key/payload pairs: the merged view with tombstones dropped
pub struct ReadView {
    inner: MergeIterator,
}

impl ReadView {
    pub fn new(sources: Vec<CellSource>) -> Self {
        Self {
            inner: MergeIterator::new(sources),
        }
    }
}

impl Iterator for ReadView {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(Cell {
                    key,
                    value: Value::Present(payload),
                    ..
                }) => return Some(Ok((key, payload))),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Live cells for a full compaction.
///
/// A full compaction leaves no older data for a tombstone to shadow, so
/// tombstones are dropped rather than re-persisted.
pub struct CompactionView {
    inner: MergeIterator,
}

impl CompactionView {
    pub fn new(sources: Vec<CellSource>) -> Self {
        Self {
            inner: MergeIterator::new(sources),
        }
    }
}

impl Iterator for CompactionView {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(cell) if cell.is_tombstone() => continue,
                other => return Some(other),
            }
        }
    }
}
