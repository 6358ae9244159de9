//! Iterator Module
//!
//! Merged views over the memtable and every segment.
//!
//! ## Views
//! - [`MergeIterator`]: k-way merge with deduplication, tombstones kept
//! - [`ReadView`]: live `(key, payload)` pairs, used by `get` and `range`
//! - [`CompactionView`]: live cells, used to write a compacted segment

mod merge;

pub use merge::{CellSource, CompactionView, MergeIterator, ReadView};
