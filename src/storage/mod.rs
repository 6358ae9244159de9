//! Storage Module
//!
//! Persistent storage layer built from immutable sorted segments.
//!
//! ## Responsibilities
//! - Persist memtable contents to disk in sorted order
//! - Binary-searchable range scans over each segment
//! - Full compaction into a single segment
//! - Crash-safe publication (temp file + fsync + atomic rename)
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── sstable_000001.dat    oldest
//!   ├── sstable_000002.dat
//!   ├── sstable_000003.dat    newest
//!   └── sstable_000004.tmp    write in progress (removed on open)
//! ```
//! See [`sstable`] for the file format.

pub mod sstable;
mod manager;

pub use manager::{CompactionReport, StorageManager};
pub use sstable::{SSTable, SSTableBuilder, SSTableReader, SSTableScan};
