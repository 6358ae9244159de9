//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Track an O(1) size estimate for flush triggers
//! - Ordered, restartable scans for flushes, compaction, and reads
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in RwLock:
//! - Ordered keys (required for segment generation)
//! - One entry per key; a newer upsert or remove replaces the older entry
//!
//! The engine never mutates a memtable once a flush has begun: it swaps in a
//! fresh table and leaves the old one to any reader still holding it.

mod table;

pub use table::{MemTable, MemTableScan, ENTRY_OVERHEAD};
