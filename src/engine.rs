//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Route writes to the active MemTable
//! - Serve reads from a merged view of MemTable and segments
//! - Trigger flushes when the MemTable reaches its threshold
//! - Run full compactions
//! - Rebuild state from the data directory on startup

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::cell::Cell;
use crate::config::Config;
use crate::error::{LodeError, Result};
use crate::iterator::ReadView;
use crate::memtable::MemTable;
use crate::storage::{CompactionReport, SSTableReader, StorageManager};

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (upsert/remove/flush/compact/close): serialized by
///   `write_lock`. An automatic flush runs on the writing thread before the
///   write returns.
///
/// - **Reads** (get/range): never take `write_lock`. A read holds the
///   `memtable` read guard while it clones the current MemTable `Arc` and
///   the segment list, then merges them without further locking.
///
/// - A flush or compaction writes its segment without blocking readers,
///   then takes the `memtable` write guard to list the segment and swap in
///   a fresh MemTable in one step. Readers therefore see either the old
///   MemTable with the old segments or the new MemTable with the new ones.
///   The old MemTable is never mutated again and stays with in-flight
///   readers.
///
/// - Lock order is `memtable`, then the storage manager's segment list.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Active in-memory table, replaced wholesale on flush
    memtable: RwLock<Arc<MemTable>>,

    /// Persistent storage manager (internal RwLock on the segment list)
    storage: StorageManager,

    /// Next write sequence number
    sequence: AtomicU64,

    /// Serializes write operations
    write_lock: Mutex<()>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate the config
    /// 2. Scan the data directory and load every segment
    /// 3. Resume sequence numbers past the highest one on disk
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = StorageManager::open(&config.data_dir, config.sync_dir_on_publish)?;
        let sequence = storage.max_sequence() + 1;

        tracing::info!(
            data_dir = %config.data_dir.display(),
            segments = storage.sstable_count(),
            next_generation = storage.next_generation(),
            flush_threshold = config.flush_threshold,
            "engine opened"
        );

        Ok(Self {
            config,
            memtable: RwLock::new(Arc::new(MemTable::new())),
            storage,
            sequence: AtomicU64::new(sequence),
            write_lock: Mutex::new(()),
        })
    }

    /// Open with a path and flush threshold (convenience method)
    pub fn open_path(path: &Path, flush_threshold: i64) -> Result<Self> {
        let config = Config::builder()
            .data_dir(path)
            .flush_threshold(flush_threshold)
            .build();
        Self::open(config)
    }

    /// Get a value by key
    ///
    /// A one-element range scan starting at `key`, over the MemTable and
    /// only those segments whose key range covers `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        tracing::trace!(key_len = key.len(), "engine get");
        let mut view = self.read_view(key, |reader| reader.might_contain(key));
        match view.next() {
            Some(Ok((found, payload))) if found == key => Ok(Some(payload)),
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        }
    }

    /// Live key/value pairs with key >= `from`, ascending.
    ///
    /// The iterator is lazy and owns everything it reads, so it stays valid
    /// across later writes, flushes, and compactions.
    pub fn range(&self, from: &[u8]) -> Result<Range> {
        Ok(Range {
            inner: self.read_view(from, |_| true),
        })
    }

    /// Capture the MemTable and the segments `keep` accepts as one
    /// consistent set of sources.
    fn read_view<F>(&self, from: &[u8], keep: F) -> ReadView
    where
        F: Fn(&SSTableReader) -> bool,
    {
        let active = self.memtable.read();
        let mut sources = self.storage.scans_where(from, keep);
        let memtable: &Arc<MemTable> = &active;
        sources.push(Box::new(memtable.scan(from).map(Ok::<Cell, LodeError>)));
        drop(active);

        ReadView::new(sources)
    }

    /// Insert or overwrite a key
    pub fn upsert(&self, key: &[u8], payload: &[u8]) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        tracing::trace!(key_len = key.len(), value_len = payload.len(), "engine upsert");

        let seq = self.next_sequence();
        let new_size = self.memtable.read().upsert(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(payload),
            seq,
        );
        self.maybe_flush(new_size)
    }

    /// Delete a key (writes a tombstone)
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        tracing::trace!(key_len = key.len(), "engine remove");

        let seq = self.next_sequence();
        let new_size = self.memtable.read().remove(Bytes::copy_from_slice(key), seq);
        self.maybe_flush(new_size)
    }

    /// Flush memtable to disk (public API)
    ///
    /// Forces a flush regardless of memtable size. No-op when empty.
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.flush_internal()
    }

    /// Merge the memtable and every segment into one new segment and delete
    /// the old ones.
    ///
    /// Returns `None` if there was nothing to compact. Old files that could
    /// not be deleted are listed in the report; they do not fail the call.
    pub fn compact(&self) -> Result<Option<CompactionReport>> {
        let _write_guard = self.write_lock.lock();

        let memtable = Arc::clone(&self.memtable.read());
        let Some((metadata, reader)) = self.storage.write_compaction(&memtable)? else {
            return Ok(None);
        };
        let generation = reader.generation();

        let superseded = {
            let mut active = self.memtable.write();
            let superseded = self.storage.replace_all(reader);
            *active = Arc::new(MemTable::new());
            superseded
        };

        // Old files go only after the new segment is listed
        Ok(Some(self.storage.retire(generation, &metadata, superseded)))
    }

    /// Close the engine gracefully
    ///
    /// Flushes any pending writes. Segment mappings are released on drop.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        tracing::info!(data_dir = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Called with write lock held
    fn maybe_flush(&self, memtable_size: usize) -> Result<()> {
        if memtable_size >= self.config.flush_threshold_bytes() {
            self.flush_internal()?;
        }
        Ok(())
    }

    /// Internal flush implementation (called with write lock held)
    fn flush_internal(&self) -> Result<()> {
        let memtable = Arc::clone(&self.memtable.read());

        let Some((metadata, reader)) = self.storage.write_flush(&memtable)? else {
            return Ok(());
        };
        let generation = reader.generation();

        {
            let mut active = self.memtable.write();
            self.storage.push(reader);
            *active = Arc::new(MemTable::new());
        }

        tracing::info!(
            generation,
            records = metadata.entry_count,
            bytes = metadata.file_size,
            "memtable flushed"
        );
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the current memtable size estimate
    pub fn memtable_size(&self) -> usize {
        self.memtable.read().size_in_bytes()
    }

    /// Get the memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.read().entry_count()
    }

    /// Get the number of segments
    pub fn sstable_count(&self) -> usize {
        self.storage.sstable_count()
    }

    /// Paths of the live segments, oldest first
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        self.storage.segment_paths()
    }

    /// Generation the next flush or compaction will use
    pub fn next_generation(&self) -> u64 {
        self.storage.next_generation()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Lazy ascending iterator over live key/value pairs
///
/// Returned by [`Engine::range`]. Yields each key at most once, with the
/// value from its most recent write. An I/O or corruption error is yielded
/// once and ends the iteration.
pub struct Range {
    inner: ReadView,
}

impl Iterator for Range {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
