//! Storage Manager
//!
//! Manages the ordered set of segments and their on-disk lifecycle.
//!
//! ## Responsibilities
//! - Discover existing segments on startup
//! - Assign strictly increasing generation numbers
//! - Publish new segments from memtable flushes and compactions
//! - Retire superseded segments after a compaction

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cell::Cell;
use crate::error::{LodeError, Result};
use crate::iterator::{CellSource, CompactionView};
use crate::memtable::MemTable;

use super::{SSTable, SSTableBuilder, SSTableReader};

const SEGMENT_PREFIX: &str = "sstable_";
const SEGMENT_SUFFIX: &str = ".dat";
const TEMP_SUFFIX: &str = ".tmp";

/// Outcome of a full compaction
#[derive(Debug)]
pub struct CompactionReport {
    /// Generation of the segment that replaced all others
    pub generation: u64,
    /// Number of segments merged into it
    pub segments_merged: usize,
    /// Live records written
    pub records_written: u64,
    /// Superseded files that could not be deleted. Harmless: the new segment
    /// is already authoritative, and these are removed again by the next
    /// compaction once they are picked up at open.
    pub cleanup_failures: Vec<(PathBuf, io::Error)>,
}

/// Manages the storage layer
///
/// ## Concurrency:
/// - `sstables`: Protected by RwLock; readers clone the `Arc`s and scan
///   without holding the lock
/// - `next_generation`: Atomic counter
/// - Writing methods (`write_flush`, `write_compaction`) must be serialized
///   by the caller. Installing the result (`push`, `replace_all`) is split
///   out so the caller can do it under its own lock.
pub struct StorageManager {
    /// Directory where segments are stored
    data_dir: PathBuf,

    /// fsync the directory after each rename
    sync_dir: bool,

    /// Open segment readers, ordered oldest → newest
    sstables: RwLock<Vec<Arc<SSTableReader>>>,

    /// Next generation to assign
    next_generation: AtomicU64,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Discover segment files among the top-level entries
    /// 3. Remove temp files left behind by an interrupted write
    /// 4. Open readers for each segment, oldest first
    pub fn open(path: &Path, sync_dir: bool) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut generations: Vec<u64> = Vec::new();

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            match classify(name) {
                FileKind::Segment(generation) => generations.push(generation),
                FileKind::Temp => remove_stale_temp(&entry.path()),
                FileKind::Malformed => {
                    tracing::warn!(file = name, "ignoring segment-like file with unparsable generation");
                }
                FileKind::Other => {}
            }
        }

        generations.sort_unstable();

        let mut sstables = Vec::with_capacity(generations.len());
        for &generation in &generations {
            let reader = SSTableReader::open(&segment_path(path, generation), generation)?;
            sstables.push(Arc::new(reader));
        }

        // Next generation = max + 1, or 1 if no segments exist
        let next_generation = generations.last().map_or(1, |&g| g + 1);

        Ok(Self {
            data_dir: path.to_path_buf(),
            sync_dir,
            sstables: RwLock::new(sstables),
            next_generation: AtomicU64::new(next_generation),
        })
    }

    /// Current segments, oldest first
    pub fn snapshot(&self) -> Vec<Arc<SSTableReader>> {
        self.sstables.read().clone()
    }

    /// Scans from `from` over every segment, oldest first
    pub fn scans(&self, from: &[u8]) -> Vec<CellSource> {
        self.scans_where(from, |_| true)
    }

    /// Scans from `from` over the segments `keep` accepts, oldest first.
    ///
    /// Relative order is preserved, so recency rank still follows
    /// generation.
    pub fn scans_where<F>(&self, from: &[u8], keep: F) -> Vec<CellSource>
    where
        F: Fn(&SSTableReader) -> bool,
    {
        self.sstables
            .read()
            .iter()
            .filter(|reader| keep(reader))
            .map(|reader| Box::new(reader.scan(from)) as CellSource)
            .collect()
    }

    /// Write `cells` (ascending, unique keys) as a new segment at the next
    /// generation. The segment is published on disk but not yet part of the
    /// in-memory list. The generation counter only advances on success.
    pub fn write_segment<I>(&self, cells: I) -> Result<(SSTable, Arc<SSTableReader>)>
    where
        I: IntoIterator<Item = Result<Cell>>,
    {
        let generation = self.next_generation.load(Ordering::SeqCst);
        let path = segment_path(&self.data_dir, generation);

        let mut builder = SSTableBuilder::new(&path)?;
        let temp_path = builder.temp_path().to_path_buf();
        let written = cells
            .into_iter()
            .try_for_each(|cell| builder.add(&cell?))
            .and_then(|()| builder.finish());

        let metadata = match written {
            Ok(metadata) => metadata,
            Err(e) => {
                // Nothing was published; the temp file is only clutter
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
        };
        self.next_generation.store(generation + 1, Ordering::SeqCst);

        self.sync_data_dir()?;

        let reader = SSTableReader::open(&path, generation)?;
        Ok((metadata, Arc::new(reader)))
    }

    /// Write a MemTable out as a new segment without listing it.
    ///
    /// Returns `None` without touching the disk if the memtable is empty.
    /// Follow with [`push`](Self::push) to make it visible.
    pub fn write_flush(
        &self,
        memtable: &Arc<MemTable>,
    ) -> Result<Option<(SSTable, Arc<SSTableReader>)>> {
        if memtable.is_empty() {
            return Ok(None);
        }
        self.write_segment(memtable.scan(b"").map(Ok::<Cell, LodeError>))
            .map(Some)
    }

    /// Merge every listed segment and `memtable` into one new segment
    /// without listing it.
    ///
    /// Returns `None` if there is nothing to compact. Follow with
    /// [`replace_all`](Self::replace_all) and [`retire`](Self::retire).
    pub fn write_compaction(
        &self,
        memtable: &Arc<MemTable>,
    ) -> Result<Option<(SSTable, Arc<SSTableReader>)>> {
        if self.sstable_count() == 0 && memtable.is_empty() {
            return Ok(None);
        }

        let mut sources = self.scans(b"");
        sources.push(Box::new(memtable.scan(b"").map(Ok::<Cell, LodeError>)));

        self.write_segment(CompactionView::new(sources)).map(Some)
    }

    /// Append `reader` as the newest segment
    pub fn push(&self, reader: Arc<SSTableReader>) {
        self.sstables.write().push(reader);
    }

    /// Make `reader` the only segment, returning the ones it replaces
    pub fn replace_all(&self, reader: Arc<SSTableReader>) -> Vec<Arc<SSTableReader>> {
        std::mem::replace(&mut *self.sstables.write(), vec![reader])
    }

    /// Delete the files of segments superseded by the compaction that
    /// published `metadata` at `generation`.
    ///
    /// Deletion is best-effort: failures are logged and listed in the
    /// report, never returned as errors.
    pub fn retire(
        &self,
        generation: u64,
        metadata: &SSTable,
        superseded: Vec<Arc<SSTableReader>>,
    ) -> CompactionReport {
        let cleanup_failures = remove_files(&superseded);

        tracing::info!(
            generation,
            segments_merged = superseded.len(),
            records = metadata.entry_count,
            cleanup_failures = cleanup_failures.len(),
            "compaction finished"
        );

        CompactionReport {
            generation,
            segments_merged: superseded.len(),
            records_written: metadata.entry_count,
            cleanup_failures,
        }
    }

    fn sync_data_dir(&self) -> Result<()> {
        if !self.sync_dir {
            return Ok(());
        }
        // Directories cannot be opened as files on every platform
        match File::open(&self.data_dir) {
            Ok(dir) => dir.sync_all()?,
            Err(e) => tracing::warn!(
                path = %self.data_dir.display(),
                error = %e,
                "cannot open data directory for fsync; rename may not be durable"
            ),
        }
        Ok(())
    }

    /// Get the number of segments
    pub fn sstable_count(&self) -> usize {
        self.sstables.read().len()
    }

    /// Paths of the current segments, oldest first
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        self.sstables
            .read()
            .iter()
            .map(|reader| reader.path().to_path_buf())
            .collect()
    }

    /// Highest sequence number stored in any segment (0 if none)
    pub fn max_sequence(&self) -> u64 {
        self.sstables
            .read()
            .iter()
            .map(|reader| reader.max_sequence())
            .max()
            .unwrap_or(0)
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next generation number (for testing/debugging)
    pub fn next_generation(&self) -> u64 {
        self.next_generation.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

/// Generate segment path given a directory and generation
/// (1 → "sstable_000001.dat")
pub(crate) fn segment_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("{}{:06}{}", SEGMENT_PREFIX, generation, SEGMENT_SUFFIX))
}

#[derive(Debug, PartialEq)]
enum FileKind {
    Segment(u64),
    Temp,
    Malformed,
    Other,
}

/// Classify a directory entry by name
fn classify(name: &str) -> FileKind {
    let Some(rest) = name.strip_prefix(SEGMENT_PREFIX) else {
        return FileKind::Other;
    };
    if let Some(generation) = rest.strip_suffix(SEGMENT_SUFFIX) {
        if generation.is_empty() || !generation.bytes().all(|b| b.is_ascii_digit()) {
            return FileKind::Malformed;
        }
        return generation.parse().map_or(FileKind::Malformed, FileKind::Segment);
    }
    if rest.ends_with(TEMP_SUFFIX) {
        return FileKind::Temp;
    }
    FileKind::Other
}

fn remove_stale_temp(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale temp segment"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove stale temp segment"),
    }
}

/// Best-effort deletion of superseded segment files
fn remove_files(readers: &[Arc<SSTableReader>]) -> Vec<(PathBuf, io::Error)> {
    let mut failures = Vec::new();
    for reader in readers {
        let path = reader.path();
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete superseded segment");
            failures.push((path.to_path_buf(), e));
        }
    }
    failures
}
