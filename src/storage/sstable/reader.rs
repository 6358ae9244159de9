//! SSTable Reader
//!
//! Opens SSTable files, verifies them, and keeps every key in memory for
//! O(log n) seeks. Values stay on disk until a scan pulls them.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;

use crate::error::Result;
use crate::LodeError;

use super::iterator::SSTableScan;
use super::{decode_record, read_u32, read_u64, INDEX_ENTRY_SIZE, TRAILER_SIZE};

/// Reader for SSTable files with an in-memory key array
///
/// Immutable after `open`, so any number of threads may scan it at once.
pub struct SSTableReader {
    path: PathBuf,
    generation: u64,
    /// Read-only mapping of the whole file, shared with scans
    mmap: Arc<Mmap>,
    /// Record start offsets, parallel to `keys`
    offsets: Arc<[u64]>,
    keys: Vec<Bytes>,
    /// Record section ends here
    index_offset: u64,
    max_sequence: u64,
}

impl SSTableReader {
    /// Open an SSTable for reading
    ///
    /// Verifies the trailer checksum and the bounds of every record, and
    /// loads all keys into memory. Any inconsistency is a corruption error.
    pub fn open(path: &Path, generation: u64) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < TRAILER_SIZE {
            return Err(LodeError::corruption(
                path,
                format!("file is {} bytes, smaller than the trailer", file_size),
            ));
        }

        // SAFETY: segments are never written after their rename publishes
        // them, and the mapping is read-only. All slicing is bounds-checked.
        let mmap = unsafe { Mmap::map(&file)? };
        let len = mmap.len();
        let corrupt = |reason: String| LodeError::corruption(path, reason);

        // Trailer
        let trailer_start = len - TRAILER_SIZE as usize;
        let mut pos = trailer_start;
        let count = read_u32(&mmap, &mut pos, len).map_err(corrupt)? as usize;
        let index_offset = read_u64(&mmap, &mut pos, len).map_err(corrupt)?;
        let stored_crc = read_u32(&mmap, &mut pos, len).map_err(corrupt)?;

        let actual_crc = crc32fast::hash(&mmap[..len - 4]);
        if actual_crc != stored_crc {
            return Err(corrupt(format!(
                "checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, actual_crc
            )));
        }

        if index_offset > trailer_start as u64 {
            return Err(corrupt(format!(
                "index offset {} past trailer at {}",
                index_offset, trailer_start
            )));
        }
        let index_len = trailer_start as u64 - index_offset;
        if index_len != count as u64 * INDEX_ENTRY_SIZE {
            return Err(corrupt(format!(
                "index holds {} bytes, expected {} entries",
                index_len, count
            )));
        }

        // Offset index
        let mut offsets = Vec::with_capacity(count);
        let mut pos = index_offset as usize;
        for _ in 0..count {
            offsets.push(read_u64(&mmap, &mut pos, trailer_start).map_err(corrupt)?);
        }

        // Records must be contiguous: each one ends where the next begins
        let mut keys = Vec::with_capacity(count);
        let mut max_sequence = 0;
        let mut expected = 0u64;
        for (i, &offset) in offsets.iter().enumerate() {
            if offset != expected {
                return Err(corrupt(format!(
                    "record {} starts at {}, expected {}",
                    i, offset, expected
                )));
            }
            let record = decode_record(&mmap, offset as usize, index_offset as usize)
                .map_err(corrupt)?;
            if let Some(prev) = keys.last() {
                let prev: &Bytes = prev;
                if record.key <= &prev[..] {
                    return Err(corrupt(format!("record {} breaks key order", i)));
                }
            }
            keys.push(Bytes::copy_from_slice(record.key));
            max_sequence = max_sequence.max(record.seq);
            expected = record.end as u64;
        }
        if expected != index_offset {
            return Err(corrupt(format!(
                "record section ends at {}, index starts at {}",
                expected, index_offset
            )));
        }

        tracing::debug!(
            path = %path.display(),
            generation,
            records = count,
            bytes = file_size,
            "segment opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            generation,
            mmap: Arc::new(mmap),
            offsets: offsets.into(),
            keys,
            index_offset,
            max_sequence,
        })
    }

    /// Ascending scan over every cell with key >= `from`.
    ///
    /// An empty `from` scans the whole table. The start position is found by
    /// binary search; records are decoded as they are pulled.
    pub fn scan(&self, from: &[u8]) -> SSTableScan {
        let start = self.keys.partition_point(|key| &key[..] < from);
        SSTableScan::new(
            Arc::clone(&self.mmap),
            Arc::clone(&self.offsets),
            self.index_offset,
            start,
            self.path.clone(),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Generation this segment was published under
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.keys.len() as u64
    }

    /// Highest sequence number stored in this segment (0 if empty)
    pub fn max_sequence(&self) -> u64 {
        self.max_sequence
    }

    /// Get the minimum key in this SSTable
    pub fn min_key(&self) -> Option<&[u8]> {
        self.keys.first().map(|k| &k[..])
    }

    /// Get the maximum key in this SSTable
    pub fn max_key(&self) -> Option<&[u8]> {
        self.keys.last().map(|k| &k[..])
    }

    /// Quick check if a key might be in this SSTable (range check)
    /// Returns false only if the key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false, // Empty SSTable
        }
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("generation", &self.generation)
            .field("entries", &self.keys.len())
            .finish()
    }
}
