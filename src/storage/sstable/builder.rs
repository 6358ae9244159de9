//! SSTable Builder
//!
//! Writes sorted cells to a temporary file, then publishes it with a single
//! atomic rename.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::cell::{Cell, Value};
use crate::error::Result;
use crate::LodeError;

use super::{SSTable, FLAG_LIVE, FLAG_TOMBSTONE, TEMP_EXTENSION};

/// Builder for creating new SSTables from sorted cells
pub struct SSTableBuilder {
    /// Final (published) file path
    path: PathBuf,
    /// Path written to until `finish` renames it
    temp_path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Current write position
    current_offset: u64,
    /// Start offset of every record written so far
    offsets: Vec<u64>,
    /// Track min/max keys for metadata
    min_key: Option<Bytes>,
    max_key: Option<Bytes>,
    max_sequence: u64,
    /// Running CRC over every byte written
    hasher: crc32fast::Hasher,
}

impl SSTableBuilder {
    /// Create a builder that will publish to `path`.
    ///
    /// Records go to `path` with a `.tmp` extension until `finish()`. A stale
    /// temp file from an earlier crash is truncated.
    pub fn new(path: &Path) -> Result<Self> {
        let temp_path = path.with_extension(TEMP_EXTENSION);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;

        Ok(Self {
            path: path.to_path_buf(),
            temp_path,
            writer: BufWriter::new(file),
            current_offset: 0,
            offsets: Vec::new(),
            min_key: None,
            max_key: None,
            max_sequence: 0,
            hasher: crc32fast::Hasher::new(),
        })
    }

    /// Path of the temporary file being written
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Number of records added so far
    pub fn entry_count(&self) -> usize {
        self.offsets.len()
    }

    /// Append a cell. Keys must arrive strictly ascending.
    pub fn add(&mut self, cell: &Cell) -> Result<()> {
        if let Some(last) = &self.max_key {
            if cell.key <= *last {
                return Err(LodeError::Storage(format!(
                    "keys must be strictly ascending: {:?} after {:?}",
                    cell.key, last
                )));
            }
        }
        if self.offsets.len() >= u32::MAX as usize {
            return Err(LodeError::Storage("segment record count exceeds u32".to_string()));
        }
        let key_len = len_u32(cell.key.len(), "key")?;

        self.offsets.push(self.current_offset);

        self.write_bytes(&key_len.to_le_bytes())?;
        self.write_bytes(&cell.key)?;
        match &cell.value {
            Value::Present(payload) => {
                let value_len = len_u32(payload.len(), "value")?;
                self.write_bytes(&[FLAG_LIVE])?;
                self.write_bytes(&cell.seq.to_le_bytes())?;
                self.write_bytes(&value_len.to_le_bytes())?;
                self.write_bytes(payload)?;
            }
            Value::Deleted => {
                self.write_bytes(&[FLAG_TOMBSTONE])?;
                self.write_bytes(&cell.seq.to_le_bytes())?;
            }
        }

        if self.min_key.is_none() {
            self.min_key = Some(cell.key.clone());
        }
        self.max_key = Some(cell.key.clone());
        self.max_sequence = self.max_sequence.max(cell.seq);

        Ok(())
    }

    /// Write, checksum, and advance the offset
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.hasher.update(bytes);
        self.current_offset += bytes.len() as u64;
        Ok(())
    }

    /// Finish building: write the offset index and trailer, sync, and rename
    /// the temp file to its final name.
    pub fn finish(mut self) -> Result<SSTable> {
        let index_offset = self.current_offset;
        let offsets = std::mem::take(&mut self.offsets);
        for offset in &offsets {
            self.write_bytes(&offset.to_le_bytes())?;
        }

        // Trailer: count and index offset are covered by the checksum
        let count = offsets.len() as u32;
        self.write_bytes(&count.to_le_bytes())?;
        self.write_bytes(&index_offset.to_le_bytes())?;
        let crc = self.hasher.clone().finalize();
        self.writer.write_all(&crc.to_le_bytes())?;

        self.writer.flush()?;
        let file = self.writer.into_inner().map_err(|e| {
            LodeError::Storage(format!("Failed to flush SSTable: {}", e))
        })?;
        file.sync_all()?;
        let file_size = file.metadata()?.len();
        drop(file);

        // Publication point
        fs::rename(&self.temp_path, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            records = count,
            bytes = file_size,
            "segment written"
        );

        Ok(SSTable {
            path: self.path,
            entry_count: offsets.len() as u64,
            min_key: self.min_key.unwrap_or_default(),
            max_key: self.max_key.unwrap_or_default(),
            max_sequence: self.max_sequence,
            file_size,
        })
    }
}

fn len_u32(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        LodeError::Storage(format!("{} length {} exceeds u32", what, len))
    })
}
