//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted key-value storage.
//!
//! ## File Format
//! All integers little-endian.
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Record Section (variable)                                    │
//! │   [KeyLen: u32][Key][Tombstone: u8][Seq: u64]                │
//! │   [ValLen: u32][Value]        <- only when Tombstone == 0    │
//! │   ... repeated for each record, keys strictly ascending ...  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Offset Index (Count * 8 bytes)                               │
//! │   [RecordOffset: u64] ... one per record, same order         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Trailer (16 bytes)                                           │
//! │   Count: u32 (4) | IndexOffset: u64 (8) | CRC32: u32 (4)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//! The CRC covers every byte before it.

mod builder;
mod iterator;
mod reader;

use std::path::PathBuf;

use bytes::Bytes;

pub use builder::SSTableBuilder;
pub use iterator::SSTableScan;
pub use reader::SSTableReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Trailer size: Count (4) + IndexOffset (8) + CRC32 (4) = 16 bytes
pub(crate) const TRAILER_SIZE: u64 = 16;

/// Size of one offset index entry
pub(crate) const INDEX_ENTRY_SIZE: u64 = 8;

/// Tombstone flag values
pub(crate) const FLAG_LIVE: u8 = 0;
pub(crate) const FLAG_TOMBSTONE: u8 = 1;

/// Extension used while a segment is being written
pub(crate) const TEMP_EXTENSION: &str = "tmp";

// =============================================================================
// SSTable Metadata
// =============================================================================

/// Metadata describing a freshly written SSTable
#[derive(Debug, Clone)]
pub struct SSTable {
    /// Path to the published SSTable file
    pub path: PathBuf,
    /// Number of records in this SSTable
    pub entry_count: u64,
    /// Smallest key (empty for an empty table)
    pub min_key: Bytes,
    /// Largest key (empty for an empty table)
    pub max_key: Bytes,
    /// Highest sequence number stored
    pub max_sequence: u64,
    /// File size in bytes
    pub file_size: u64,
}

impl SSTable {
    /// Get the number of entries
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Quick check if a key might be in this SSTable (range check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.entry_count > 0 && key >= &self.min_key[..] && key <= &self.max_key[..]
    }
}

// =============================================================================
// Record Decoding
// =============================================================================

/// A record borrowed out of a segment's bytes
pub(crate) struct RawRecord<'a> {
    pub key: &'a [u8],
    pub seq: u64,
    /// `None` for a tombstone
    pub value: Option<&'a [u8]>,
    /// Offset one past the record's last byte
    pub end: usize,
}

/// Decode the record starting at `start`, never reading at or past `limit`.
pub(crate) fn decode_record(buf: &[u8], start: usize, limit: usize) -> Result<RawRecord<'_>, String> {
    let limit = limit.min(buf.len());
    let mut pos = start;

    let key_len = read_u32(buf, &mut pos, limit)? as usize;
    let key = read_slice(buf, &mut pos, limit, key_len)?;
    let flag = read_slice(buf, &mut pos, limit, 1)?[0];
    let seq = read_u64(buf, &mut pos, limit)?;

    let value = match flag {
        FLAG_TOMBSTONE => None,
        FLAG_LIVE => {
            let value_len = read_u32(buf, &mut pos, limit)? as usize;
            Some(read_slice(buf, &mut pos, limit, value_len)?)
        }
        other => return Err(format!("invalid tombstone flag {} at offset {}", other, start)),
    };

    Ok(RawRecord {
        key,
        seq,
        value,
        end: pos,
    })
}

fn read_slice<'a>(buf: &'a [u8], pos: &mut usize, limit: usize, len: usize) -> Result<&'a [u8], String> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= limit)
        .ok_or_else(|| format!("record at offset {} runs past its bounds", pos))?;
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}

pub(crate) fn read_u32(buf: &[u8], pos: &mut usize, limit: usize) -> Result<u32, String> {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(read_slice(buf, pos, limit, 4)?);
    Ok(u32::from_le_bytes(raw))
}

pub(crate) fn read_u64(buf: &[u8], pos: &mut usize, limit: usize) -> Result<u64, String> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(read_slice(buf, pos, limit, 8)?);
    Ok(u64::from_le_bytes(raw))
}
