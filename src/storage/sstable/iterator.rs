//! SSTable Iterator
//!
//! Lazy ascending scan over an SSTable's records.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;

use crate::cell::{Cell, Value};
use crate::error::Result;
use crate::LodeError;

use super::decode_record;

/// Iterator over SSTable cells in ascending key order
///
/// Owns a handle to the segment's mapping, so it stays valid after the
/// reader is dropped or the file is unlinked by compaction.
pub struct SSTableScan {
    mmap: Arc<Mmap>,
    offsets: Arc<[u64]>,
    /// Stop reading here (start of the offset index)
    end_offset: u64,
    /// Index of the next record to decode
    position: usize,
    path: PathBuf,
    failed: bool,
}

impl SSTableScan {
    pub(super) fn new(
        mmap: Arc<Mmap>,
        offsets: Arc<[u64]>,
        end_offset: u64,
        position: usize,
        path: PathBuf,
    ) -> Self {
        Self {
            mmap,
            offsets,
            end_offset,
            position,
            path,
            failed: false,
        }
    }
}

impl Iterator for SSTableScan {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let start = *self.offsets.get(self.position)?;
        let limit = self
            .offsets
            .get(self.position + 1)
            .copied()
            .unwrap_or(self.end_offset);
        self.position += 1;

        match decode_record(&self.mmap, start as usize, limit as usize) {
            Ok(record) => Some(Ok(Cell {
                key: Bytes::copy_from_slice(record.key),
                seq: record.seq,
                value: match record.value {
                    Some(value) => Value::Present(Bytes::copy_from_slice(value)),
                    None => Value::Deleted,
                },
            })),
            Err(reason) => {
                self.failed = true;
                Some(Err(LodeError::corruption(&self.path, reason)))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.offsets.len().saturating_sub(self.position);
        (0, Some(remaining))
    }
}
