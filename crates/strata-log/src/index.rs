//! Memory-mapped offset index for O(1) record lookups.
//!
//! The index maps a record's offset *relative to its segment's base* to
//! the byte position of the record's entry in the paired store file.
//!
//! # File Format
//!
//! ```text
//! ┌──────────────────────┬──────────────────┐
//! │ relative off: u32 BE │ position: u64 BE │  <- one 12-byte row per record
//! └──────────────────────┴──────────────────┘
//! ```
//!
//! Rows are dense: the Nth row (zero-based) holds the record with
//! relative offset N. The offset column is stored anyway so a sparse
//! variant stays possible and inconsistencies show up during recovery.
//!
//! # Sizing
//!
//! Mappings cannot extend past end-of-file on most systems, so the file
//! is grown to its configured maximum before mapping and truncated back
//! to the logical tail on close. The logical size is recovered from the
//! file length on reopen; that length is only authoritative after a
//! clean close, which is why segment load reconciles the index against
//! the store tail afterwards.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::StorageError;

/// Width in bytes of one index row.
pub(crate) const ENTRY_WIDTH: u64 = 12;

/// Width in bytes of the relative-offset column.
const OFF_WIDTH: usize = 4;

/// Fixed-width, memory-mapped table of `relative offset → store position`
/// rows.
///
/// Writes go through the mapping in place; durability is only guaranteed
/// after [`Index::close`] or an explicit flush of the map.
#[derive(Debug)]
pub struct Index {
    file: File,
    mmap: MmapMut,
    path: PathBuf,
    /// Logical bytes in use (valid rows × 12); the mapped file is
    /// pre-sized to the configured maximum and usually larger.
    size: u64,
}

impl Index {
    /// Opens or creates the index at `path`, growing the file to
    /// `max_bytes` so rows can be appended through the mapping.
    ///
    /// The logical size is taken from the file length as found on disk,
    /// rounded down to a whole row; a torn trailing row from a crash is
    /// dropped here and re-created from the store during segment load.
    // Creating the map is the one operation this crate needs `unsafe`
    // for; the file handle is held alongside the map for its lifetime.
    #[allow(unsafe_code)]
    pub fn open(path: impl AsRef<Path>, max_bytes: u64) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let found = file.metadata()?.len();
        if found > max_bytes {
            return Err(StorageError::InvalidConfig(format!(
                "max_index_bytes ({max_bytes}) is smaller than the existing index {} ({found} bytes)",
                path.display()
            )));
        }
        file.set_len(max_bytes)?;
        // SAFETY: the mapping is backed by `file`, which stays open (and
        // its length unchanged) until `close` drops the map first.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let mut index = Self {
            file,
            mmap,
            path,
            size: found / ENTRY_WIDTH * ENTRY_WIDTH,
        };
        index.size = index.valid_prefix();
        Ok(index)
    }

    /// Length in bytes of the leading run of rows whose stored relative
    /// offset matches their row index.
    ///
    /// Rows are dense, so the two always agree for rows that were
    /// actually written. After a crash the file is still pre-sized to
    /// its maximum and the tail beyond the last real row reads as
    /// zeroes; the mismatch is where the real rows end.
    fn valid_prefix(&self) -> u64 {
        let mut valid = 0;
        while valid + ENTRY_WIDTH <= self.size {
            let at = valid as usize;
            let relative_offset = u32::from_be_bytes(
                self.mmap[at..at + OFF_WIDTH]
                    .try_into()
                    .expect("slice is exactly 4 bytes"),
            );
            if u64::from(relative_offset) != valid / ENTRY_WIDTH {
                break;
            }
            valid += ENTRY_WIDTH;
        }
        valid
    }

    /// Appends a row.
    pub fn write(&mut self, relative_offset: u32, position: u64) -> Result<(), StorageError> {
        if self.size + ENTRY_WIDTH > self.mmap.len() as u64 {
            return Err(StorageError::IndexFull);
        }
        let at = self.size as usize;
        self.mmap[at..at + OFF_WIDTH].copy_from_slice(&relative_offset.to_be_bytes());
        self.mmap[at + OFF_WIDTH..at + ENTRY_WIDTH as usize]
            .copy_from_slice(&position.to_be_bytes());
        self.size += ENTRY_WIDTH;
        Ok(())
    }

    /// Reads the row addressed by `input` and returns
    /// `(relative_offset, position)`.
    ///
    /// `-1` addresses the last row; any other value is a zero-based row
    /// index. Reading past the logical tail (or an empty index) reports
    /// [`StorageError::EndOfEntries`].
    pub fn read(&self, input: i64) -> Result<(u32, u64), StorageError> {
        if self.size == 0 {
            return Err(StorageError::EndOfEntries);
        }
        let rows = self.size / ENTRY_WIDTH;
        let row = if input == -1 {
            rows - 1
        } else {
            u64::try_from(input).map_err(|_| StorageError::EndOfEntries)?
        };
        if row >= rows {
            return Err(StorageError::EndOfEntries);
        }
        let at = (row * ENTRY_WIDTH) as usize;
        let relative_offset = u32::from_be_bytes(
            self.mmap[at..at + OFF_WIDTH]
                .try_into()
                .expect("slice is exactly 4 bytes"),
        );
        let position = u64::from_be_bytes(
            self.mmap[at + OFF_WIDTH..at + ENTRY_WIDTH as usize]
                .try_into()
                .expect("slice is exactly 8 bytes"),
        );
        Ok((relative_offset, position))
    }

    /// Logical bytes in use.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the index holds no rows.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Path of the backing file.
    pub fn name(&self) -> &Path {
        &self.path
    }

    /// Shrinks the logical size to the first `rows` rows.
    ///
    /// Segment recovery backs the index off to the entries actually
    /// present in the store.
    pub(crate) fn truncate_to_rows(&mut self, rows: u64) {
        debug_assert!(
            rows * ENTRY_WIDTH <= self.size,
            "cannot grow the index by truncating"
        );
        self.size = rows * ENTRY_WIDTH;
    }

    /// Flushes the mapping, truncates the file to the logical tail and
    /// syncs it, consuming the index.
    ///
    /// The truncation is what makes the logical size recoverable from
    /// the file length on reopen; the map must be gone before the file
    /// shrinks.
    pub fn close(self) -> Result<(), StorageError> {
        let Self {
            file,
            mmap,
            path: _,
            size,
        } = self;
        mmap.flush()?;
        drop(mmap);
        file.set_len(size)?;
        file.sync_all()?;
        Ok(())
    }
}
