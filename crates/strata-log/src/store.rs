//! Append-only store file of length-prefixed entries.
//!
//! # File Format
//!
//! ```text
//! ┌──────────────┬──────────────┬──────────────┬─────┐
//! │ len: u64 BE  │ payload      │ len: u64 BE  │ ... │
//! └──────────────┴──────────────┴──────────────┴─────┘
//! ```
//!
//! Entry start positions form a strictly increasing sequence; `size` is
//! both the total bytes written and the position the next entry will
//! begin at.
//!
//! Appends go through a buffered writer to keep syscall overhead down on
//! bursty traffic; every read flushes the buffer first so positional
//! reads always observe previously appended entries.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;

use crate::StorageError;

/// Width in bytes of the big-endian length prefix on every entry.
pub(crate) const LEN_WIDTH: u64 = 8;

/// Durable append-only byte storage with positional reads.
///
/// All operations serialize on an internal mutex; the store is shared
/// between the appending segment and concurrent log readers.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    inner: Mutex<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    /// Buffered writer over an append-mode handle.
    writer: BufWriter<File>,
    /// Separate read handle; seeking it never disturbs appends.
    reader: File,
    /// Total bytes written, advanced only when an append succeeds.
    size: u64,
}

impl Store {
    /// Opens or creates the store file at `path`.
    ///
    /// The in-memory size starts at the file length, which is how a
    /// segment's store picks up where it left off after a restart.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let write_handle = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = write_handle.metadata()?.len();
        let reader = OpenOptions::new().read(true).open(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(StoreInner {
                writer: BufWriter::new(write_handle),
                reader,
                size,
            }),
        })
    }

    /// Appends `payload` as one entry.
    ///
    /// Returns the total bytes written (length prefix included) and the
    /// byte position the entry starts at.
    pub fn append(&self, payload: &[u8]) -> Result<(u64, u64), StorageError> {
        let mut inner = self.lock();
        let position = inner.size;
        inner
            .writer
            .write_all(&(payload.len() as u64).to_be_bytes())?;
        inner.writer.write_all(payload)?;
        let written = LEN_WIDTH + payload.len() as u64;
        inner.size += written;
        Ok((written, position))
    }

    /// Reads the entry starting at `position`.
    pub fn read(&self, position: u64) -> Result<Bytes, StorageError> {
        let mut inner = self.lock();
        inner.writer.flush()?;
        if position + LEN_WIDTH > inner.size {
            return Err(self.out_of_bounds(position, inner.size));
        }
        let mut len_buf = [0u8; LEN_WIDTH as usize];
        inner.read_exact_at(&mut len_buf, position)?;
        let len = u64::from_be_bytes(len_buf);
        if position + LEN_WIDTH + len > inner.size {
            return Err(self.out_of_bounds(position, inner.size));
        }
        let mut payload = vec![0u8; len as usize];
        inner.read_exact_at(&mut payload, position + LEN_WIDTH)?;
        Ok(Bytes::from(payload))
    }

    /// Fills `buf` with bytes starting at `offset`.
    ///
    /// Used when the raw file content is needed, e.g. while reconciling
    /// the index with the store tail during recovery.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, StorageError> {
        let mut inner = self.lock();
        inner.writer.flush()?;
        inner.read_exact_at(buf, offset)?;
        Ok(buf.len())
    }

    /// Flushes buffered appends to the file.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.lock().writer.flush()?;
        Ok(())
    }

    /// Total bytes written; the position the next entry will begin at.
    pub fn size(&self) -> u64 {
        self.lock().size
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncates the file to `len` bytes.
    ///
    /// Only tail recovery calls this, to drop a half-written entry or to
    /// undo a store write whose index row could not be placed.
    pub(crate) fn set_len(&self, len: u64) -> Result<(), StorageError> {
        let mut inner = self.lock();
        inner.writer.flush()?;
        inner.writer.get_ref().set_len(len)?;
        inner.size = len;
        Ok(())
    }

    /// Flushes and syncs the file, consuming the store.
    pub fn close(self) -> Result<(), StorageError> {
        let mut inner = self.inner.into_inner().expect("store lock poisoned");
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("store lock poisoned")
    }

    fn out_of_bounds(&self, position: u64, size: u64) -> StorageError {
        StorageError::Corrupted {
            path: self.path.clone(),
            reason: format!("entry at position {position} extends past store size {size}"),
        }
    }
}

impl StoreInner {
    fn read_exact_at(&mut self, buf: &mut [u8], offset: u64) -> Result<(), StorageError> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(buf)?;
        Ok(())
    }
}
