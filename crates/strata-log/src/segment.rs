//! A segment pairs one store file with one index file and covers a
//! contiguous range of absolute offsets starting at its base offset.
//!
//! The segment translates between absolute and relative offsets, enforces
//! the configured size limits, and reconciles the two files on open after
//! an unclean shutdown.

use std::fs;
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::StorageError;
use crate::config::{Config, SegmentConfig};
use crate::index::{ENTRY_WIDTH, Index};
use crate::store::{LEN_WIDTH, Store};

/// One store/index pair; `[base_offset, next_offset)` is the range of
/// absolute offsets it holds.
#[derive(Debug)]
pub struct Segment {
    store: Store,
    index: Index,
    base_offset: u64,
    next_offset: u64,
    config: SegmentConfig,
}

impl Segment {
    /// Opens or creates the segment with the given base offset inside
    /// `dir`.
    ///
    /// `{base_offset}.store` and `{base_offset}.index` are created if
    /// absent. The two files are reconciled with each other and the next
    /// offset derived from the surviving index rows (see
    /// [`Segment::recover_tail`]).
    pub fn open(
        dir: impl AsRef<Path>,
        base_offset: u64,
        config: &Config,
    ) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        let store = Store::open(dir.join(format!("{base_offset}.store")))?;
        let index = Index::open(
            dir.join(format!("{base_offset}.index")),
            config.segment.max_index_bytes,
        )?;

        let mut segment = Self {
            store,
            index,
            base_offset,
            next_offset: base_offset,
            config: config.segment,
        };
        segment.recover_tail()?;

        debug!(
            base_offset,
            next_offset = segment.next_offset,
            store_bytes = segment.store.size(),
            "opened segment"
        );
        Ok(segment)
    }

    /// Appends `payload` and returns the absolute offset it was assigned.
    ///
    /// Reports [`StorageError::SegmentFull`] when either size limit has
    /// been reached; the log rolls to a fresh segment and retries there.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64, StorageError> {
        if self.is_maxed() {
            return Err(StorageError::SegmentFull {
                base_offset: self.base_offset,
            });
        }
        let offset = self.next_offset;
        let (_, position) = self.store.append(payload)?;
        match self.index.write((offset - self.base_offset) as u32, position) {
            Ok(()) => {}
            Err(StorageError::IndexFull) => {
                // Undo the store write so a reopened segment cannot
                // re-index an entry that was never acknowledged.
                self.store.set_len(position)?;
                return Err(StorageError::SegmentFull {
                    base_offset: self.base_offset,
                });
            }
            Err(e) => return Err(e),
        }
        self.next_offset += 1;
        Ok(offset)
    }

    /// Reads the record at the absolute offset.
    pub fn read(&self, offset: u64) -> Result<Bytes, StorageError> {
        if offset < self.base_offset || offset >= self.next_offset {
            return Err(StorageError::OffsetOutOfRange { offset });
        }
        let (_, position) = self.index.read((offset - self.base_offset) as i64)?;
        self.store.read(position)
    }

    /// Whether either file has reached its configured limit.
    pub fn is_maxed(&self) -> bool {
        self.store.size() >= self.config.max_store_bytes
            || self.index.size() >= self.config.max_index_bytes
    }

    /// Whether one more entry of `payload_len` bytes fits under the
    /// store limit.
    pub(crate) fn has_room_for(&self, payload_len: usize) -> bool {
        self.store.size() + LEN_WIDTH + payload_len as u64 <= self.config.max_store_bytes
    }

    /// Absolute offset of the segment's first record.
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Absolute offset the next append will receive.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub(crate) fn flush_store(&self) -> Result<(), StorageError> {
        self.store.flush()
    }

    pub(crate) fn store_path(&self) -> &Path {
        self.store.path()
    }

    pub(crate) fn store_size(&self) -> u64 {
        self.store.size()
    }

    /// Closes the index, then the store.
    pub fn close(self) -> Result<(), StorageError> {
        self.index.close()?;
        self.store.close()
    }

    /// Closes the segment and deletes both of its files.
    pub fn remove(self) -> Result<(), StorageError> {
        let store_path = self.store.path().to_path_buf();
        let index_path = self.index.name().to_path_buf();
        self.close()?;
        fs::remove_file(index_path)?;
        fs::remove_file(store_path)?;
        Ok(())
    }

    /// Reconciles the index with the store after an unclean shutdown,
    /// and derives `next_offset`.
    ///
    /// Store appends are buffered while index rows land in the page
    /// cache right away, so a crash can leave either file ahead of the
    /// other. An entry counts as durable only when it is fully present
    /// in the store:
    ///
    /// 1. Index rows whose entry is missing or incomplete in the store
    ///    are dropped.
    /// 2. Complete store entries past the last surviving row are
    ///    re-indexed.
    /// 3. A half-written trailing entry (or one the index has no room
    ///    left for) is truncated off the store.
    fn recover_tail(&mut self) -> Result<(), StorageError> {
        let store_size = self.store.size();

        let indexed_rows = self.index.size() / ENTRY_WIDTH;
        let mut rows = indexed_rows;
        let mut position = 0;
        while rows > 0 {
            let (_, last_position) = self.index.read((rows - 1) as i64)?;
            if let Some(end) = self.entry_end(last_position, store_size)? {
                position = end;
                break;
            }
            rows -= 1;
        }
        if rows < indexed_rows {
            warn!(
                base_offset = self.base_offset,
                dropped = indexed_rows - rows,
                "dropping index rows not backed by the store"
            );
            self.index.truncate_to_rows(rows);
        }
        self.next_offset = self.base_offset + rows;

        let recover_from = position;
        while position < store_size {
            let Some(end) = self.entry_end(position, store_size)? else {
                break; // torn length prefix or payload
            };
            let relative_offset = (self.next_offset - self.base_offset) as u32;
            match self.index.write(relative_offset, position) {
                Ok(()) => {}
                Err(StorageError::IndexFull) => break, // unaddressable remainder
                Err(e) => return Err(e),
            }
            self.next_offset += 1;
            position = end;
        }
        if position > recover_from {
            warn!(
                base_offset = self.base_offset,
                recovered = self.next_offset - self.base_offset,
                "re-indexed store entries missing from the index"
            );
        }

        if position < store_size {
            warn!(
                base_offset = self.base_offset,
                keep = position,
                dropped = store_size - position,
                "truncating store tail that cannot be recovered"
            );
            self.store.set_len(position)?;
        }
        Ok(())
    }

    /// Where the entry starting at `position` ends, or `None` if it is
    /// not fully contained in the first `store_size` bytes.
    fn entry_end(&self, position: u64, store_size: u64) -> Result<Option<u64>, StorageError> {
        // checked arithmetic: position and length may be garbage rescued
        // from a crashed index row
        let Some(payload_start) = position.checked_add(LEN_WIDTH) else {
            return Ok(None);
        };
        if payload_start > store_size {
            return Ok(None);
        }
        let mut len_buf = [0u8; LEN_WIDTH as usize];
        self.store.read_at(&mut len_buf, position)?;
        let end = payload_start.checked_add(u64::from_be_bytes(len_buf));
        Ok(end.filter(|end| *end <= store_size))
    }
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    fn test_config(max_store_bytes: u64, max_index_bytes: u64) -> Config {
        let mut config = Config::default();
        config.segment.max_store_bytes = max_store_bytes;
        config.segment.max_index_bytes = max_index_bytes;
        config
    }

    #[test]
    fn append_read_with_nonzero_base() {
        let dir = TempDir::new().unwrap();
        let config = test_config(1024, 1024 * 12);
        let mut segment = Segment::open(dir.path(), 16, &config).unwrap();

        assert_eq!(segment.append(b"first").unwrap(), 16);
        assert_eq!(segment.append(b"second").unwrap(), 17);
        assert_eq!(segment.next_offset(), 18);

        assert_eq!(segment.read(16).unwrap().as_ref(), b"first");
        assert_eq!(segment.read(17).unwrap().as_ref(), b"second");

        assert!(matches!(
            segment.read(15),
            Err(StorageError::OffsetOutOfRange { offset: 15 })
        ));
        assert!(matches!(
            segment.read(18),
            Err(StorageError::OffsetOutOfRange { offset: 18 })
        ));
    }

    #[test]
    fn maxed_by_index() {
        let dir = TempDir::new().unwrap();
        // room for exactly two rows
        let config = test_config(1024, 24);
        let mut segment = Segment::open(dir.path(), 0, &config).unwrap();

        segment.append(b"a").unwrap();
        segment.append(b"b").unwrap();
        assert!(segment.is_maxed());
        assert!(matches!(
            segment.append(b"c"),
            Err(StorageError::SegmentFull { base_offset: 0 })
        ));
    }

    #[test]
    fn maxed_by_store() {
        let dir = TempDir::new().unwrap();
        // two 12-byte entries reach the 24-byte store limit
        let config = test_config(24, 1024 * 12);
        let mut segment = Segment::open(dir.path(), 0, &config).unwrap();

        segment.append(b"1234").unwrap();
        segment.append(b"5678").unwrap();
        assert!(segment.is_maxed());
        assert!(matches!(
            segment.append(b"x"),
            Err(StorageError::SegmentFull { .. })
        ));
    }

    #[test]
    fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let config = test_config(1024, 1024 * 12);

        {
            let mut segment = Segment::open(dir.path(), 5, &config).unwrap();
            segment.append(b"one").unwrap();
            segment.append(b"two").unwrap();
            segment.close().unwrap();
        }

        let mut segment = Segment::open(dir.path(), 5, &config).unwrap();
        assert_eq!(segment.next_offset(), 7);
        assert_eq!(segment.read(5).unwrap().as_ref(), b"one");
        assert_eq!(segment.append(b"three").unwrap(), 7);
    }

    #[test]
    fn remove_deletes_both_files() {
        let dir = TempDir::new().unwrap();
        let config = test_config(1024, 1024 * 12);
        let mut segment = Segment::open(dir.path(), 0, &config).unwrap();
        segment.append(b"gone").unwrap();

        segment.remove().unwrap();
        assert!(!dir.path().join("0.store").exists());
        assert!(!dir.path().join("0.index").exists());
    }

    #[test]
    fn recovers_entries_missing_from_index() {
        let dir = TempDir::new().unwrap();
        let config = test_config(1024, 1024 * 12);

        // index knows about the first entry only; the second was written
        // to the store right before a crash
        {
            let store = Store::open(dir.path().join("0.store")).unwrap();
            let (_, p1) = store.append(b"indexed").unwrap();
            store.append(b"unindexed").unwrap();
            store.close().unwrap();

            let mut index =
                Index::open(dir.path().join("0.index"), config.segment.max_index_bytes).unwrap();
            index.write(0, p1).unwrap();
            index.close().unwrap();
        }

        let segment = Segment::open(dir.path(), 0, &config).unwrap();
        assert_eq!(segment.next_offset(), 2);
        assert_eq!(segment.read(1).unwrap().as_ref(), b"unindexed");
    }

    #[test]
    fn truncates_torn_trailing_entry() {
        let dir = TempDir::new().unwrap();
        let config = test_config(1024, 1024 * 12);

        {
            let store = Store::open(dir.path().join("0.store")).unwrap();
            store.append(b"whole").unwrap();
            store.close().unwrap();

            // length prefix promising 100 bytes, followed by only 4
            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join("0.store"))
                .unwrap();
            file.write_all(&100u64.to_be_bytes()).unwrap();
            file.write_all(b"torn").unwrap();
            drop(file);
        }

        let segment = Segment::open(dir.path(), 0, &config).unwrap();
        assert_eq!(segment.next_offset(), 1);
        assert_eq!(segment.read(0).unwrap().as_ref(), b"whole");
        assert_eq!(segment.store_size(), 8 + 5);
    }

    #[test]
    fn drops_index_rows_the_store_never_got() {
        let dir = TempDir::new().unwrap();
        let config = test_config(1024, 1024 * 12);

        // the buffered store write for the second entry was lost in a
        // crash; its index row made it to the page cache
        {
            let store = Store::open(dir.path().join("0.store")).unwrap();
            let (_, p1) = store.append(b"durable").unwrap();
            store.close().unwrap();

            let mut index =
                Index::open(dir.path().join("0.index"), config.segment.max_index_bytes).unwrap();
            index.write(0, p1).unwrap();
            index.write(1, 15).unwrap();
            index.close().unwrap();
        }

        let mut segment = Segment::open(dir.path(), 0, &config).unwrap();
        assert_eq!(segment.next_offset(), 1);
        assert_eq!(segment.read(0).unwrap().as_ref(), b"durable");
        assert!(matches!(
            segment.read(1),
            Err(StorageError::OffsetOutOfRange { .. })
        ));

        // the offset the lost entry never durably owned is reused
        assert_eq!(segment.append(b"replacement").unwrap(), 1);
        assert_eq!(segment.read(1).unwrap().as_ref(), b"replacement");
    }

    #[test]
    fn truncates_torn_length_prefix() {
        let dir = TempDir::new().unwrap();
        let config = test_config(1024, 1024 * 12);

        {
            let store = Store::open(dir.path().join("0.store")).unwrap();
            store.append(b"whole").unwrap();
            store.close().unwrap();

            let mut file = OpenOptions::new()
                .append(true)
                .open(dir.path().join("0.store"))
                .unwrap();
            file.write_all(&[0xFF; 3]).unwrap();
            drop(file);
        }

        let segment = Segment::open(dir.path(), 0, &config).unwrap();
        assert_eq!(segment.next_offset(), 1);
        assert_eq!(segment.store_size(), 8 + 5);
    }
}
