//! Seams between the storage engine and the layers stacked on top of
//! it.
//!
//! The engine does not know about consensus or the wire protocol; those
//! subsystems receive the log through these traits. The log never calls
//! back up, so no cycle exists: construct the [`Log`], hand it to the
//! consensus subsystem, and serve reads from either.

use bytes::Bytes;

use crate::StorageError;
use crate::log::{Log, LogReader};

/// The append/read surface the request-serving layer consumes.
///
/// Streaming reads are available through
/// [`Log::read_from`], which borrows the log and therefore stays an
/// inherent method.
pub trait CommitLog: Send + Sync {
    /// Appends a record and returns its absolute offset.
    fn append(&self, payload: &[u8]) -> Result<u64, StorageError>;

    /// Reads the record at `offset`.
    fn read(&self, offset: u64) -> Result<Bytes, StorageError>;

    /// Oldest offset still held.
    fn lowest_offset(&self) -> Result<u64, StorageError>;

    /// Newest offset, or [`StorageError::OffsetOutOfRange`] for a log
    /// never appended to.
    fn highest_offset(&self) -> Result<u64, StorageError>;
}

/// The surface the consensus subsystem drives.
///
/// Log shipping appends through [`CommitLog::append`]; snapshot capture
/// streams [`ReplicatedLog::reader`]; snapshot install is a
/// [`ReplicatedLog::reset`] followed by re-appending; and
/// [`ReplicatedLog::truncate`] drops fully consumed segments.
pub trait ReplicatedLog: CommitLog {
    /// Drops every segment entirely below `lowest_to_keep`.
    fn truncate(&self, lowest_to_keep: u64) -> Result<(), StorageError>;

    /// Deletes all state and starts over at the initial offset.
    fn reset(&self) -> Result<(), StorageError>;

    /// Byte stream over the raw store files for snapshot transfer.
    fn reader(&self) -> Result<LogReader, StorageError>;
}

impl CommitLog for Log {
    fn append(&self, payload: &[u8]) -> Result<u64, StorageError> {
        Log::append(self, payload)
    }

    fn read(&self, offset: u64) -> Result<Bytes, StorageError> {
        Log::read(self, offset)
    }

    fn lowest_offset(&self) -> Result<u64, StorageError> {
        Log::lowest_offset(self)
    }

    fn highest_offset(&self) -> Result<u64, StorageError> {
        Log::highest_offset(self)
    }
}

impl ReplicatedLog for Log {
    fn truncate(&self, lowest_to_keep: u64) -> Result<(), StorageError> {
        Log::truncate(self, lowest_to_keep)
    }

    fn reset(&self) -> Result<(), StorageError> {
        Log::reset(self)
    }

    fn reader(&self) -> Result<LogReader, StorageError> {
        Log::reader(self)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::Config;

    // the consensus subsystem only sees the trait object
    fn install_snapshot(
        log: &dyn ReplicatedLog,
        records: &[&[u8]],
    ) -> Result<(), StorageError> {
        log.reset()?;
        for record in records {
            log.append(record)?;
        }
        Ok(())
    }

    #[test]
    fn log_is_usable_through_the_trait_objects() {
        let dir = TempDir::new().unwrap();
        let log = crate::Log::open(dir.path(), Config::default()).unwrap();

        let offset = CommitLog::append(&log, b"via trait").unwrap();
        assert_eq!(CommitLog::read(&log, offset).unwrap().as_ref(), b"via trait");

        install_snapshot(&log, &[b"snap-0", b"snap-1"]).unwrap();
        assert_eq!(log.lowest_offset().unwrap(), 0);
        assert_eq!(log.highest_offset().unwrap(), 1);
        assert_eq!(CommitLog::read(&log, 1).unwrap().as_ref(), b"snap-1");
    }
}
