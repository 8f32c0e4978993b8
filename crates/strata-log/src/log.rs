//! The log: an ordered collection of segments behind a reader-writer
//! lock.
//!
//! Appends are routed to the active segment (always the last of the
//! vector) and roll to a fresh segment when a size limit is reached.
//! Reads resolve the covering segment by absolute offset. Opening a log
//! rebuilds every segment from the `{base_offset}.store` /
//! `{base_offset}.index` files found in the data directory.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tracing::info;

use crate::StorageError;
use crate::config::Config;
use crate::segment::Segment;

/// A single logical append-only sequence of records spread over
/// segments.
///
/// # Invariants
///
/// - Segments are sorted by ascending base offset and cover a
///   contiguous, disjoint range of absolute offsets
/// - The vector always holds at least one segment; the last one is the
///   active segment receiving appends
/// - Offsets are assigned strictly monotonically; a successful append
///   returning offset K means `read(K)` returns the same payload
#[derive(Debug)]
pub struct Log {
    dir: PathBuf,
    config: Config,
    segments: RwLock<Vec<Segment>>,
}

impl Log {
    /// Opens the log over `dir`, creating the directory if needed.
    ///
    /// Existing segments are rebuilt in base-offset order; with none on
    /// disk a fresh segment is created at the configured initial offset.
    pub fn open(dir: impl AsRef<Path>, config: Config) -> Result<Self, StorageError> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut base_offsets = BTreeSet::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name
                .strip_suffix(".store")
                .or_else(|| name.strip_suffix(".index"))
            else {
                continue;
            };
            let base_offset = stem.parse::<u64>().map_err(|_| StorageError::Corrupted {
                path: entry.path(),
                reason: "segment filename is not a decimal base offset".into(),
            })?;
            base_offsets.insert(base_offset);
        }

        let mut segments = Vec::with_capacity(base_offsets.len().max(1));
        for base_offset in base_offsets {
            segments.push(Segment::open(&dir, base_offset, &config)?);
        }
        if segments.is_empty() {
            segments.push(Segment::open(&dir, config.segment.initial_offset, &config)?);
        }

        Ok(Self {
            dir,
            config,
            segments: RwLock::new(segments),
        })
    }

    /// Appends `payload` and returns the absolute offset it was
    /// assigned.
    ///
    /// Rolls to a fresh segment first when the active one has reached a
    /// size limit or this entry would push its store past the limit, so
    /// the entry is never written into a segment it would overflow. An
    /// empty active segment is never rolled: a record too large for any
    /// segment (a configuration violation) lands in it rather than
    /// rolling forever.
    pub fn append(&self, payload: &[u8]) -> Result<u64, StorageError> {
        let mut segments = self.write_lock();
        let needs_roll = {
            let active = active(&segments);
            active.next_offset() > active.base_offset()
                && (active.is_maxed() || !active.has_room_for(payload.len()))
        };
        if needs_roll {
            self.roll(&mut segments)?;
        }
        match active_mut(&mut segments).append(payload) {
            Err(StorageError::SegmentFull { .. }) => {
                self.roll(&mut segments)?;
                active_mut(&mut segments).append(payload)
            }
            result => result,
        }
    }

    /// Reads the record at `offset`.
    pub fn read(&self, offset: u64) -> Result<Bytes, StorageError> {
        let segments = self.read_lock();
        let covering = segments
            .binary_search_by(|segment| {
                if offset < segment.base_offset() {
                    Ordering::Greater
                } else if offset >= segment.next_offset() {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .ok();
        match covering {
            Some(i) => segments[i].read(offset),
            None => Err(StorageError::OffsetOutOfRange { offset }),
        }
    }

    /// Absolute offset of the oldest record still held.
    pub fn lowest_offset(&self) -> Result<u64, StorageError> {
        let segments = self.read_lock();
        Ok(segments
            .first()
            .expect("log always holds at least one segment")
            .base_offset())
    }

    /// Absolute offset of the newest record.
    ///
    /// An empty log that has never been appended to reports
    /// [`StorageError::OffsetOutOfRange`].
    pub fn highest_offset(&self) -> Result<u64, StorageError> {
        let segments = self.read_lock();
        let next_offset = active(&segments).next_offset();
        if next_offset == 0 {
            return Err(StorageError::OffsetOutOfRange { offset: 0 });
        }
        Ok(next_offset - 1)
    }

    /// Removes every segment whose entire range falls below
    /// `lowest_to_keep`, deleting its files.
    ///
    /// The replication layer calls this once all nodes have consumed the
    /// records below the threshold.
    pub fn truncate(&self, lowest_to_keep: u64) -> Result<(), StorageError> {
        let mut segments = self.write_lock();
        let next_offset = active(&segments).next_offset();

        let (removed, kept): (Vec<_>, Vec<_>) = segments
            .drain(..)
            .partition(|segment| segment.next_offset() <= lowest_to_keep);
        *segments = kept;

        if !removed.is_empty() {
            info!(
                lowest_to_keep,
                removed = removed.len(),
                "truncating log segments"
            );
        }
        // delete before any replacement is created: the replacement may
        // reuse the base offset of a removed (empty) segment
        for segment in removed {
            segment.remove()?;
        }
        if segments.is_empty() {
            // every segment fell below the threshold; appends continue
            // from the old next offset
            segments.push(Segment::open(&self.dir, next_offset, &self.config)?);
        }
        Ok(())
    }

    /// Deletes every segment and starts over with a fresh one at the
    /// configured initial offset.
    ///
    /// Used when installing a snapshot: reset, then re-append the
    /// snapshot records.
    pub fn reset(&self) -> Result<(), StorageError> {
        let mut segments = self.write_lock();
        info!("resetting log");
        for segment in segments.drain(..) {
            segment.remove()?;
        }
        segments.push(Segment::open(
            &self.dir,
            self.config.segment.initial_offset,
            &self.config,
        )?);
        Ok(())
    }

    /// Returns a reader over the concatenated store files in segment
    /// order, each from its beginning.
    ///
    /// Store buffers are flushed and per-file lengths captured up front,
    /// so the stream is a stable prefix of the log even while appends
    /// continue. Used for snapshot transfer.
    pub fn reader(&self) -> Result<LogReader, StorageError> {
        let segments = self.read_lock();
        let mut sources = Vec::with_capacity(segments.len());
        for segment in segments.iter() {
            segment.flush_store()?;
            sources.push(StoreSource {
                file: File::open(segment.store_path())?,
                remaining: segment.store_size(),
            });
        }
        Ok(LogReader {
            sources,
            current: 0,
        })
    }

    /// Returns an iterator yielding `(offset, payload)` from `offset`
    /// onward, ending at the first offset past the log's tail.
    ///
    /// This is the streaming-read surface the request-serving layer
    /// exposes to consumers.
    pub fn read_from(&self, offset: u64) -> ReadFrom<'_> {
        ReadFrom {
            log: self,
            next_offset: offset,
        }
    }

    /// Number of segments currently held.
    pub fn segment_count(&self) -> usize {
        self.read_lock().len()
    }

    /// The data directory this log stores its segments in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Closes every segment, consuming the log.
    pub fn close(self) -> Result<(), StorageError> {
        let segments = self.segments.into_inner().expect("log lock poisoned");
        for segment in segments {
            segment.close()?;
        }
        Ok(())
    }

    fn roll(&self, segments: &mut Vec<Segment>) -> Result<(), StorageError> {
        let base_offset = active(segments).next_offset();
        info!(base_offset, "rolling to a new segment");
        segments.push(Segment::open(&self.dir, base_offset, &self.config)?);
        Ok(())
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, Vec<Segment>> {
        self.segments.read().expect("log lock poisoned")
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, Vec<Segment>> {
        self.segments.write().expect("log lock poisoned")
    }
}

fn active(segments: &[Segment]) -> &Segment {
    segments
        .last()
        .expect("log always holds at least one segment")
}

fn active_mut(segments: &mut [Segment]) -> &mut Segment {
    segments
        .last_mut()
        .expect("log always holds at least one segment")
}

/// Byte stream over the concatenated store files of a log, produced by
/// [`Log::reader`].
#[derive(Debug)]
pub struct LogReader {
    sources: Vec<StoreSource>,
    current: usize,
}

#[derive(Debug)]
struct StoreSource {
    file: File,
    /// Bytes left to serve from this store, fixed when the reader was
    /// created.
    remaining: u64,
}

impl Read for LogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while let Some(source) = self.sources.get_mut(self.current) {
            if source.remaining == 0 {
                self.current += 1;
                continue;
            }
            let want = usize::try_from(source.remaining.min(buf.len() as u64))
                .expect("bounded by buf.len()");
            let n = source.file.read(&mut buf[..want])?;
            if n == 0 {
                // file shorter than the captured length; move on
                self.current += 1;
                continue;
            }
            source.remaining -= n as u64;
            return Ok(n);
        }
        Ok(0)
    }
}

/// Iterator over records from a starting offset, produced by
/// [`Log::read_from`].
#[derive(Debug)]
pub struct ReadFrom<'a> {
    log: &'a Log,
    next_offset: u64,
}

impl Iterator for ReadFrom<'_> {
    type Item = Result<(u64, Bytes), StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next_offset;
        match self.log.read(offset) {
            Ok(payload) => {
                self.next_offset += 1;
                Some(Ok((offset, payload)))
            }
            Err(StorageError::OffsetOutOfRange { .. }) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
