//! # strata-log: Segmented append-only commit log storage
//!
//! This crate implements the per-node durable storage engine of the Strata
//! commit log:
//! - Length-prefixed record storage ([`Store`])
//! - Memory-mapped offset index ([`Index`])
//! - Store/index pairs covering contiguous offset ranges ([`Segment`])
//! - The ordered segment collection with rollover, truncation and
//!   recovery ([`Log`])
//! - Seams to the replication and request-serving layers ([`CommitLog`],
//!   [`ReplicatedLog`])
//!
//! # File Layout
//!
//! ```text
//! {data_dir}/
//! ├── 0.store      <- entries of the segment with base offset 0
//! ├── 0.index      <- offset index for that segment
//! ├── 734.store    <- segment covering offsets 734.. (active)
//! └── 734.index
//! ```
//!
//! A store file is a sequence of entries, each an 8-byte big-endian length
//! followed by the payload. An index file is a table of 12-byte rows, each
//! a 4-byte big-endian offset relative to the segment's base followed by
//! the 8-byte big-endian byte position of the entry in the paired store.
//! All on-disk integers are big-endian; this is a fixed contract, not a
//! configuration choice.
//!
//! # Data Flow
//!
//! Appends go to the active (highest base offset) segment, which writes
//! length+payload to its store and offset+position to its index. Reads
//! resolve the covering segment by absolute offset, look up the byte
//! position in the index, and fetch the entry from the store.
//!
//! # Recovery
//!
//! Opening a log rebuilds every segment from the files in the data
//! directory. A segment derives its next offset from the last index row,
//! then reconciles the store tail: entries written but not yet indexed
//! before a crash are re-indexed, and a half-written trailing entry is
//! truncated away.

use std::path::PathBuf;

mod config;
mod index;
mod log;
mod segment;
mod store;
mod traits;

pub use config::{Config, SegmentConfig};
pub use index::Index;
pub use log::{Log, LogReader, ReadFrom};
pub use segment::Segment;
pub use store::Store;
pub use traits::{CommitLog, ReplicatedLog};

/// Errors surfaced by the storage engine.
///
/// IO failures are propagated unchanged; the engine performs no retries.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested offset lies outside the range covered by the log.
    #[error("offset {offset} is out of range")]
    OffsetOutOfRange {
        /// The offset that was requested.
        offset: u64,
    },

    /// An index read addressed a row past the logical tail.
    #[error("no further index entries")]
    EndOfEntries,

    /// An index write would not fit inside the mapped file.
    #[error("index is full")]
    IndexFull,

    /// A segment reached one of its size limits. Caught by [`Log::append`],
    /// which rolls to a fresh segment and retries.
    #[error("segment with base offset {base_offset} is full")]
    SegmentFull {
        /// Base offset of the full segment.
        base_offset: u64,
    },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// On-disk state that cannot be reconciled with the format.
    #[error("corrupted {path}: {reason}")]
    Corrupted {
        /// File the inconsistency was found in.
        path: PathBuf,
        /// What did not add up.
        reason: String,
    },

    /// Filesystem failure (disk full, permission denied, short read).
    #[error("storage I/O failure")]
    Io(#[from] std::io::Error),
}
