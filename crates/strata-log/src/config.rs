//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::StorageError;
use crate::index::ENTRY_WIDTH;
use crate::store::LEN_WIDTH;

/// Default rollover threshold for store files (256 MiB).
const DEFAULT_MAX_STORE_BYTES: u64 = 256 * 1024 * 1024;

/// Default rollover threshold and mmap pre-size for index files
/// (1 Mi rows at [`ENTRY_WIDTH`] bytes each).
const DEFAULT_MAX_INDEX_BYTES: u64 = 1024 * 1024 * ENTRY_WIDTH;

/// Top-level configuration for a [`Log`](crate::Log).
///
/// Derives serde so an embedding process can load it straight from its
/// own configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-segment sizing.
    pub segment: SegmentConfig,
}

/// Size limits and placement for individual segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Rollover threshold for the store file in bytes. Must exceed the
    /// largest record plus its length prefix.
    pub max_store_bytes: u64,

    /// Rollover threshold for the index file in bytes, and the size the
    /// file is pre-grown to for memory mapping. Must be a non-zero
    /// multiple of the 12-byte row width.
    pub max_index_bytes: u64,

    /// Base offset of the first segment on fresh bootstrap. Ignored when
    /// the data directory already holds segments.
    pub initial_offset: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: DEFAULT_MAX_STORE_BYTES,
            max_index_bytes: DEFAULT_MAX_INDEX_BYTES,
            initial_offset: 0,
        }
    }
}

impl Config {
    /// Checks the limits for internal consistency.
    ///
    /// Called by [`Log::open`](crate::Log::open) before any file is
    /// touched.
    pub fn validate(&self) -> Result<(), StorageError> {
        let segment = &self.segment;
        if segment.max_index_bytes == 0 || segment.max_index_bytes % ENTRY_WIDTH != 0 {
            return Err(StorageError::InvalidConfig(format!(
                "max_index_bytes ({}) must be a non-zero multiple of {ENTRY_WIDTH}",
                segment.max_index_bytes
            )));
        }
        if segment.max_store_bytes <= LEN_WIDTH {
            return Err(StorageError::InvalidConfig(format!(
                "max_store_bytes ({}) must exceed the {LEN_WIDTH}-byte length prefix",
                segment.max_store_bytes
            )));
        }
        Ok(())
    }
}
