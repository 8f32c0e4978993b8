//! Property tests for the log's round-trip and recovery laws.
//!
//! Small segment limits force frequent rollovers so the properties are
//! exercised across segment boundaries, not just inside one segment.

use proptest::collection::vec;
use proptest::prelude::*;
use strata_log::{Config, Log};
use tempfile::TempDir;

fn small_segment_config() -> Config {
    let mut config = Config::default();
    config.segment.max_store_bytes = 256;
    config.segment.max_index_bytes = 4 * 12;
    config
}

proptest! {
    /// Offsets come back dense and every record reads back verbatim.
    #[test]
    fn appends_are_dense_and_round_trip(
        payloads in vec(vec(any::<u8>(), 0..48), 1..40),
    ) {
        let dir = TempDir::new().unwrap();
        let log = Log::open(dir.path(), small_segment_config()).unwrap();

        for (want, payload) in payloads.iter().enumerate() {
            let offset = log.append(payload).unwrap();
            prop_assert_eq!(offset, want as u64);
        }

        prop_assert_eq!(log.lowest_offset().unwrap(), 0);
        prop_assert_eq!(log.highest_offset().unwrap(), payloads.len() as u64 - 1);
        for (offset, payload) in payloads.iter().enumerate() {
            let record = log.read(offset as u64).unwrap();
            prop_assert_eq!(record.as_ref(), &payload[..]);
        }
    }

    /// Close and reopen preserve every record at its original offset and
    /// the next append continues the sequence.
    #[test]
    fn records_survive_reopen(
        payloads in vec(vec(any::<u8>(), 0..48), 1..40),
    ) {
        let dir = TempDir::new().unwrap();

        {
            let log = Log::open(dir.path(), small_segment_config()).unwrap();
            for payload in &payloads {
                log.append(payload).unwrap();
            }
            log.close().unwrap();
        }

        let log = Log::open(dir.path(), small_segment_config()).unwrap();
        for (offset, payload) in payloads.iter().enumerate() {
            let record = log.read(offset as u64).unwrap();
            prop_assert_eq!(record.as_ref(), &payload[..]);
        }
        prop_assert_eq!(log.append(b"next").unwrap(), payloads.len() as u64);
    }

    /// The snapshot stream is exactly the length-prefixed concatenation
    /// of every record.
    #[test]
    fn reader_streams_every_record(
        payloads in vec(vec(any::<u8>(), 0..48), 1..20),
    ) {
        use std::io::Read;

        let dir = TempDir::new().unwrap();
        let log = Log::open(dir.path(), small_segment_config()).unwrap();
        for payload in &payloads {
            log.append(payload).unwrap();
        }

        let mut stream = Vec::new();
        log.reader().unwrap().read_to_end(&mut stream).unwrap();

        let mut want = Vec::new();
        for payload in &payloads {
            want.extend_from_slice(&(payload.len() as u64).to_be_bytes());
            want.extend_from_slice(payload);
        }
        prop_assert_eq!(stream, want);
    }
}
