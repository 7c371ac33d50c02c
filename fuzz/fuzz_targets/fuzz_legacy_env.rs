//! Fuzz target: legacy environment reassembly and the outbound collector
//!
//! Feeds arbitrary frames into `LegacyReassembler` sized for the
//! environmental record, and the same bytes into `ChunkCollector`.
//! Neither may panic, and the legacy buffer never exceeds its capacity.
//!
//! cargo fuzz run fuzz_legacy_env

#![no_main]

use autowater_link::framing::chunked::ChunkCollector;
use autowater_link::framing::legacy::LegacyReassembler;
use autowater_link::model::ENVIRONMENT_SIZE;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut legacy = LegacyReassembler::<ENVIRONMENT_SIZE>::new();
    let mut collector = ChunkCollector::new();

    for frame in data.chunks(27) {
        if let Ok(Some(whole)) = legacy.feed(frame) {
            assert!(whole.len() <= ENVIRONMENT_SIZE);
        }
        if let Ok(Some((header, payload))) = collector.feed(frame) {
            assert_eq!(payload.len(), usize::from(header.total_len));
            assert!(!collector.is_active());
        }
    }
});
