//! Fuzz target: unified-header inbound decoders
//!
//! Splits the input into frames on the first byte's length hint and drives
//! them through `StreamReassembler::feed` and `decode_page`, asserting that
//! neither panics nor yields a payload larger than its bound.
//!
//! cargo fuzz run fuzz_unified_stream

#![no_main]

use autowater_link::framing::unified::{DEFAULT_STREAM_CAPACITY, StreamReassembler, decode_page};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&step, mut rest)) = data.split_first() else {
        return;
    };
    let step = usize::from(step).max(1);
    let mut reassembler = StreamReassembler::new();

    while !rest.is_empty() {
        let (frame, tail) = rest.split_at(step.min(rest.len()));
        rest = tail;

        if let Ok(Some(message)) = reassembler.feed(frame) {
            assert!(message.payload.len() <= DEFAULT_STREAM_CAPACITY);
            assert!(!reassembler.is_active(), "completed stream left state behind");
        }
        if let Ok(page) = decode_page(frame) {
            assert!(page.payload.len() <= usize::from(page.header.fragment_size));
        }
    }

    // A reset reassembler starts from scratch.
    reassembler.reset();
    assert!(!reassembler.is_active());
});
