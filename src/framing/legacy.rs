//! Legacy 3-byte fragment header used by the environmental-data channel.
//!
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────────────────┐
//! │ sequence │ fragTotal │ length   │ payload (length B)   │
//! │   (1B)   │   (1B)    │  (1B)    │                      │
//! └──────────┴───────────┴──────────┴──────────────────────┘
//! ```
//!
//! There is no type tag: the channel implies the structure, and its size is
//! known statically.  Payload accumulates into a fixed-capacity buffer of
//! exactly that size; a declared length that would overflow it is rejected
//! before any byte is copied.

use log::debug;

use crate::error::ProtocolError;

pub const LEGACY_HEADER_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyHeader {
    pub sequence: u8,
    pub total_fragments: u8,
    pub length: u8,
}

impl LegacyHeader {
    /// Parse a header whose fields agree with the frame they arrived in.
    ///
    /// Returns `None` when the first three bytes cannot be a header for
    /// this frame (length mismatch, zero total, sequence past total).
    pub fn parse_consistent(frame: &[u8]) -> Option<Self> {
        if frame.len() < LEGACY_HEADER_LEN {
            return None;
        }
        let header = Self {
            sequence: frame[0],
            total_fragments: frame[1],
            length: frame[2],
        };
        let consistent = header.total_fragments > 0
            && header.sequence < header.total_fragments
            && usize::from(header.length) == frame.len() - LEGACY_HEADER_LEN;
        consistent.then_some(header)
    }

    pub fn encode(&self) -> [u8; LEGACY_HEADER_LEN] {
        [self.sequence, self.total_fragments, self.length]
    }

    pub fn is_last(&self) -> bool {
        usize::from(self.sequence) + 1 == usize::from(self.total_fragments)
    }
}

/// Reassembles one `N`-byte structure from legacy fragments.
pub struct LegacyReassembler<const N: usize> {
    buffer: heapless::Vec<u8, N>,
    expected_seq: u8,
    total: u8,
    active: bool,
}

impl<const N: usize> LegacyReassembler<N> {
    pub const fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
            expected_seq: 0,
            total: 0,
            active: false,
        }
    }

    /// Feed one notification.
    ///
    /// A frame that is exactly `N` bytes and does not parse as a consistent
    /// header is the whole structure and bypasses reassembly.
    pub fn feed(&mut self, frame: &[u8]) -> Result<Option<heapless::Vec<u8, N>>, ProtocolError> {
        let Some(header) = LegacyHeader::parse_consistent(frame) else {
            if frame.len() == N {
                if self.active {
                    debug!("legacy: whole frame discards partial reassembly");
                }
                self.reset();
                let mut whole = heapless::Vec::new();
                // Cannot fail: the frame is exactly N bytes.
                let _ = whole.extend_from_slice(frame);
                return Ok(Some(whole));
            }
            self.reset();
            return Err(ProtocolError::Undersized {
                expected: if frame.len() < LEGACY_HEADER_LEN {
                    LEGACY_HEADER_LEN
                } else {
                    N
                },
                actual: frame.len(),
            });
        };

        if header.sequence == 0 {
            self.reset();
            self.active = true;
            self.total = header.total_fragments;
        }

        if !self.active {
            return Err(ProtocolError::UnexpectedSequence {
                expected: 0,
                got: header.sequence,
            });
        }
        if header.sequence != self.expected_seq || header.total_fragments != self.total {
            let expected = self.expected_seq;
            self.reset();
            return Err(ProtocolError::UnexpectedSequence {
                expected,
                got: header.sequence,
            });
        }

        let payload = &frame[LEGACY_HEADER_LEN..];
        let attempted = self.buffer.len() + payload.len();
        if attempted > N {
            self.reset();
            return Err(ProtocolError::FragmentOverflow {
                capacity: N,
                attempted,
            });
        }
        // Capacity checked above.
        let _ = self.buffer.extend_from_slice(payload);
        self.expected_seq = self.expected_seq.wrapping_add(1);

        if header.is_last() {
            let done = core::mem::take(&mut self.buffer);
            self.reset();
            return Ok(Some(done));
        }
        Ok(None)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected_seq = 0;
        self.total = 0;
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl<const N: usize> Default for LegacyReassembler<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `payload` into legacy frames of at most `max_fragment` payload bytes.
pub fn encode_legacy(payload: &[u8], max_fragment: usize) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let max_fragment = max_fragment.clamp(1, usize::from(u8::MAX));
    let chunks: Vec<&[u8]> = payload.chunks(max_fragment).collect();
    let total = u8::try_from(chunks.len().max(1))
        .map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;
    if chunks.is_empty() {
        return Ok(vec![LegacyHeader {
            sequence: 0,
            total_fragments: 1,
            length: 0,
        }
        .encode()
        .to_vec()]);
    }
    Ok(chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let header = LegacyHeader {
                sequence: i as u8,
                total_fragments: total,
                length: chunk.len() as u8,
            };
            let mut frame = header.encode().to_vec();
            frame.extend_from_slice(chunk);
            frame
        })
        .collect())
}

// ── Tests ────────────────────────────────────────────────────
