//! Unified 8-byte header — the common envelope on paged and streamed channels.
//!
//! Wire format (little-endian numerics):
//! ```text
//! ┌──────────┬────────┬─────────────┬───────────┬───────────┬──────────┬──────────┐
//! │ dataType │ status │ entryCount  │ fragIndex │ fragTotal │ fragSize │ reserved │
//! │   (1B)   │  (1B)  │  (2B LE)    │   (1B)    │   (1B)    │   (1B)   │   (1B)   │
//! └──────────┴────────┴─────────────┴───────────┴───────────┴──────────┴──────────┘
//!   followed by `fragSize` payload bytes
//! ```
//!
//! Two exchange styles share the header:
//!
//! - **Paged** — the app asks for page `n` explicitly and every frame is a
//!   complete, standalone page ([`decode_page`]).  `fragIndex` only
//!   identifies which outstanding request the page answers.
//! - **Streamed** — the device pushes `fragTotal` frames with increasing
//!   `fragIndex`; [`StreamReassembler`] concatenates them into one message.

use core::fmt;

use log::{debug, warn};

use crate::error::ProtocolError;

pub const UNIFIED_HEADER_LEN: usize = 8;

/// Largest payload a single unified frame can declare.
pub const MAX_FRAGMENT_PAYLOAD: usize = u8::MAX as usize;

/// Upper bound on a reassembled streamed message.
pub const DEFAULT_STREAM_CAPACITY: usize = 4096;

// ── Status codes ─────────────────────────────────────────────

/// Per-frame status reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    InvalidCommand,
    InvalidParameter,
    NoData,
    TooLarge,
    RateLimited,
    TransportError,
    Unknown(u8),
}

impl From<u8> for Status {
    fn from(code: u8) -> Self {
        match code {
            0x00 => Self::Success,
            0x01 => Self::InvalidCommand,
            0x02 => Self::InvalidParameter,
            0x03 => Self::NoData,
            0x04 => Self::TooLarge,
            0x05 => Self::RateLimited,
            0x06 => Self::TransportError,
            other => Self::Unknown(other),
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        match status {
            Status::Success => 0x00,
            Status::InvalidCommand => 0x01,
            Status::InvalidParameter => 0x02,
            Status::NoData => 0x03,
            Status::TooLarge => 0x04,
            Status::RateLimited => 0x05,
            Status::TransportError => 0x06,
            Status::Unknown(code) => code,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::InvalidCommand => write!(f, "invalid command"),
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::NoData => write!(f, "no data"),
            Self::TooLarge => write!(f, "too large"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::TransportError => write!(f, "device transport error"),
            Self::Unknown(code) => write!(f, "unknown status 0x{code:02X}"),
        }
    }
}

// ── Header ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnifiedHeader {
    pub data_type: u8,
    pub status: Status,
    /// Entries carried by this frame.
    pub entry_count: u16,
    pub fragment_index: u8,
    pub total_fragments: u8,
    /// Payload bytes following the header in this frame.
    pub fragment_size: u8,
    pub reserved: u8,
}

impl UnifiedHeader {
    /// Split a frame into header and exactly `fragment_size` payload bytes.
    pub fn parse(frame: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        if frame.len() < UNIFIED_HEADER_LEN {
            return Err(ProtocolError::Undersized {
                expected: UNIFIED_HEADER_LEN,
                actual: frame.len(),
            });
        }
        let header = Self {
            data_type: frame[0],
            status: Status::from(frame[1]),
            entry_count: u16::from_le_bytes([frame[2], frame[3]]),
            fragment_index: frame[4],
            total_fragments: frame[5],
            fragment_size: frame[6],
            reserved: frame[7],
        };
        let end = UNIFIED_HEADER_LEN + usize::from(header.fragment_size);
        if frame.len() < end {
            return Err(ProtocolError::Undersized {
                expected: end,
                actual: frame.len(),
            });
        }
        Ok((header, &frame[UNIFIED_HEADER_LEN..end]))
    }

    pub fn encode(&self) -> [u8; UNIFIED_HEADER_LEN] {
        let count = self.entry_count.to_le_bytes();
        [
            self.data_type,
            self.status.into(),
            count[0],
            count[1],
            self.fragment_index,
            self.total_fragments,
            self.fragment_size,
            self.reserved,
        ]
    }

    /// Whole message in one frame; no reassembly needed.
    pub fn is_whole(&self) -> bool {
        self.total_fragments <= 1
    }

    pub fn is_last(&self) -> bool {
        usize::from(self.fragment_index) + 1 == usize::from(self.total_fragments)
    }

    /// `Ok` for success and no-data; the status as an error otherwise.
    fn check_status(&self) -> Result<(), ProtocolError> {
        match self.status {
            Status::Success | Status::NoData => Ok(()),
            status => Err(ProtocolError::Status {
                data_type: self.data_type,
                status,
            }),
        }
    }
}

// ── Paged exchange ───────────────────────────────────────────

/// One standalone page answering an explicit page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub header: UnifiedHeader,
    pub payload: Vec<u8>,
}

impl Page {
    pub fn page_index(&self) -> u8 {
        self.header.fragment_index
    }

    /// The device reports more pages after this one.
    pub fn has_more(&self) -> bool {
        !self.header.is_whole() && !self.header.is_last()
    }
}

/// Decode a paged frame. Never accumulates across frames.
///
/// A `NoData` page decodes to an empty payload.
pub fn decode_page(frame: &[u8]) -> Result<Page, ProtocolError> {
    let (header, payload) = UnifiedHeader::parse(frame)?;
    header.check_status()?;
    let payload = if header.status == Status::NoData {
        Vec::new()
    } else {
        payload.to_vec()
    };
    Ok(Page { header, payload })
}

// ── Streamed exchange ────────────────────────────────────────

/// A streamed message with the header stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedMessage {
    pub data_type: u8,
    /// Sum of the per-frame entry counts.
    pub entry_count: u16,
    pub payload: Vec<u8>,
}

struct StreamState {
    data_type: u8,
    total_fragments: u8,
    next_index: u8,
    entry_count: u16,
    accumulated: Vec<u8>,
}

/// Concatenates streamed frames until `fragmentIndex + 1 == totalFragments`.
///
/// One reassembler per endpoint. Any error discards the partial message.
pub struct StreamReassembler {
    state: Option<StreamState>,
    capacity: usize,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STREAM_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: None,
            capacity,
        }
    }

    /// Feed one frame. Returns `Some(message)` when the last fragment lands.
    ///
    /// `Err` carries the data type the failure belongs to, when known, so
    /// the caller can reject the matching outstanding request.
    pub fn feed(&mut self, frame: &[u8]) -> Result<Option<UnifiedMessage>, StreamError> {
        let (header, payload) = UnifiedHeader::parse(frame).map_err(|e| {
            self.reset();
            StreamError::new(None, e)
        })?;
        let data_type = header.data_type;

        if let Err(e) = header.check_status() {
            self.reset();
            return Err(StreamError::new(Some(data_type), e));
        }
        let payload: &[u8] = if header.status == Status::NoData {
            &[]
        } else {
            payload
        };

        if header.is_whole() {
            if let Some(stale) = self.state.take() {
                warn!(
                    "stream: whole frame for 0x{:02X} discards partial 0x{:02X} ({} bytes)",
                    data_type,
                    stale.data_type,
                    stale.accumulated.len()
                );
            }
            return Ok(Some(UnifiedMessage {
                data_type,
                entry_count: header.entry_count,
                payload: payload.to_vec(),
            }));
        }

        if header.fragment_index == 0 {
            if self.state.is_some() {
                debug!("stream: fragment 0 for 0x{data_type:02X} restarts reassembly");
            }
            self.state = Some(StreamState {
                data_type,
                total_fragments: header.total_fragments,
                next_index: 0,
                entry_count: 0,
                accumulated: Vec::with_capacity(
                    usize::from(header.total_fragments) * usize::from(header.fragment_size),
                ),
            });
        }

        let Some(state) = self.state.as_mut() else {
            return Err(StreamError::new(
                Some(data_type),
                ProtocolError::UnexpectedSequence {
                    expected: 0,
                    got: header.fragment_index,
                },
            ));
        };

        let failure = if state.data_type != data_type {
            Some(ProtocolError::UnexpectedDataType {
                expected: state.data_type,
                got: data_type,
            })
        } else if header.fragment_index != state.next_index
            || header.total_fragments != state.total_fragments
        {
            Some(ProtocolError::UnexpectedSequence {
                expected: state.next_index,
                got: header.fragment_index,
            })
        } else if state.accumulated.len() + payload.len() > self.capacity {
            Some(ProtocolError::FragmentOverflow {
                capacity: self.capacity,
                attempted: state.accumulated.len() + payload.len(),
            })
        } else {
            None
        };
        if let Some(e) = failure {
            self.reset();
            return Err(StreamError::new(Some(data_type), e));
        }

        state.accumulated.extend_from_slice(payload);
        state.entry_count = state.entry_count.saturating_add(header.entry_count);
        state.next_index = state.next_index.wrapping_add(1);

        if header.is_last() {
            let done = self.state.take().map(|s| UnifiedMessage {
                data_type: s.data_type,
                entry_count: s.entry_count,
                payload: s.accumulated,
            });
            return Ok(done);
        }
        Ok(None)
    }

    pub fn reset(&mut self) {
        self.state = None;
    }

    /// Whether a message is mid-stream.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

/// A reassembly failure, tagged with the data type when the header parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamError {
    pub data_type: Option<u8>,
    pub error: ProtocolError,
}

impl StreamError {
    fn new(data_type: Option<u8>, error: ProtocolError) -> Self {
        Self { data_type, error }
    }
}

// ── Encoding ─────────────────────────────────────────────────

/// Build the frames a controller would push for `payload`.
///
/// The full `entry_count` rides on the first frame.
pub fn encode_stream(
    data_type: u8,
    entry_count: u16,
    payload: &[u8],
    max_fragment: usize,
) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let max_fragment = max_fragment.clamp(1, MAX_FRAGMENT_PAYLOAD);
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![&[][..]]
    } else {
        payload.chunks(max_fragment).collect()
    };
    let total =
        u8::try_from(chunks.len()).map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;

    Ok(chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let header = UnifiedHeader {
                data_type,
                status: Status::Success,
                entry_count: if i == 0 { entry_count } else { 0 },
                fragment_index: i as u8,
                total_fragments: total,
                fragment_size: chunk.len() as u8,
                reserved: 0,
            };
            let mut frame = Vec::with_capacity(UNIFIED_HEADER_LEN + chunk.len());
            frame.extend_from_slice(&header.encode());
            frame.extend_from_slice(chunk);
            frame
        })
        .collect())
}

// ── Tests ────────────────────────────────────────────────────
