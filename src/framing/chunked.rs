//! Chunked transfer encoding for outbound writes larger than one packet.
//!
//! When a configuration object exceeds the per-packet capacity it is split
//! into a header-bearing first packet followed by pure-payload
//! continuation packets:
//!
//! ```text
//! Packet 1: [context][encoding][size hi/lo per tag]  payload part 1
//! Packet 2:                                          payload part 2
//! Packet N:                                          payload part N (final)
//! ```
//!
//! The encoding tag tells the controller the byte order of the size field
//! only; the payload is always a complete structure.  Both tags are live
//! in current firmware (renames use big-endian, every other configuration
//! write little-endian) and kept as explicit variants.
//!
//! Payloads that fit one packet are written raw, with no header.

use core::fmt;

use crate::error::ProtocolError;

pub const FRAGMENT_HEADER_LEN: usize = 4;

/// Size-field byte order of a chunked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SizeEncoding {
    /// Big-endian size field. Used by channel renames.
    BigEndian = 0x02,
    /// Little-endian size field.
    LittleEndian = 0x03,
}

impl TryFrom<u8> for SizeEncoding {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0x02 => Ok(Self::BigEndian),
            0x03 => Ok(Self::LittleEndian),
            other => Err(ProtocolError::UnknownEncoding(other)),
        }
    }
}

impl fmt::Display for SizeEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BigEndian => write!(f, "BE"),
            Self::LittleEndian => write!(f, "LE"),
        }
    }
}

/// Leading 4 bytes of the first packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Selector the payload applies to (channel id, config slot).
    pub context: u8,
    pub encoding: SizeEncoding,
    pub total_len: u16,
}

impl FragmentHeader {
    pub fn encode(&self) -> [u8; FRAGMENT_HEADER_LEN] {
        let size = match self.encoding {
            SizeEncoding::BigEndian => self.total_len.to_be_bytes(),
            SizeEncoding::LittleEndian => self.total_len.to_le_bytes(),
        };
        [self.context, self.encoding as u8, size[0], size[1]]
    }

    pub fn parse(packet: &[u8]) -> Result<Self, ProtocolError> {
        if packet.len() < FRAGMENT_HEADER_LEN {
            return Err(ProtocolError::Undersized {
                expected: FRAGMENT_HEADER_LEN,
                actual: packet.len(),
            });
        }
        let encoding = SizeEncoding::try_from(packet[1])?;
        let raw = [packet[2], packet[3]];
        let total_len = match encoding {
            SizeEncoding::BigEndian => u16::from_be_bytes(raw),
            SizeEncoding::LittleEndian => u16::from_le_bytes(raw),
        };
        Ok(Self {
            context: packet[0],
            encoding,
            total_len,
        })
    }
}

/// Split an outbound payload into packets of at most `capacity` bytes.
///
/// Returns a single raw packet when the payload already fits.
pub fn split_payload(
    context: u8,
    encoding: SizeEncoding,
    data: &[u8],
    capacity: usize,
) -> Result<Vec<Vec<u8>>, ProtocolError> {
    if data.len() <= capacity {
        return Ok(vec![data.to_vec()]);
    }
    if capacity <= FRAGMENT_HEADER_LEN {
        return Err(ProtocolError::FieldRange("packet_capacity"));
    }
    let total_len =
        u16::try_from(data.len()).map_err(|_| ProtocolError::PayloadTooLarge(data.len()))?;

    let header = FragmentHeader {
        context,
        encoding,
        total_len,
    };
    let first_len = capacity - FRAGMENT_HEADER_LEN;
    let (head, rest) = data.split_at(first_len);

    let mut first = Vec::with_capacity(capacity);
    first.extend_from_slice(&header.encode());
    first.extend_from_slice(head);

    let mut packets = vec![first];
    packets.extend(rest.chunks(capacity).map(<[u8]>::to_vec));
    Ok(packets)
}

/// Receiving side of a chunked write (controller emulation, fuzzing).
pub struct ChunkCollector {
    header: Option<FragmentHeader>,
    buffer: Vec<u8>,
}

impl ChunkCollector {
    pub fn new() -> Self {
        Self {
            header: None,
            buffer: Vec::new(),
        }
    }

    /// Feed one packet. Returns the header and payload once `total_len`
    /// bytes have arrived.
    pub fn feed(
        &mut self,
        packet: &[u8],
    ) -> Result<Option<(FragmentHeader, Vec<u8>)>, ProtocolError> {
        let payload = match self.header {
            None => {
                let header = FragmentHeader::parse(packet)?;
                self.header = Some(header);
                self.buffer.clear();
                &packet[FRAGMENT_HEADER_LEN..]
            }
            Some(_) => packet,
        };

        let Some(header) = self.header else {
            return Ok(None);
        };
        let attempted = self.buffer.len() + payload.len();
        if attempted > usize::from(header.total_len) {
            self.reset();
            return Err(ProtocolError::FragmentOverflow {
                capacity: usize::from(header.total_len),
                attempted,
            });
        }
        self.buffer.extend_from_slice(payload);

        if self.buffer.len() == usize::from(header.total_len) {
            self.header = None;
            return Ok(Some((header, core::mem::take(&mut self.buffer))));
        }
        Ok(None)
    }

    pub fn reset(&mut self) {
        self.header = None;
        self.buffer.clear();
    }

    pub fn is_active(&self) -> bool {
        self.header.is_some()
    }
}

impl Default for ChunkCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
