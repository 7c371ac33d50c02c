//! Unified error types for the device link.
//!
//! Every fallible operation in the crate funnels into [`Error`], so a
//! caller awaiting a read, a correlated notification or a connect attempt
//! handles one type.  Variants are `Clone` because a single deduplicated
//! outcome is handed to every caller that joined the same in-flight request.
//!
//! ```text
//!  TransportError ──┐
//!  ProtocolError  ──┼──▶ Error ──▶ class() ──▶ Transient (retried)
//!  deadlines      ──┘                      └──▶ Permanent (surfaced)
//! ```

use core::fmt;

use crate::framing::unified::Status;

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

/// How the retry governor treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Congestion or a missed deadline. Worth another attempt.
    Transient,
    /// Retrying cannot help.
    Permanent,
}

// ---------------------------------------------------------------------------
// Transport adapter errors
// ---------------------------------------------------------------------------

/// Failures reported by the [`Transport`](crate::link::transport::Transport) adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The radio stack gave up waiting for the peer.
    Timeout,
    /// Another GATT operation is in progress or the controller is congested.
    Busy,
    /// The peripheral does not expose the requested service.
    ServiceNotFound,
    /// The service exists but the characteristic does not.
    CharacteristicNotFound,
    /// `stop_notifications` on an endpoint that was never subscribed.
    NotSubscribed,
    /// The peer demands an encrypted (bonded) link.
    AuthenticationFailed,
    /// The link is down.
    Disconnected,
    /// Anything else the adapter could not map.
    Io(String),
}

impl TransportError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout | Self::Busy => FailureClass::Transient,
            _ => FailureClass::Permanent,
        }
    }

    /// Missing service or characteristic; flips capability probes to `Absent`.
    pub fn is_missing_endpoint(&self) -> bool {
        matches!(self, Self::ServiceNotFound | Self::CharacteristicNotFound)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "GATT operation timed out"),
            Self::Busy => write!(f, "GATT busy"),
            Self::ServiceNotFound => write!(f, "service not found"),
            Self::CharacteristicNotFound => write!(f, "characteristic not found"),
            Self::NotSubscribed => write!(f, "not subscribed"),
            Self::AuthenticationFailed => write!(f, "insufficient authentication"),
            Self::Disconnected => write!(f, "link disconnected"),
            Self::Io(msg) => write!(f, "transport I/O: {msg}"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

/// Malformed or unexpected bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than the header or structure requires.
    Undersized { expected: usize, actual: usize },
    /// The reassembly buffer cannot take another fragment.
    FragmentOverflow { capacity: usize, attempted: usize },
    /// A fragment arrived out of order.
    UnexpectedSequence { expected: u8, got: u8 },
    /// A continuation fragment belongs to a different data type.
    UnexpectedDataType { expected: u8, got: u8 },
    /// The device answered with a non-success unified status.
    Status { data_type: u8, status: Status },
    /// The outbound payload does not fit the 16-bit size field.
    PayloadTooLarge(usize),
    /// Unknown encoding tag in an outbound fragment header.
    UnknownEncoding(u8),
    /// A field value cannot be represented in its wire slot.
    FieldRange(&'static str),
    /// A field was missing or of the wrong kind when encoding.
    FieldMismatch(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undersized { expected, actual } => {
                write!(f, "payload too short: expected {expected} bytes, got {actual}")
            }
            Self::FragmentOverflow {
                capacity,
                attempted,
            } => write!(
                f,
                "fragment overflow: {attempted} bytes into a {capacity}-byte buffer"
            ),
            Self::UnexpectedSequence { expected, got } => {
                write!(f, "fragment out of order: expected {expected}, got {got}")
            }
            Self::UnexpectedDataType { expected, got } => {
                write!(f, "data type changed mid-stream: 0x{expected:02X} -> 0x{got:02X}")
            }
            Self::Status { data_type, status } => {
                write!(f, "device status for 0x{data_type:02X}: {status}")
            }
            Self::PayloadTooLarge(len) => {
                write!(f, "payload of {len} bytes exceeds u16 size field")
            }
            Self::UnknownEncoding(tag) => write!(f, "unknown fragment encoding tag 0x{tag:02X}"),
            Self::FieldRange(name) => write!(f, "field `{name}` out of range"),
            Self::FieldMismatch(name) => write!(f, "field `{name}` missing or wrong kind"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every logical operation settles with a value or one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The transport adapter failed.
    Transport(TransportError),
    /// The bytes could not be interpreted.
    Protocol(ProtocolError),
    /// A queued attempt or a correlated request exceeded its deadline.
    Timeout,
    /// A newer request for the same key, or a newer connect attempt, won.
    Superseded,
    /// The session was torn down while the operation was outstanding.
    Disconnected,
    /// No session is connected.
    NotConnected,
    /// `connect` while another attempt is still connecting.
    AlreadyConnecting,
    /// The link is reserved by an exclusive-access window.
    Exclusive,
    /// The future that owned the request was dropped before it settled.
    Cancelled,
}

impl Error {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Transport(e) => e.class(),
            Self::Timeout => FailureClass::Transient,
            _ => FailureClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    pub fn is_missing_endpoint(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_missing_endpoint())
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Transport(TransportError::AuthenticationFailed))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Timeout => write!(f, "deadline exceeded"),
            Self::Superseded => write!(f, "superseded by a newer request"),
            Self::Disconnected => write!(f, "session disconnected"),
            Self::NotConnected => write!(f, "not connected"),
            Self::AlreadyConnecting => write!(f, "a connection attempt is already in progress"),
            Self::Exclusive => write!(f, "link reserved for exclusive access"),
            Self::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl core::error::Error for Error {}
impl core::error::Error for TransportError {}
impl core::error::Error for ProtocolError {}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
