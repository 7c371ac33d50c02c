//! Outbound session events.
//!
//! The [`Session`](crate::session::Session) emits these through the
//! [`EventSink`] port.  UI collaborators on the other side decide what to do
//! with them: route to the setup wizard, unlock the dashboard, refresh a
//! screen bound to a resource.
//!
//! ```text
//!  Connecting ─▶ SetupStatus ─▶ Ready ─▶ StateUpdated* ─▶ SyncFinished
//!                                          │
//!                     ExclusiveStarted ◀───┴──▶ Disconnected
//!                            │
//!                     ExclusiveEnded
//! ```

use core::fmt;

use crate::state::Resource;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A connect attempt started.
    Connecting { device: String },
    /// Phase 0 finished; `complete` routes the UI to the dashboard or the
    /// setup wizard. `None` when the status could not be read.
    SetupStatus { complete: Option<bool> },
    /// Phase 1 finished; the UI is interactive.
    Ready,
    /// Phase 2 finished with `failures` best-effort steps failing.
    SyncFinished { failures: usize },
    /// A completed read or accepted notification replaced a resource.
    StateUpdated(Resource),
    ExclusiveStarted,
    ExclusiveEnded,
    /// The session is gone.
    Disconnected { reason: DisconnectReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The app asked for it.
    Requested,
    /// The peer or the radio dropped the link.
    LinkLost,
    /// The radio could not open the link.
    ConnectFailed,
    /// Phase 1 could not complete.
    SyncFailed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::LinkLost => write!(f, "link lost"),
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::SyncFailed => write!(f, "essential sync failed"),
        }
    }
}

/// Receives every [`LinkEvent`] in emission order.
pub trait EventSink {
    fn emit(&self, event: &LinkEvent);
}

/// Discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &LinkEvent) {}
}

/// Forwards to a closure; handy for bridging into UI state containers.
impl<F: Fn(&LinkEvent)> EventSink for F {
    fn emit(&self, event: &LinkEvent) {
        self(event);
    }
}
