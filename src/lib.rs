//! AutoWatering device-communication library.
//!
//! Everything between the app and an irrigation controller's BLE link:
//! one serialized operation queue per connection, framing for the
//! controller's three wire protocols, notification correlation, and the
//! session lifecycle (phased sync, exclusive windows, pairing retry).
//!
//! ```text
//!   app / UI ──▶ Session ──▶ Link ──▶ OperationQueue ──▶ Transport (radio)
//!                  ▲                                          │
//!                  └── dispatch ◀── framing ◀── notifications ┘
//! ```
//!
//! The radio itself sits behind the [`link::Transport`] port; the host
//! application provides it, a logger, and an executor to poll
//! [`session::Session::run`].

#![deny(unused_must_use)]

pub mod config;
pub mod correlate;
pub mod error;
pub mod events;
pub mod framing;
pub mod gatt;
pub mod layout;
pub mod link;
pub mod model;
pub mod session;
pub mod state;

pub use config::LinkConfig;
pub use error::{Error, ProtocolError, Result, TransportError};
pub use events::{DisconnectReason, EventSink, LinkEvent};
pub use link::{Endpoint, Transport};
pub use session::{LinkState, Session};
pub use state::{Capability, CapabilityState, Resource};
