//! Transport abstraction — the radio/GATT adapter the link drives.
//!
//! Concrete implementations live in the host application (platform BLE
//! plugin, desktop BlueZ bridge, or a scripted mock in tests).  The link is
//! generic over `Transport`, so swapping the radio stack requires zero
//! changes to queueing, framing or correlation.
//!
//! Every method is invoked from exactly one place: the operation queue's
//! consumer loop, or the session lifecycle code after the queue has been
//! reset.  Implementations never see two overlapping calls.

use core::fmt;
use std::rc::Rc;

use crate::error::TransportError;

/// An addressable GATT characteristic on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub service: u128,
    pub characteristic: u128,
}

impl Endpoint {
    pub const fn new(service: u128, characteristic: u128) -> Self {
        Self {
            service,
            characteristic,
        }
    }

    /// The 16-bit discriminator the firmware docs use (last UUID group).
    pub const fn short_id(&self) -> u16 {
        (self.characteristic & 0xFFFF) as u16
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "char:{:04x}", self.short_id())
    }
}

/// Link-layer connection interval preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPriority {
    Balanced,
    High,
    LowPower,
}

/// Invoked by the adapter for every inbound notification on a subscribed endpoint.
pub type NotificationHandler = Rc<dyn Fn(&[u8])>;

/// Invoked by the adapter when the peer drops the link.
pub type DisconnectHandler = Rc<dyn Fn()>;

/// GATT client operations consumed by the link.
pub trait Transport {
    /// Open a connection. `on_disconnect` fires on peer-initiated loss only.
    async fn connect(&self, device: &str, on_disconnect: DisconnectHandler)
    -> Result<(), TransportError>;

    async fn disconnect(&self, device: &str) -> Result<(), TransportError>;

    async fn read(&self, device: &str, endpoint: Endpoint) -> Result<Vec<u8>, TransportError>;

    async fn write(&self, device: &str, endpoint: Endpoint, data: &[u8])
    -> Result<(), TransportError>;

    async fn write_without_response(
        &self,
        device: &str,
        endpoint: Endpoint,
        data: &[u8],
    ) -> Result<(), TransportError>;

    async fn start_notifications(
        &self,
        device: &str,
        endpoint: Endpoint,
        handler: NotificationHandler,
    ) -> Result<(), TransportError>;

    async fn stop_notifications(&self, device: &str, endpoint: Endpoint)
    -> Result<(), TransportError>;

    /// Best effort; adapters without the knob keep the default.
    async fn request_connection_priority(
        &self,
        _device: &str,
        _priority: ConnectionPriority,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    /// Best effort; adapters whose OS bonds implicitly keep the default.
    async fn create_bond(&self, _device: &str) -> Result<(), TransportError> {
        Ok(())
    }
}
