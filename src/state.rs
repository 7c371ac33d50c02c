//! Shared device state and the per-session capability cache.
//!
//! The device is the sole source of truth.  [`DeviceState`] is written only
//! by the inbound dispatcher (completed reads, accepted notifications);
//! writes issued by the app never touch it, they are followed by a
//! confirming read instead.

use core::fmt;
use std::collections::HashMap;

use log::info;

use crate::error::{Error, Result, TransportError};
use crate::layout::Record;

/// A synchronized resource on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Onboarding,
    ValveStatus,
    SystemStatus,
    Flow,
    SystemConfig,
    ChannelConfig(u8),
    Alarm,
    CurrentTask,
    Environment,
    Rain,
    Compensation,
}

impl Resource {
    /// Bind a per-channel resource to the channel named inside `record`.
    pub fn bind(self, record: &Record) -> Self {
        match self {
            Self::ChannelConfig(_) => {
                let channel = record.uint("channel_id").unwrap_or(0);
                Self::ChannelConfig(u8::try_from(channel).unwrap_or(u8::MAX))
            }
            other => other,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelConfig(ch) => write!(f, "channel_config[{ch}]"),
            other => write!(f, "{}", format!("{other:?}").to_lowercase()),
        }
    }
}

/// Last known value of every resource.
#[derive(Debug, Default)]
pub struct DeviceState {
    records: HashMap<Resource, Record>,
}

impl DeviceState {
    pub fn apply(&mut self, resource: Resource, record: Record) {
        self.records.insert(resource, record);
    }

    pub fn get(&self, resource: Resource) -> Option<&Record> {
        self.records.get(&resource)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

// ── Capabilities ─────────────────────────────────────────────

/// Optional controller features, discovered lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    RainSensor,
    EnvironmentSensor,
    Compensation,
    History,
}

impl Capability {
    const COUNT: usize = 4;

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapabilityState {
    #[default]
    Unknown,
    Present,
    Absent,
}

/// Tri-state flag per capability; every flag returns to `Unknown` on
/// disconnect.
#[derive(Debug, Default)]
pub struct Capabilities {
    states: [CapabilityState; Capability::COUNT],
}

impl Capabilities {
    pub fn get(&self, cap: Capability) -> CapabilityState {
        self.states[cap.index()]
    }

    /// Short-circuit an access to a capability known to be absent.
    pub fn check(&self, cap: Capability) -> Result<()> {
        match self.get(cap) {
            CapabilityState::Absent => {
                Err(Error::Transport(TransportError::CharacteristicNotFound))
            }
            _ => Ok(()),
        }
    }

    /// Learn from the outcome of an access. Only success and missing
    /// endpoints are conclusive.
    pub fn observe<T>(&mut self, cap: Capability, outcome: &Result<T>) {
        let next = match outcome {
            Ok(_) => CapabilityState::Present,
            Err(e) if e.is_missing_endpoint() => CapabilityState::Absent,
            Err(_) => return,
        };
        let slot = &mut self.states[cap.index()];
        if *slot != next {
            info!("capability: {cap:?} -> {next:?}");
            *slot = next;
        }
    }

    pub fn reset(&mut self) {
        self.states = [CapabilityState::Unknown; Capability::COUNT];
    }
}
