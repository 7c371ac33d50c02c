//! Pending-request correlator — matches inbound notifications to waiters.
//!
//! A caller registers a [`RequestKey`] *before* writing the request that
//! provokes the notification, then awaits the returned [`PendingRequest`].
//! The inbound dispatcher calls [`PendingRequests::resolve`] or
//! [`PendingRequests::reject`] with the same key.
//!
//! Each slot is a single-assignment `embassy-sync` [`Signal`]:
//!
//! - registering over an occupied key rejects the occupant with
//!   [`Error::Superseded`] and installs the newcomer;
//! - an unresolved slot rejects itself with [`Error::Timeout`] and is
//!   removed from the map;
//! - dropping a `PendingRequest` removes its slot, but only if the slot is
//!   still its own.

use core::cell::{Cell, RefCell};
use core::fmt;
use core::time::Duration;
use std::collections::HashMap;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use log::debug;

use crate::error::{Error, Result};
use crate::link::retry::with_deadline;

/// Semantic identity of an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKey {
    /// A streamed unified message of this data type.
    DataType(u8),
    /// One page of a paged unified exchange.
    Page { data_type: u8, page: u8 },
    /// Per-channel structure (channel configuration, statistics).
    Channel { characteristic: u16, channel: u8 },
    /// Whatever the endpoint pushes next.
    Endpoint(u16),
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataType(t) => write!(f, "type:0x{t:02X}"),
            Self::Page { data_type, page } => write!(f, "type:0x{data_type:02X}/page:{page}"),
            Self::Channel {
                characteristic,
                channel,
            } => write!(f, "char:{characteristic:04x}/ch:{channel}"),
            Self::Endpoint(c) => write!(f, "char:{c:04x}"),
        }
    }
}

type Outcome = Result<Vec<u8>>;

struct Slot {
    token: u64,
    signal: Signal<NoopRawMutex, Outcome>,
}

type SlotMap = RefCell<HashMap<RequestKey, Rc<Slot>>>;

/// Keyed map of pending requests. Clone shares the map.
#[derive(Clone, Default)]
pub struct PendingRequests {
    slots: Rc<SlotMap>,
    next_token: Rc<Cell<u64>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a slot for `key`, superseding any occupant.
    pub fn register(&self, key: RequestKey) -> PendingRequest {
        let token = self.next_token.get().wrapping_add(1);
        self.next_token.set(token);

        let slot = Rc::new(Slot {
            token,
            signal: Signal::new(),
        });
        let previous = self.slots.borrow_mut().insert(key, Rc::clone(&slot));
        if let Some(old) = previous {
            debug!("pending: {key} superseded");
            old.signal.signal(Err(Error::Superseded));
        }

        PendingRequest {
            key,
            slot,
            slots: Rc::clone(&self.slots),
        }
    }

    /// Register and wait in one step.
    pub async fn await_notification(&self, key: RequestKey, timeout: Duration) -> Outcome {
        self.register(key).wait(timeout).await
    }

    /// Fulfil the waiter for `key`. Returns `false` when nobody is waiting.
    pub fn resolve(&self, key: RequestKey, payload: Vec<u8>) -> bool {
        self.settle(key, Ok(payload))
    }

    /// Fail the waiter for `key`. Returns `false` when nobody is waiting.
    pub fn reject(&self, key: RequestKey, error: Error) -> bool {
        self.settle(key, Err(error))
    }

    /// Fail every waiter (session teardown).
    pub fn reject_all(&self, error: &Error) {
        let drained: Vec<(RequestKey, Rc<Slot>)> = self.slots.borrow_mut().drain().collect();
        if !drained.is_empty() {
            debug!("pending: rejecting {} waiter(s): {error}", drained.len());
        }
        for (_, slot) in drained {
            slot.signal.signal(Err(error.clone()));
        }
    }

    /// Reject every page waiter of `data_type` (a paged exchange failed
    /// before its page index was known).
    pub fn reject_pages(&self, data_type: u8, error: &Error) -> usize {
        let keys: Vec<RequestKey> = self
            .slots
            .borrow()
            .keys()
            .filter(|k| matches!(k, RequestKey::Page { data_type: t, .. } if *t == data_type))
            .copied()
            .collect();
        keys.into_iter()
            .filter(|k| self.settle(*k, Err(error.clone())))
            .count()
    }

    pub fn contains(&self, key: RequestKey) -> bool {
        self.slots.borrow().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    fn settle(&self, key: RequestKey, outcome: Outcome) -> bool {
        let Some(slot) = self.slots.borrow_mut().remove(&key) else {
            return false;
        };
        slot.signal.signal(outcome);
        true
    }
}

/// Handle to one registered slot.
pub struct PendingRequest {
    key: RequestKey,
    slot: Rc<Slot>,
    slots: Rc<SlotMap>,
}

impl PendingRequest {
    pub fn key(&self) -> RequestKey {
        self.key
    }

    /// Wait for the slot to settle or for `timeout` to pass.
    pub async fn wait(self, timeout: Duration) -> Outcome {
        let outcome = with_deadline(timeout, async { self.slot.signal.wait().await }).await;
        if outcome == Err(Error::Timeout) {
            debug!("pending: {} timed out after {}ms", self.key, timeout.as_millis());
        }
        outcome
        // `self` drops here and clears the slot if it is still ours.
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        let mut slots = self.slots.borrow_mut();
        if slots
            .get(&self.key)
            .is_some_and(|current| current.token == self.slot.token)
        {
            slots.remove(&self.key);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
