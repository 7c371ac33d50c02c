//! Session lifecycle manager — one connection to one controller.
//!
//! ```text
//!                connect / reconnect
//!  Disconnected ─────────────────────▶ Connecting
//!       ▲                                  │ Phase 0: setup status
//!       │                                  │ Phase 1: essential reads
//!       │  disconnect / link lost          ▼
//!       ├─────────────────────────────  Connected ◀──┐
//!       │                                  │         │ end_exclusive
//!       │                   begin_exclusive ▼         │
//!       └─────────────────────────────  Exclusive ───┘
//! ```
//!
//! Every connect attempt takes a fresh, monotonically increasing
//! connection id.  Continuations capture the id they were started under
//! and re-check it before touching shared state, so a superseded attempt
//! finishes as a no-op returning [`Error::Superseded`].
//!
//! The session is cooperative and single-threaded: [`Session::run`] drives
//! the operation queue's consumer loop and the Phase 2 background worker,
//! and must be polled (spawned on a local executor) for as long as the
//! session is in use.

mod dispatch;
mod exclusive;
mod pairing;
mod requests;
mod sync;

use core::cell::{Cell, RefCell};
use core::fmt;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use futures_lite::future;
use log::{error, info, warn};

use crate::config::{ConfigError, LinkConfig};
use crate::correlate::{Deduplicator, PendingRequests, RequestKey};
use crate::error::{Error, Result};
use crate::events::{DisconnectReason, EventSink, LinkEvent};
use crate::layout::Record;
use crate::link::{
    DisconnectHandler, Endpoint, Link, NotificationHandler, OperationQueue, Transport,
};
use crate::state::{Capabilities, Capability, CapabilityState, DeviceState, Resource};

use dispatch::Reassembly;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, with the link reserved for a bulk transfer.
    Exclusive,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Exclusive => write!(f, "exclusive"),
        }
    }
}

struct SessionInner<T> {
    transport: Rc<T>,
    config: Rc<LinkConfig>,
    events: Rc<dyn EventSink>,
    queue: OperationQueue,
    pending: PendingRequests,
    /// Keyed by connection so a late follower never joins a dead flight.
    reads: Deduplicator<(u64, Resource), Record>,
    fetches: Deduplicator<(u64, RequestKey), Vec<u8>>,

    link_state: Cell<LinkState>,
    connection_id: Cell<u64>,
    device: RefCell<Option<Rc<str>>>,
    /// The transport accepted the current attempt's connect.
    opened: Cell<bool>,
    /// Set by the disconnect hook while still connecting.
    link_dropped: Cell<bool>,
    pairing_interrupt: Signal<NoopRawMutex, ()>,
    /// Carries the connection id Phase 2 should run for.
    background: Signal<NoopRawMutex, u64>,
    exclusive_released: Signal<NoopRawMutex, ()>,

    state: RefCell<DeviceState>,
    capabilities: RefCell<Capabilities>,
    subscriptions: RefCell<BTreeSet<Endpoint>>,
    reassembly: RefCell<Reassembly>,
}

/// Handle to a device session. Clones share the session.
pub struct Session<T> {
    inner: Rc<SessionInner<T>>,
}

impl<T> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> Session<T> {
    pub fn new(
        transport: Rc<T>,
        config: LinkConfig,
        events: Rc<dyn EventSink>,
    ) -> core::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Rc::new(SessionInner {
                transport,
                config: Rc::new(config),
                events,
                queue: OperationQueue::new(),
                pending: PendingRequests::new(),
                reads: Deduplicator::new(),
                fetches: Deduplicator::new(),
                link_state: Cell::new(LinkState::Disconnected),
                connection_id: Cell::new(0),
                device: RefCell::new(None),
                opened: Cell::new(false),
                link_dropped: Cell::new(false),
                pairing_interrupt: Signal::new(),
                background: Signal::new(),
                exclusive_released: Signal::new(),
                state: RefCell::new(DeviceState::default()),
                capabilities: RefCell::new(Capabilities::default()),
                subscriptions: RefCell::new(BTreeSet::new()),
                reassembly: RefCell::new(Reassembly::default()),
            }),
        })
    }

    /// Drive the operation queue and the background sync worker.
    pub async fn run(&self) {
        future::or(self.inner.queue.run(), self.background_worker()).await;
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn state(&self) -> LinkState {
        self.inner.link_state.get()
    }

    pub fn connection_id(&self) -> u64 {
        self.inner.connection_id.get()
    }

    pub fn device(&self) -> Option<Rc<str>> {
        self.inner.device.borrow().clone()
    }

    pub fn is_exclusive(&self) -> bool {
        self.state() == LinkState::Exclusive
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    pub fn capability(&self, cap: Capability) -> CapabilityState {
        self.inner.capabilities.borrow().get(cap)
    }

    /// Last value the device reported for `resource`.
    pub fn snapshot(&self, resource: Resource) -> Option<Record> {
        self.inner.state.borrow().get(resource).cloned()
    }

    /// Endpoints with notifications currently enabled.
    pub fn subscriptions(&self) -> Vec<Endpoint> {
        self.inner.subscriptions.borrow().iter().copied().collect()
    }

    /// Raw queue-backed access for bulk transfers inside an exclusive window.
    pub fn link(&self) -> Result<Link<T>> {
        match self.state() {
            LinkState::Connected | LinkState::Exclusive => self.inner.link(),
            _ => Err(Error::NotConnected),
        }
    }

    // ── Connect / disconnect ─────────────────────────────────

    /// Connect and run the initial sync through Phase 1.
    ///
    /// Resolves once the UI may go interactive; Phase 2 continues in the
    /// background on [`Session::run`].
    pub async fn connect(&self, device: &str) -> Result<()> {
        match self.state() {
            LinkState::Connecting => return Err(Error::AlreadyConnecting),
            LinkState::Connected | LinkState::Exclusive => {
                if self.device().as_deref() == Some(device) {
                    return Ok(());
                }
                self.disconnect().await?;
            }
            LinkState::Disconnected => {}
        }
        self.establish(device).await
    }

    /// Start a fresh attempt regardless of what is in progress.
    ///
    /// An attempt still connecting is superseded: its continuation returns
    /// [`Error::Superseded`] and leaves the new attempt's state alone.
    pub async fn reconnect(&self, device: &str) -> Result<()> {
        if self.state() != LinkState::Disconnected {
            let old = self.inner.link().ok();
            self.inner.teardown(DisconnectReason::Requested);
            if let Some(old) = old {
                if let Err(e) = old.disconnect().await {
                    warn!("session: closing superseded link failed: {e}");
                }
            }
        }
        self.establish(device).await
    }

    /// Tear down the session and close the link.
    pub async fn disconnect(&self) -> Result<()> {
        if self.state() == LinkState::Disconnected {
            return Ok(());
        }
        let link = self.inner.link().ok();
        self.inner.teardown(DisconnectReason::Requested);
        if let Some(link) = link {
            if let Err(e) = link.disconnect().await {
                warn!("session: transport disconnect failed: {e}");
            }
        }
        Ok(())
    }

    async fn establish(&self, device: &str) -> Result<()> {
        let inner = &self.inner;
        let id = inner.connection_id.get().wrapping_add(1);
        inner.connection_id.set(id);
        *inner.device.borrow_mut() = Some(Rc::from(device));
        inner.link_state.set(LinkState::Connecting);
        inner.link_dropped.set(false);
        inner.pairing_interrupt.reset();

        info!("session: connecting to {device} (connection {id})");
        inner.events.emit(&LinkEvent::Connecting {
            device: device.to_owned(),
        });

        match self.bring_up(id).await {
            Ok(()) => Ok(()),
            Err(_) if !inner.is_current(id) => {
                info!("session: connection {id} superseded");
                Err(Error::Superseded)
            }
            Err(e) => {
                let link = inner.link().ok();
                let opened = inner.opened.get();
                let reason = if opened {
                    DisconnectReason::SyncFailed
                } else {
                    DisconnectReason::ConnectFailed
                };
                error!("session: connection {id} failed: {e}");
                inner.teardown(reason);
                if opened {
                    if let Some(link) = link {
                        if let Err(close) = link.disconnect().await {
                            warn!("session: transport disconnect failed: {close}");
                        }
                    }
                }
                Err(e)
            }
        }
    }

    async fn bring_up(&self, id: u64) -> Result<()> {
        let inner = &self.inner;
        inner.opened.set(false);
        inner.link()?.connect(self.disconnect_hook(id)).await?;
        inner.ensure_current(id)?;
        inner.opened.set(true);

        self.negotiate(id).await;
        self.phase0(id).await?;
        self.phase1(id).await?;

        inner.ensure_current(id)?;
        inner.link_state.set(LinkState::Connected);
        info!("session: connection {id} ready");
        inner.events.emit(&LinkEvent::Ready);
        inner.background.signal(id);
        Ok(())
    }

    fn disconnect_hook(&self, id: u64) -> DisconnectHandler {
        let weak: Weak<SessionInner<T>> = Rc::downgrade(&self.inner);
        Rc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_link_lost(id);
            }
        })
    }

    fn notification_handler(&self, id: u64, endpoint: Endpoint) -> NotificationHandler {
        let weak: Weak<SessionInner<T>> = Rc::downgrade(&self.inner);
        Rc::new(move |bytes: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                if inner.is_current(id) {
                    inner.on_notification(endpoint, bytes);
                }
            }
        })
    }

    /// Enable notifications on `endpoint` under connection `id`.
    async fn subscribe_endpoint(&self, id: u64, endpoint: Endpoint) -> Result<()> {
        let inner = &self.inner;
        let capability = crate::gatt::lookup(endpoint).and_then(|c| c.capability);
        if let Some(cap) = capability {
            inner.capabilities.borrow().check(cap)?;
        }
        let handler = self.notification_handler(id, endpoint);
        let outcome = inner.link()?.subscribe(endpoint, handler).await;
        inner.ensure_current(id)?;
        if let Some(cap) = capability {
            inner.capabilities.borrow_mut().observe(cap, &outcome);
        }
        outcome?;
        inner.subscriptions.borrow_mut().insert(endpoint);
        Ok(())
    }
}

impl<T: Transport + 'static> SessionInner<T> {
    fn is_current(&self, id: u64) -> bool {
        self.connection_id.get() == id
    }

    fn ensure_current(&self, id: u64) -> Result<()> {
        if self.is_current(id) {
            Ok(())
        } else {
            Err(Error::Superseded)
        }
    }

    fn link(&self) -> Result<Link<T>> {
        let device = self.device.borrow().clone().ok_or(Error::NotConnected)?;
        Ok(Link::new(
            Rc::clone(&self.transport),
            self.queue.clone(),
            device,
            Rc::clone(&self.config),
        ))
    }

    /// Connection id for a caller-facing request.
    fn usable(&self) -> Result<u64> {
        match self.link_state.get() {
            LinkState::Connected => Ok(self.connection_id.get()),
            LinkState::Exclusive => Err(Error::Exclusive),
            LinkState::Disconnected | LinkState::Connecting => Err(Error::NotConnected),
        }
    }

    fn on_link_lost(&self, id: u64) {
        if !self.is_current(id) {
            return;
        }
        match self.link_state.get() {
            LinkState::Disconnected => {}
            LinkState::Connecting => {
                // Pairing prompts drop the link on some stacks; the sync
                // path decides whether to reconnect.
                warn!("session: link dropped while connecting");
                self.link_dropped.set(true);
                self.pairing_interrupt.signal(());
            }
            LinkState::Connected | LinkState::Exclusive => {
                warn!("session: link lost (connection {id})");
                self.teardown(DisconnectReason::LinkLost);
            }
        }
    }

    /// Invalidate everything belonging to the current connection.
    fn teardown(&self, reason: DisconnectReason) {
        let stale = self.connection_id.get();
        self.connection_id.set(stale.wrapping_add(1));
        self.link_state.set(LinkState::Disconnected);

        self.queue.reset();
        self.pending.reject_all(&Error::Disconnected);
        self.capabilities.borrow_mut().reset();
        self.reassembly.borrow_mut().reset();
        self.subscriptions.borrow_mut().clear();
        self.state.borrow_mut().clear();
        self.device.borrow_mut().take();
        self.opened.set(false);
        self.link_dropped.set(false);
        // Wake a background worker parked on an exclusive window.
        self.exclusive_released.signal(());

        info!("session: connection {stale} closed ({reason})");
        self.events.emit(&LinkEvent::Disconnected { reason });
    }

    fn apply_record(&self, id: u64, resource: Resource, record: Record) {
        if !self.is_current(id) {
            return;
        }
        let resource = resource.bind(&record);
        self.state.borrow_mut().apply(resource, record);
        self.events.emit(&LinkEvent::StateUpdated(resource));
    }
}
