//! Phased initial synchronization.
//!
//! | Phase | What                                   | On failure            |
//! |-------|----------------------------------------|-----------------------|
//! | 0     | one fast read of setup-completion      | routed as "unknown"   |
//! | 1     | essential reads, short pauses between  | tear the session down |
//! | 2     | subscriptions, channel configs, aux    | logged, non-fatal     |
//!
//! Phases 0 and 1 run inside `connect`.  Phase 2 runs on the background
//! worker polled by [`Session::run`] while the UI is already interactive,
//! and pauses for the length of any exclusive window.

use anyhow::Context;
use async_io_mini::Timer;
use log::{debug, info, warn};

use super::{LinkState, Session};
use crate::error::Result;
use crate::events::LinkEvent;
use crate::gatt::{
    self, AUXILIARY_READS, BACKGROUND_SUBSCRIPTIONS, ESSENTIAL_READS, ESSENTIAL_SUBSCRIPTIONS,
};
use crate::layout::Value;
use crate::link::{ConnectionPriority, RetryPolicy, Transport};
use crate::state::{CapabilityState, Resource};

impl<T: Transport + 'static> Session<T> {
    /// Best-effort link tuning. Failures are logged and ignored.
    pub(super) async fn negotiate(&self, id: u64) {
        let Ok(link) = self.inner.link() else {
            return;
        };
        if let Err(e) = link.request_priority(ConnectionPriority::High).await {
            warn!("sync: connection priority request failed: {e}");
        }
        if !self.inner.is_current(id) {
            return;
        }
        if let Err(e) = link.create_bond().await {
            warn!("sync: bond request failed: {e}");
        }
    }

    /// Phase 0: setup-completion status, for UI routing only.
    pub(super) async fn phase0(&self, id: u64) -> Result<()> {
        let policy = RetryPolicy::single_shot(self.inner.config.retry.attempt_timeout_ms);
        let complete = match self.read_with_pairing(id, Resource::Onboarding, policy).await {
            Ok(record) => record.get("setup_complete").and_then(Value::as_bool),
            Err(e) => {
                self.inner.ensure_current(id)?;
                warn!("sync: setup status unavailable: {e}");
                None
            }
        };
        self.inner.ensure_current(id)?;
        debug!("sync: setup complete = {complete:?}");
        self.inner.events.emit(&LinkEvent::SetupStatus { complete });
        Ok(())
    }

    /// Phase 1: the reads a usable session cannot do without.
    pub(super) async fn phase1(&self, id: u64) -> Result<()> {
        let policy = self.inner.config.retry;
        for (i, &resource) in ESSENTIAL_READS.iter().enumerate() {
            if i > 0 {
                Timer::after(self.inner.config.essential_read_delay()).await;
            }
            self.inner.ensure_current(id)?;

            match self.read_with_pairing(id, resource, policy).await {
                Ok(_) => {}
                Err(e) if e.is_missing_endpoint() && is_optional(resource) => {
                    info!("sync: {resource} not fitted on this controller");
                }
                Err(e) if e.is_auth_failure() => {
                    warn!("sync: {resource} still unauthenticated, continuing");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // ── Phase 2 ──────────────────────────────────────────────

    pub(super) async fn background_worker(&self) {
        loop {
            let id = self.inner.background.wait().await;
            if !self.inner.is_current(id) {
                continue;
            }
            let Some(failures) = self.background_sync(id).await else {
                debug!("sync: background pass for connection {id} abandoned");
                continue;
            };
            if self.inner.is_current(id) {
                info!("sync: background pass finished, {failures} step(s) failed");
                self.inner.events.emit(&LinkEvent::SyncFinished { failures });
            }
        }
    }

    /// Returns the number of failed steps, or `None` when the connection
    /// went away mid-pass.
    async fn background_sync(&self, id: u64) -> Option<usize> {
        let inner = &self.inner;
        let pause = inner.config.background_step_delay();
        let mut failures = 0usize;
        let mut note = |step: anyhow::Result<()>| {
            if let Err(e) = step {
                warn!("sync: {e:#}");
                failures += 1;
            }
        };

        // Essential subscriptions first so the UI sees live valve state
        // as early as possible.
        for &endpoint in ESSENTIAL_SUBSCRIPTIONS.iter().chain(BACKGROUND_SUBSCRIPTIONS) {
            if !self.background_gate(id).await {
                return None;
            }
            if inner.subscriptions.borrow().contains(&endpoint) || self.endpoint_absent(endpoint) {
                continue;
            }
            let name = gatt::lookup(endpoint).map_or("?", |c| c.name);
            let step = self.subscribe_endpoint(id, endpoint).await;
            if !tolerable(&step, is_optional_endpoint(endpoint)) {
                note(step.with_context(|| format!("subscribe {name}")));
            }
            Timer::after(pause).await;
        }

        let channels = self.channel_count();
        for channel in 0..channels {
            if !self.background_gate(id).await {
                return None;
            }
            let step = self
                .fetch_resource(id, Resource::ChannelConfig(channel), inner.config.retry)
                .await
                .map(drop)
                .with_context(|| format!("read channel {channel} config"));
            note(step);
            Timer::after(pause).await;
        }

        for &resource in AUXILIARY_READS {
            if !self.background_gate(id).await {
                return None;
            }
            if self.resource_absent(resource) {
                continue;
            }
            let step = self
                .fetch_resource(id, resource, inner.config.retry)
                .await
                .map(drop);
            if !tolerable(&step, is_optional(resource)) {
                note(step.with_context(|| format!("read {resource}")));
            }
            Timer::after(pause).await;
        }

        inner.is_current(id).then_some(failures)
    }

    /// Wait out any exclusive window. `false` once the connection is gone.
    async fn background_gate(&self, id: u64) -> bool {
        loop {
            if !self.inner.is_current(id) {
                return false;
            }
            if self.inner.link_state.get() != LinkState::Exclusive {
                return true;
            }
            debug!("sync: background work deferred by exclusive window");
            self.inner.exclusive_released.wait().await;
        }
    }

    /// Channels the controller reports, capped by configuration.
    fn channel_count(&self) -> u8 {
        let configured = self.inner.config.channel_count;
        self.inner
            .state
            .borrow()
            .get(Resource::SystemConfig)
            .and_then(|r| r.uint("channel_count"))
            .and_then(|n| u8::try_from(n).ok())
            .filter(|&n| n > 0)
            .map_or(configured, |n| n.min(configured))
    }

    pub(super) fn endpoint_absent(&self, endpoint: crate::link::Endpoint) -> bool {
        gatt::lookup(endpoint)
            .and_then(|c| c.capability)
            .is_some_and(|cap| self.inner.capabilities.borrow().get(cap) == CapabilityState::Absent)
    }

    fn resource_absent(&self, resource: Resource) -> bool {
        gatt::for_resource(resource)
            .map(|c| c.endpoint)
            .is_some_and(|ep| self.endpoint_absent(ep))
    }
}

/// Optional hardware whose absence is not a sync failure.
fn is_optional(resource: Resource) -> bool {
    gatt::for_resource(resource).is_some_and(|c| c.capability.is_some())
}

fn is_optional_endpoint(endpoint: crate::link::Endpoint) -> bool {
    gatt::lookup(endpoint).is_some_and(|c| c.capability.is_some())
}

/// Success, or an optional endpoint that turned out to be missing.
fn tolerable(step: &Result<()>, optional: bool) -> bool {
    match step {
        Ok(()) => true,
        Err(e) => optional && e.is_missing_endpoint(),
    }
}
