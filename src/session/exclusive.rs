//! Exclusive-access windows for bulk transfers (firmware update).
//!
//! ```text
//!  begin_exclusive:  flag ─▶ drain queue ─▶ unsubscribe every known target ─▶ ExclusiveStarted
//!  end_exclusive:    resubscribe essentials ─▶ clear flag ─▶ wake background ─▶ ExclusiveEnded
//! ```
//!
//! The flag goes up before the drain so Phase 2 work parks at its next
//! step instead of queueing behind the drain.  While exclusive, semantic
//! requests fail with [`Error::Exclusive`]; the transfer itself goes
//! through [`Session::link`].

use log::{info, warn};

use super::{LinkState, Session};
use crate::error::{Error, Result};
use crate::events::LinkEvent;
use crate::gatt::{BACKGROUND_SUBSCRIPTIONS, ESSENTIAL_SUBSCRIPTIONS};
use crate::link::{Endpoint, Transport};

impl<T: Transport + 'static> Session<T> {
    /// Reserve the link. Fails unless the session is connected and idle
    /// of any other exclusive window.
    pub async fn begin_exclusive(&self) -> Result<()> {
        let inner = &self.inner;
        let id = inner.usable()?;
        inner.link_state.set(LinkState::Exclusive);
        inner.exclusive_released.reset();

        inner.queue.drain().await?;
        inner.ensure_current(id)?;

        // Every known target, tracked or not: the radio may hold a
        // subscription the session lost track of.
        let targets: Vec<Endpoint> = ESSENTIAL_SUBSCRIPTIONS
            .iter()
            .chain(BACKGROUND_SUBSCRIPTIONS)
            .copied()
            .filter(|&ep| !self.endpoint_absent(ep))
            .collect();
        info!(
            "exclusive: starting, dropping {} known target(s), {} tracked",
            targets.len(),
            inner.subscriptions.borrow().len()
        );
        for endpoint in targets {
            // "not subscribed" is already folded into success here.
            match self.unsubscribe_endpoint(id, endpoint).await {
                Ok(()) => {}
                Err(Error::Superseded) => return Err(Error::Superseded),
                Err(e) => warn!("exclusive: unsubscribe {endpoint} failed: {e}"),
            }
        }
        inner.subscriptions.borrow_mut().clear();
        inner.ensure_current(id)?;

        inner.events.emit(&LinkEvent::ExclusiveStarted);
        Ok(())
    }

    /// Release the link and restore the essential subscriptions.
    ///
    /// A no-op when the window already ended, including when the session
    /// disconnected or moved to another device in the meantime.
    pub async fn end_exclusive(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.link_state.get() != LinkState::Exclusive {
            return Ok(());
        }
        let id = inner.connection_id.get();

        for &endpoint in ESSENTIAL_SUBSCRIPTIONS {
            match self.subscribe_endpoint(id, endpoint).await {
                Ok(()) => {}
                Err(Error::Superseded) => return Ok(()),
                Err(e) => warn!("exclusive: restoring {endpoint} failed: {e}"),
            }
        }
        if !inner.is_current(id) {
            return Ok(());
        }

        inner.link_state.set(LinkState::Connected);
        inner.exclusive_released.signal(());
        info!("exclusive: ended, {} subscription(s) restored", inner.subscriptions.borrow().len());
        inner.events.emit(&LinkEvent::ExclusiveEnded);
        Ok(())
    }
}
