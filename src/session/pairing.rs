//! Pairing retry for reads rejected with insufficient authentication.
//!
//! ```text
//!  read ──auth failed──▶ request bond ──▶ wait (bounded, or until link drops)
//!                                               │
//!                          link dropped? ──yes──▶ reconnect once
//!                                               │
//!                                               ▼
//!                                         retry read once
//! ```
//!
//! The caller decides what a second authentication failure means; sync
//! carries on best-effort.

use async_io_mini::Timer;
use futures_lite::future;
use log::{info, warn};

use super::Session;
use crate::error::Result;
use crate::layout::Record;
use crate::link::{RetryPolicy, Transport};
use crate::state::Resource;

impl<T: Transport + 'static> Session<T> {
    pub(super) async fn read_with_pairing(
        &self,
        id: u64,
        resource: Resource,
        policy: RetryPolicy,
    ) -> Result<Record> {
        match self.fetch_resource(id, resource, policy).await {
            Err(e) if e.is_auth_failure() => {}
            other => return other,
        }

        let inner = &self.inner;
        let wait = inner.config.pairing_wait();
        warn!(
            "pairing: {resource} needs an authenticated link, waiting up to {}ms",
            wait.as_millis()
        );
        if let Err(e) = inner.link()?.create_bond().await {
            warn!("pairing: bond request failed: {e}");
        }
        inner.ensure_current(id)?;

        if !inner.link_dropped.get() {
            future::or(
                async {
                    Timer::after(wait).await;
                },
                inner.pairing_interrupt.wait(),
            )
            .await;
        }
        inner.pairing_interrupt.reset();
        inner.ensure_current(id)?;

        if inner.link_dropped.replace(false) {
            info!("pairing: link dropped during pairing, reconnecting once");
            inner.link()?.connect(self.disconnect_hook(id)).await?;
            inner.ensure_current(id)?;
        }

        let retry = self.fetch_resource(id, resource, policy).await;
        if matches!(&retry, Err(e) if e.is_auth_failure()) {
            warn!("pairing: {resource} still rejected after pairing wait");
        }
        retry
    }
}
