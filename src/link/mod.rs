//! Link layer — everything between a semantic request and the radio.
//!
//! ```text
//!   Link::read / write / subscribe
//!            │
//!            ▼
//!   LogicalOperation ──▶ OperationQueue (FIFO, one at a time)
//!                               │
//!                               ▼
//!                      run_with_retry (transient → backoff)
//!                               │
//!                               ▼
//!                          Transport
//! ```
//!
//! A [`Link`] binds one device id to the shared queue and transport.  The
//! session builds a fresh one for every connection attempt.

pub mod ops;
pub mod queue;
pub mod retry;
pub mod transport;

use std::rc::Rc;

use async_io_mini::Timer;
use log::debug;

pub use ops::{LogicalOperation, OpKind};
pub use queue::OperationQueue;
pub use retry::RetryPolicy;
pub use transport::{
    ConnectionPriority, DisconnectHandler, Endpoint, NotificationHandler, Transport,
};

use crate::config::LinkConfig;
use crate::error::Result;
use crate::framing::chunked::{SizeEncoding, split_payload};
use retry::run_with_retry;

/// Queue-backed access to one connected device.
pub struct Link<T> {
    transport: Rc<T>,
    queue: OperationQueue,
    device: Rc<str>,
    config: Rc<LinkConfig>,
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Rc::clone(&self.transport),
            queue: self.queue.clone(),
            device: Rc::clone(&self.device),
            config: Rc::clone(&self.config),
        }
    }
}

impl<T: Transport + 'static> Link<T> {
    pub fn new(
        transport: Rc<T>,
        queue: OperationQueue,
        device: Rc<str>,
        config: Rc<LinkConfig>,
    ) -> Self {
        Self {
            transport,
            queue,
            device,
            config,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Run one logical operation through the queue and retry governor.
    pub async fn execute(&self, op: LogicalOperation) -> Result<Vec<u8>> {
        let label = op.label();
        let policy = op.policy;
        let op = Rc::new(op);
        let transport = Rc::clone(&self.transport);
        let device = Rc::clone(&self.device);

        self.queue
            .submit(&label, policy, move |_attempt| {
                let op = Rc::clone(&op);
                let transport = Rc::clone(&transport);
                let device = Rc::clone(&device);
                async move { op.attempt(&*transport, &device).await }
            })
            .await
    }

    pub async fn read(&self, target: Endpoint) -> Result<Vec<u8>> {
        self.execute(LogicalOperation::read(target).with_policy(self.config.retry))
            .await
    }

    pub async fn write(&self, target: Endpoint, data: Vec<u8>) -> Result<()> {
        self.execute(LogicalOperation::write(target, data).with_policy(self.config.retry))
            .await
            .map(drop)
    }

    pub async fn write_without_response(&self, target: Endpoint, data: Vec<u8>) -> Result<()> {
        self.execute(
            LogicalOperation::write_without_response(target, data).with_policy(self.config.retry),
        )
        .await
        .map(drop)
    }

    pub async fn subscribe(&self, target: Endpoint, handler: NotificationHandler) -> Result<()> {
        self.execute(LogicalOperation::subscribe(target, handler).with_policy(self.config.retry))
            .await
            .map(drop)
    }

    pub async fn unsubscribe(&self, target: Endpoint) -> Result<()> {
        self.execute(LogicalOperation::unsubscribe(target).with_policy(self.config.retry))
            .await
            .map(drop)
    }

    /// Write `data`, splitting it with the 4-byte fragment header when it
    /// exceeds one packet.
    ///
    /// All packets go out inside a single queue slot, each under its own
    /// retry budget and separated by the configured fragment delay, so no
    /// other operation can land between two fragments.
    pub async fn write_fragmented(
        &self,
        target: Endpoint,
        context: u8,
        encoding: SizeEncoding,
        data: &[u8],
    ) -> Result<()> {
        let packets = split_payload(context, encoding, data, self.config.packet_capacity)?;
        if packets.len() == 1 {
            return self.write(target, data.to_vec()).await;
        }

        let label = format!("fragmented write[{}] {target}", data.len());
        let transport = Rc::clone(&self.transport);
        let device = Rc::clone(&self.device);
        let policy = self.config.retry;
        let delay = self.config.fragment_delay();

        self.queue
            .enqueue(&label, move || async move {
                let count = packets.len();
                for (index, packet) in packets.iter().enumerate() {
                    if index > 0 {
                        Timer::after(delay).await;
                    }
                    let fragment_label = format!("fragment {}/{count} {target}", index + 1);
                    run_with_retry(&fragment_label, &policy, |_| {
                        let transport = &transport;
                        let device = &device;
                        async move { Ok(transport.write(device, target, packet).await?) }
                    })
                    .await?;
                }
                debug!("link: {count} fragments written to {target}");
                Ok(())
            })
            .await
    }

    /// Open the link. One attempt; the radio stack runs its own retries.
    pub async fn connect(&self, on_disconnect: DisconnectHandler) -> Result<()> {
        let transport = Rc::clone(&self.transport);
        let device = Rc::clone(&self.device);
        let policy = RetryPolicy::single_shot(self.config.retry.attempt_timeout_ms);
        self.queue
            .submit("connect", policy, move |_| {
                let (transport, device, hook) = (
                    Rc::clone(&transport),
                    Rc::clone(&device),
                    on_disconnect.clone(),
                );
                async move { Ok(transport.connect(&device, hook).await?) }
            })
            .await
    }

    pub async fn disconnect(&self) -> Result<()> {
        let transport = Rc::clone(&self.transport);
        let device = Rc::clone(&self.device);
        let policy = RetryPolicy::single_shot(self.config.retry.attempt_timeout_ms);
        self.queue
            .submit("disconnect", policy, move |_| {
                let (transport, device) = (Rc::clone(&transport), Rc::clone(&device));
                async move { Ok(transport.disconnect(&device).await?) }
            })
            .await
    }

    pub async fn request_priority(&self, priority: ConnectionPriority) -> Result<()> {
        let transport = Rc::clone(&self.transport);
        let device = Rc::clone(&self.device);
        let policy = RetryPolicy::single_shot(self.config.retry.attempt_timeout_ms);
        self.queue
            .submit("priority", policy, move |_| {
                let (transport, device) = (Rc::clone(&transport), Rc::clone(&device));
                async move { Ok(transport.request_connection_priority(&device, priority).await?) }
            })
            .await
    }

    pub async fn create_bond(&self) -> Result<()> {
        let transport = Rc::clone(&self.transport);
        let device = Rc::clone(&self.device);
        let policy = RetryPolicy::single_shot(self.config.retry.attempt_timeout_ms);
        self.queue
            .submit("bond", policy, move |_| {
                let (transport, device) = (Rc::clone(&transport), Rc::clone(&device));
                async move { Ok(transport.create_bond(&device).await?) }
            })
            .await
    }

    /// Write a selector then read the same endpoint, inside one queue slot
    /// so no other request can move the selector in between.
    pub async fn select_and_read(&self, target: Endpoint, selector: Vec<u8>) -> Result<Vec<u8>> {
        let label = format!("select+read {target}");
        let transport = Rc::clone(&self.transport);
        let device = Rc::clone(&self.device);
        let policy = self.config.retry;

        self.queue
            .enqueue(&label, move || async move {
                run_with_retry("select", &policy, |_| {
                    let (transport, device, selector) = (&transport, &device, &selector);
                    async move { Ok(transport.write(device, target, selector).await?) }
                })
                .await?;
                run_with_retry("read", &policy, |_| {
                    let (transport, device) = (&transport, &device);
                    async move { Ok(transport.read(device, target).await?) }
                })
                .await
            })
            .await
    }
}

// ── Tests ────────────────────────────────────────────────────
