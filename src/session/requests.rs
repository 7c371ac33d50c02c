//! Semantic request operations.
//!
//! Callers address the controller by resource ("channel 3 config",
//! "history page 2 of type 0x01") rather than by characteristic.  Each
//! operation is gated on a usable session, goes through the operation
//! queue, and only touches shared state through completed reads or
//! accepted notifications.  Writes are confirmed by re-reading.

use log::{debug, info};

use super::{Session, dispatch};
use crate::correlate::RequestKey;
use crate::error::{Error, ProtocolError, Result, TransportError};
use crate::framing::chunked::SizeEncoding;
use crate::framing::unified::{Page, decode_page};
use crate::gatt;
use crate::layout::{self, Record, Value};
use crate::link::{Endpoint, LogicalOperation, RetryPolicy, Transport};
use crate::model;
use crate::state::{Capability, Resource};

/// Longest channel name the firmware stores (one byte is the terminator).
pub const MAX_CHANNEL_NAME: usize = 63;

impl<T: Transport + 'static> Session<T> {
    // ── Reads ────────────────────────────────────────────────

    /// Read `resource` from the device and update shared state.
    ///
    /// Concurrent reads of the same resource share one transport call.
    pub async fn read_resource(&self, resource: Resource) -> Result<Record> {
        let id = self.inner.usable()?;
        self.fetch_resource(id, resource, self.inner.config.retry).await
    }

    pub async fn read_channel_config(&self, channel: u8) -> Result<Record> {
        self.check_channel(channel)?;
        self.read_resource(Resource::ChannelConfig(channel)).await
    }

    pub(super) async fn fetch_resource(
        &self,
        id: u64,
        resource: Resource,
        policy: RetryPolicy,
    ) -> Result<Record> {
        self.inner
            .reads
            .run((id, resource), || self.load_resource(id, resource, policy))
            .await
    }

    /// One uncollapsed read. Used directly for post-write confirmation,
    /// where joining an older in-flight read would return stale bytes.
    async fn load_resource(
        &self,
        id: u64,
        resource: Resource,
        policy: RetryPolicy,
    ) -> Result<Record> {
        let inner = &self.inner;
        let info = gatt::for_resource(resource)
            .ok_or(Error::Protocol(ProtocolError::FieldMismatch("resource")))?;
        if let Some(cap) = info.capability {
            inner.capabilities.borrow().check(cap)?;
        }

        let link = inner.link()?;
        let outcome = match resource {
            Resource::ChannelConfig(channel) => {
                link.select_and_read(info.endpoint, vec![channel]).await
            }
            _ => {
                link.execute(LogicalOperation::read(info.endpoint).with_policy(policy))
                    .await
            }
        };
        inner.ensure_current(id)?;
        if let Some(cap) = info.capability {
            inner.capabilities.borrow_mut().observe(cap, &outcome);
        }

        let record = dispatch::decode_structure(info, &outcome?)?;
        if let Resource::ChannelConfig(channel) = resource {
            if record.uint("channel_id") != Some(u32::from(channel)) {
                return Err(ProtocolError::FieldMismatch("channel_id").into());
            }
        }
        debug!("request: {resource} read ({} fields)", record.iter().count());
        inner.apply_record(id, resource, record.clone());
        Ok(record)
    }

    // ── Writes ───────────────────────────────────────────────

    /// Write a channel configuration, then re-read it.
    ///
    /// The returned record is what the device reports after the write,
    /// which may differ from `record` if the firmware clamps fields.
    pub async fn update_channel_config(&self, channel: u8, record: &Record) -> Result<Record> {
        let id = self.inner.usable()?;
        self.check_channel(channel)?;
        if !core::ptr::eq(record.layout(), &model::CHANNEL_CONFIG) {
            return Err(ProtocolError::FieldMismatch("layout").into());
        }
        if record.uint("channel_id") != Some(u32::from(channel)) {
            return Err(ProtocolError::FieldMismatch("channel_id").into());
        }
        let bytes = layout::encode(record)?;
        self.write_and_confirm(
            id,
            Resource::ChannelConfig(channel),
            channel,
            SizeEncoding::LittleEndian,
            &bytes,
        )
        .await
    }

    /// Change a channel's name, keeping the rest of its configuration.
    ///
    /// The whole record is rewritten; the controller expects renames under
    /// the big-endian size tag.
    pub async fn rename_channel(&self, channel: u8, name: &str) -> Result<Record> {
        let id = self.inner.usable()?;
        self.check_channel(channel)?;
        if name.len() > MAX_CHANNEL_NAME {
            return Err(ProtocolError::FieldRange("name").into());
        }
        let resource = Resource::ChannelConfig(channel);
        let mut record = self.load_resource(id, resource, self.inner.config.retry).await?;
        record.set("name", Value::Text(name.to_owned()))?;
        let len = u32::try_from(name.len()).map_err(|_| ProtocolError::FieldRange("name"))?;
        record.set("name_len", Value::Uint(len))?;
        let bytes = layout::encode(&record)?;

        info!("request: renaming channel {channel} to {name:?}");
        self.write_and_confirm(id, resource, channel, SizeEncoding::BigEndian, &bytes)
            .await
    }

    pub async fn update_system_config(&self, record: &Record) -> Result<Record> {
        let id = self.inner.usable()?;
        if !core::ptr::eq(record.layout(), &model::SYSTEM_CONFIG) {
            return Err(ProtocolError::FieldMismatch("layout").into());
        }
        let bytes = layout::encode(record)?;
        self.write_and_confirm(id, Resource::SystemConfig, 0, SizeEncoding::LittleEndian, &bytes)
            .await
    }

    async fn write_and_confirm(
        &self,
        id: u64,
        resource: Resource,
        context: u8,
        encoding: SizeEncoding,
        bytes: &[u8],
    ) -> Result<Record> {
        let inner = &self.inner;
        let info = gatt::for_resource(resource)
            .ok_or(Error::Protocol(ProtocolError::FieldMismatch("resource")))?;
        inner
            .link()?
            .write_fragmented(info.endpoint, context, encoding, bytes)
            .await?;
        inner.ensure_current(id)?;
        self.load_resource(id, resource, inner.config.retry).await
    }

    /// Fire a command at `endpoint` without waiting for any notification.
    pub async fn write_command(&self, endpoint: Endpoint, data: Vec<u8>) -> Result<()> {
        let id = self.inner.usable()?;
        self.inner.link()?.write(endpoint, data).await?;
        self.inner.ensure_current(id)
    }

    // ── Notification-correlated exchanges ────────────────────

    /// Write `command` to `endpoint` and return the next notification it
    /// pushes.
    pub async fn request(&self, endpoint: Endpoint, command: Vec<u8>) -> Result<Vec<u8>> {
        let id = self.inner.usable()?;
        self.ensure_subscribed(id, endpoint).await?;
        self.exchange(id, RequestKey::Endpoint(endpoint.short_id()), endpoint, command)
            .await
    }

    /// Fetch one page of a paged history exchange.
    ///
    /// Each page is standalone; nothing accumulates across pages.
    pub async fn fetch_page(&self, data_type: u8, page: u8) -> Result<Page> {
        let id = self.inner.usable()?;
        self.inner.capabilities.borrow().check(Capability::History)?;
        self.ensure_subscribed(id, gatt::HISTORY).await?;

        let key = RequestKey::Page { data_type, page };
        let frame = self
            .inner
            .fetches
            .run((id, key), || {
                self.exchange(id, key, gatt::HISTORY, vec![data_type, page])
            })
            .await?;
        Ok(decode_page(&frame)?)
    }

    /// Fetch a streamed history message, reassembled across fragments.
    pub async fn fetch_stream(&self, data_type: u8) -> Result<Vec<u8>> {
        let id = self.inner.usable()?;
        self.ensure_subscribed(id, gatt::ENV_HISTORY).await?;

        let key = RequestKey::DataType(data_type);
        self.inner
            .fetches
            .run((id, key), || {
                self.exchange(id, key, gatt::ENV_HISTORY, vec![data_type, 0])
            })
            .await
    }

    /// Wait for the notification correlated with `key`, without writing
    /// anything. Teardown settles the wait with [`Error::Disconnected`].
    pub async fn await_notification(&self, key: RequestKey) -> Result<Vec<u8>> {
        self.inner.usable()?;
        self.inner
            .pending
            .await_notification(key, self.inner.config.request_timeout())
            .await
    }

    /// Register for `key`, write `command`, and wait for the match.
    ///
    /// The slot is registered before the write so a reply delivered
    /// during the write itself is not lost.
    async fn exchange(
        &self,
        id: u64,
        key: RequestKey,
        endpoint: Endpoint,
        command: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let inner = &self.inner;
        let waiter = inner.pending.register(key);
        inner.link()?.write(endpoint, command).await?;
        inner.ensure_current(id)?;
        waiter.wait(inner.config.request_timeout()).await
    }

    // ── Subscriptions ────────────────────────────────────────

    pub async fn subscribe(&self, endpoint: Endpoint) -> Result<()> {
        let id = self.inner.usable()?;
        self.subscribe_endpoint(id, endpoint).await
    }

    pub async fn unsubscribe(&self, endpoint: Endpoint) -> Result<()> {
        let id = self.inner.usable()?;
        self.unsubscribe_endpoint(id, endpoint).await
    }

    async fn ensure_subscribed(&self, id: u64, endpoint: Endpoint) -> Result<()> {
        if self.inner.subscriptions.borrow().contains(&endpoint) {
            return Ok(());
        }
        self.subscribe_endpoint(id, endpoint).await
    }

    /// Disable notifications; "not subscribed" counts as success.
    pub(super) async fn unsubscribe_endpoint(&self, id: u64, endpoint: Endpoint) -> Result<()> {
        let outcome = self.inner.link()?.unsubscribe(endpoint).await;
        self.inner.ensure_current(id)?;
        self.inner.subscriptions.borrow_mut().remove(&endpoint);
        match outcome {
            Err(Error::Transport(TransportError::NotSubscribed)) => {
                debug!("request: {endpoint} was not subscribed");
                Ok(())
            }
            other => other,
        }
    }

    /// Resolves once every operation queued before this call has settled.
    pub async fn drain(&self) -> Result<()> {
        self.inner.queue.drain().await
    }

    fn check_channel(&self, channel: u8) -> Result<()> {
        if channel < self.inner.config.channel_count {
            Ok(())
        } else {
            Err(ProtocolError::FieldRange("channel").into())
        }
    }
}
