//! Inbound dispatch — notification bytes to waiters and shared state.
//!
//! ```text
//!  notification(endpoint, bytes)
//!        │
//!        ├─ Raw ───────────▶ decode layout ─▶ state ─▶ resolve Endpoint / Channel key
//!        ├─ Legacy ────────▶ LegacyReassembler ─(complete)─▶ same as Raw
//!        ├─ UnifiedPaged ──▶ header ─▶ resolve Page{type, index} with the frame
//!        └─ UnifiedStream ─▶ StreamReassembler ─(complete)─▶ resolve DataType
//! ```
//!
//! Protocol errors reject the key the frame was addressed to (when it can
//! be known) and discard any partial reassembly.

use std::collections::HashMap;

use log::{debug, warn};

use super::SessionInner;
use crate::correlate::RequestKey;
use crate::error::{Error, ProtocolError};
use crate::framing::Framing;
use crate::framing::legacy::LegacyReassembler;
use crate::framing::unified::{StreamReassembler, UNIFIED_HEADER_LEN, decode_page};
use crate::gatt::{self, CharacteristicInfo};
use crate::layout::{self, Record};
use crate::link::{Endpoint, Transport};
use crate::model::ENVIRONMENT_SIZE;
use crate::state::Resource;

/// Per-connection reassembly buffers.
#[derive(Default)]
pub(super) struct Reassembly {
    legacy: LegacyReassembler<ENVIRONMENT_SIZE>,
    streams: HashMap<Endpoint, StreamReassembler>,
}

impl Reassembly {
    pub(super) fn reset(&mut self) {
        self.legacy.reset();
        self.streams.clear();
    }
}

/// Decode a complete structure read from or pushed by `info`'s endpoint.
pub(super) fn decode_structure(info: &CharacteristicInfo, bytes: &[u8]) -> Result<Record, Error> {
    let Some(layout) = info.layout else {
        return Err(ProtocolError::FieldMismatch("layout").into());
    };
    if info.framing != Framing::Legacy {
        return Ok(layout::decode(layout, bytes)?);
    }
    // A direct read normally returns the whole structure; a single
    // header-bearing frame is accepted too.
    let mut reassembler = LegacyReassembler::<ENVIRONMENT_SIZE>::new();
    match reassembler.feed(bytes)? {
        Some(whole) => Ok(layout::decode(layout, &whole)?),
        None => Err(ProtocolError::Undersized {
            expected: layout.size,
            actual: bytes.len(),
        }
        .into()),
    }
}

impl<T: Transport + 'static> SessionInner<T> {
    pub(super) fn on_notification(&self, endpoint: Endpoint, bytes: &[u8]) {
        let Some(info) = gatt::lookup(endpoint) else {
            debug!("dispatch: notification on unknown {endpoint}");
            return;
        };
        match info.framing {
            Framing::Raw => self.accept_structure(info, bytes.to_vec()),
            Framing::Legacy => self.on_legacy(info, bytes),
            Framing::UnifiedPaged => self.on_page(bytes),
            Framing::UnifiedStream => self.on_stream(endpoint, bytes),
        }
    }

    /// Hand a complete structure to its waiter and to shared state.
    fn accept_structure(&self, info: &CharacteristicInfo, bytes: Vec<u8>) {
        let id = self.connection_id.get();
        let short = info.endpoint.short_id();

        let record = match info.layout.map(|l| layout::decode(l, &bytes)) {
            Some(Ok(record)) => Some(record),
            Some(Err(e)) => {
                warn!("dispatch: {} notification rejected: {e}", info.name);
                self.pending.reject(RequestKey::Endpoint(short), e.into());
                return;
            }
            None => None,
        };

        if let (Some(record), Some(resource)) = (&record, info.resource) {
            let bound = resource.bind(record);
            if let Resource::ChannelConfig(channel) = bound {
                self.pending.resolve(
                    RequestKey::Channel {
                        characteristic: short,
                        channel,
                    },
                    bytes.clone(),
                );
            }
            self.apply_record(id, bound, record.clone());
        }
        if !self.pending.resolve(RequestKey::Endpoint(short), bytes) {
            debug!("dispatch: unsolicited {} notification", info.name);
        }
    }

    fn on_legacy(&self, info: &CharacteristicInfo, frame: &[u8]) {
        let fed = self.reassembly.borrow_mut().legacy.feed(frame);
        match fed {
            Ok(Some(whole)) => self.accept_structure(info, whole.to_vec()),
            Ok(None) => {}
            Err(e) => {
                warn!("dispatch: {} fragment rejected: {e}", info.name);
                self.pending
                    .reject(RequestKey::Endpoint(info.endpoint.short_id()), e.into());
            }
        }
    }

    fn on_page(&self, frame: &[u8]) {
        if frame.len() < UNIFIED_HEADER_LEN {
            let e = Error::from(ProtocolError::Undersized {
                expected: UNIFIED_HEADER_LEN,
                actual: frame.len(),
            });
            // No page index yet; the data type alone names the exchange.
            let rejected = frame
                .first()
                .map_or(0, |&data_type| self.pending.reject_pages(data_type, &e));
            warn!("dispatch: truncated page header: {e} ({rejected} waiter(s) failed)");
            return;
        }
        // Header bytes are positional, so the key is known even when the
        // payload is short.
        let key = RequestKey::Page {
            data_type: frame[0],
            page: frame[4],
        };
        match decode_page(frame) {
            Ok(_) => {
                if !self.pending.resolve(key, frame.to_vec()) {
                    debug!("dispatch: no waiter for {key}");
                }
            }
            Err(e) => {
                debug!("dispatch: {key} failed: {e}");
                self.pending.reject(key, e.into());
            }
        }
    }

    fn on_stream(&self, endpoint: Endpoint, frame: &[u8]) {
        let fed = self
            .reassembly
            .borrow_mut()
            .streams
            .entry(endpoint)
            .or_default()
            .feed(frame);
        match fed {
            Ok(Some(message)) => {
                let key = RequestKey::DataType(message.data_type);
                debug!(
                    "dispatch: {key} complete, {} entries in {} bytes",
                    message.entry_count,
                    message.payload.len()
                );
                if !self.pending.resolve(key, message.payload) {
                    debug!("dispatch: no waiter for {key}");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("dispatch: stream on {endpoint} discarded: {}", e.error);
                if let Some(data_type) = e.data_type {
                    self.pending
                        .reject(RequestKey::DataType(data_type), e.error.into());
                }
            }
        }
    }
}
