//! Logical operations — one transport call plus the policy to run it under.
//!
//! A [`LogicalOperation`] is built per call, handed to the queue, attempted
//! under its [`RetryPolicy`] and then discarded.  Attempts borrow it, so the
//! payload and handler are never cloned between retries.

use core::fmt;

use super::retry::RetryPolicy;
use super::transport::{Endpoint, NotificationHandler, Transport};
use crate::error::Result;

/// What the operation does to its target.
#[derive(Clone)]
pub enum OpKind {
    Read,
    Write(Vec<u8>),
    WriteNoResponse(Vec<u8>),
    Subscribe(NotificationHandler),
    Unsubscribe,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write(data) => write!(f, "write[{}]", data.len()),
            Self::WriteNoResponse(data) => write!(f, "write-nr[{}]", data.len()),
            Self::Subscribe(_) => write!(f, "subscribe"),
            Self::Unsubscribe => write!(f, "unsubscribe"),
        }
    }
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Debug, Clone)]
pub struct LogicalOperation {
    pub kind: OpKind,
    pub target: Endpoint,
    pub policy: RetryPolicy,
}

impl LogicalOperation {
    pub fn read(target: Endpoint) -> Self {
        Self::new(OpKind::Read, target)
    }

    pub fn write(target: Endpoint, data: Vec<u8>) -> Self {
        Self::new(OpKind::Write(data), target)
    }

    pub fn write_without_response(target: Endpoint, data: Vec<u8>) -> Self {
        Self::new(OpKind::WriteNoResponse(data), target)
    }

    pub fn subscribe(target: Endpoint, handler: NotificationHandler) -> Self {
        Self::new(OpKind::Subscribe(handler), target)
    }

    pub fn unsubscribe(target: Endpoint) -> Self {
        Self::new(OpKind::Unsubscribe, target)
    }

    fn new(kind: OpKind, target: Endpoint) -> Self {
        Self {
            kind,
            target,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Queue label, e.g. `read char:def3`.
    pub fn label(&self) -> String {
        format!("{} {}", self.kind, self.target)
    }

    /// One attempt against the transport. Reads return the bytes read;
    /// everything else returns an empty vector.
    pub async fn attempt<T: Transport>(&self, transport: &T, device: &str) -> Result<Vec<u8>> {
        let target = self.target;
        match &self.kind {
            OpKind::Read => Ok(transport.read(device, target).await?),
            OpKind::Write(data) => {
                transport.write(device, target, data).await?;
                Ok(Vec::new())
            }
            OpKind::WriteNoResponse(data) => {
                transport.write_without_response(device, target, data).await?;
                Ok(Vec::new())
            }
            OpKind::Subscribe(handler) => {
                transport
                    .start_notifications(device, target, handler.clone())
                    .await?;
                Ok(Vec::new())
            }
            OpKind::Unsubscribe => {
                transport.stop_notifications(device, target).await?;
                Ok(Vec::new())
            }
        }
    }
}
