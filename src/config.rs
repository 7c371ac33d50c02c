//! Link configuration parameters
//!
//! All tunable timing and sizing parameters for the device link.
//! Values can be loaded from the app's settings store as JSON, or persisted
//! compactly with postcard alongside the paired-device record.

use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::framing::chunked::FRAGMENT_HEADER_LEN;
use crate::link::retry::RetryPolicy;

/// Core link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    // --- Queue ---
    /// Attempts, backoff and per-attempt deadline for queued operations
    pub retry: RetryPolicy,

    // --- Correlator ---
    /// Deadline for a correlated notification (milliseconds)
    pub request_timeout_ms: u32,

    // --- Framing ---
    /// Assumed usable bytes per packet (ATT MTU 23 minus 3)
    pub packet_capacity: usize,
    /// Pause between outbound fragments (milliseconds)
    pub fragment_delay_ms: u32,

    // --- Sync ---
    /// Pause between Phase 1 essential reads (milliseconds)
    pub essential_read_delay_ms: u32,
    /// Pause between Phase 2 background steps (milliseconds)
    pub background_step_delay_ms: u32,
    /// Bounded wait for the OS pairing prompt after an auth failure (milliseconds)
    pub pairing_wait_ms: u32,

    // --- Device ---
    /// Number of logical irrigation channels on the controller
    pub channel_count: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),

            request_timeout_ms: 5000,

            packet_capacity: 20,
            fragment_delay_ms: 30,

            essential_read_delay_ms: 50,
            background_step_delay_ms: 50,
            pairing_wait_ms: 10_000,

            channel_count: 8,
        }
    }
}

impl LinkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.request_timeout_ms))
    }

    pub fn fragment_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.fragment_delay_ms))
    }

    pub fn essential_read_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.essential_read_delay_ms))
    }

    pub fn background_step_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.background_step_delay_ms))
    }

    pub fn pairing_wait(&self) -> Duration {
        Duration::from_millis(u64::from(self.pairing_wait_ms))
    }

    /// Reject values the link cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed("retry.max_attempts must be >= 1"));
        }
        if self.retry.attempt_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("timeouts must be non-zero"));
        }
        if self.packet_capacity <= FRAGMENT_HEADER_LEN {
            return Err(ConfigError::ValidationFailed(
                "packet_capacity must exceed the fragment header",
            ));
        }
        if self.channel_count == 0 {
            return Err(ConfigError::ValidationFailed("channel_count must be >= 1"));
        }
        Ok(())
    }

    /// Parse and validate a JSON settings blob.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|_| ConfigError::Malformed)?;
        config.validate()?;
        Ok(config)
    }

    /// Compact encoding for the paired-device record.
    pub fn to_postcard(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Malformed)
    }

    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|_| ConfigError::Malformed)?;
        config.validate()?;
        Ok(config)
    }
}

/// Configuration could not be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The stored blob did not deserialize.
    Malformed,
    /// A value is out of its permitted range.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed link configuration"),
            Self::ValidationFailed(msg) => write!(f, "invalid link configuration: {msg}"),
        }
    }
}

impl core::error::Error for ConfigError {}
