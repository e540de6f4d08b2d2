//! Session timing and framing configuration.

use std::time::Duration;

use crate::error::{Result, RfidError};

const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 1000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2000;
const DEFAULT_STOP_ATTEMPTS: u8 = 3;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 300;
const DEFAULT_STOP_PACING_MS: u64 = 100;
const DEFAULT_JOIN_TIMEOUT_MS: u64 = 2000;
const DEFAULT_POLL_INTERVAL_MS: u32 = 20;
const DEFAULT_MAX_FRAME_PAYLOAD: usize = 2048;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for a [`Reader`](crate::Reader) session.
///
/// Every wait the session performs is bounded by one of these values.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReaderConfig {
    /// Response budget for configure and query commands
    pub command_timeout_ms: u64,
    /// Response budget for EPC writes, which wait on the air interface
    pub write_timeout_ms: u64,
    /// How many times STOP is sent before giving up
    pub stop_attempts: u8,
    /// Response budget of a single STOP attempt
    pub stop_timeout_ms: u64,
    /// Pause between STOP attempts
    pub stop_pacing_ms: u64,
    /// How long to wait for the inventory worker to exit
    pub join_timeout_ms: u64,
    /// Read timeout of one inventory loop iteration
    pub poll_interval_ms: u32,
    /// Station address for RS-485 buses; `None` sends plain frames
    pub rs485_address: Option<u8>,
    /// Declared payloads above this are treated as line noise while resyncing
    pub max_frame_payload: usize,
    /// Capacity of the channel returned by `start_inventory_channel`
    pub event_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            stop_attempts: DEFAULT_STOP_ATTEMPTS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            stop_pacing_ms: DEFAULT_STOP_PACING_MS,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            rs485_address: None,
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ReaderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stop_attempts == 0 {
            return Err(RfidError::InvalidParameter("stop_attempts must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(RfidError::InvalidParameter("poll_interval_ms must be at least 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(RfidError::InvalidParameter("event_capacity must be at least 1".into()));
        }
        if self.max_frame_payload > u16::MAX as usize {
            return Err(RfidError::InvalidParameter(format!(
                "max_frame_payload {} exceeds the 16-bit length field",
                self.max_frame_payload
            )));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stop_pacing(&self) -> Duration {
        Duration::from_millis(self.stop_pacing_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
