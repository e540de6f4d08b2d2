//! Error types for framing and reader operations.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::Mid;
use crate::write::WriteResult;

/// Reasons a byte sequence is not a valid frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("invalid frame header 0x{0:02X}")]
    InvalidHeader(u8),

    #[error("length field declares {declared} payload bytes but the frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("CRC mismatch: received 0x{received:04X}, computed 0x{computed:04X}")]
    CrcMismatch { received: u16, computed: u16 },

    #[error("payload of {0} bytes exceeds the 65535 byte length field")]
    PayloadTooLarge(usize),

    #[error("category 0x{0:02X} does not fit the 4-bit category field")]
    InvalidCategory(u8),
}

/// Errors that can occur during reader operations
#[derive(Debug, Error)]
pub enum RfidError {
    /// Transport layer error (UART, serial, etc.)
    #[error("transport error: {0}")]
    Transport(String),

    #[error("framing error: {0}")]
    Framing(#[from] FrameError),

    /// A command was answered with a different command id
    #[error("expected a response to {expected}, got {got}")]
    Protocol { expected: Mid, got: Mid },

    /// Response frame was valid but its payload could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Reader answered with a non-zero status code
    #[error("reader rejected {command}: {reason} (code 0x{code:02X})")]
    DeviceRejected {
        command: Mid,
        code: u8,
        reason: &'static str,
    },

    #[error("tag write failed: {result}")]
    WriteRejected {
        result: WriteResult,
        failed_word: Option<u16>,
    },

    #[error("no response to {command} within {timeout:?}")]
    Timeout { command: Mid, timeout: Duration },

    #[error("inventory worker did not stop within {0:?}")]
    StopTimedOut(Duration),

    #[error("an inventory stream is already active")]
    AlreadyStreaming,

    #[error("link busy: another command is awaiting its response")]
    LinkBusy,

    /// Invalid parameter passed to a function
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("tag {0} was not seen by the reader")]
    TagNotFound(String),
}

impl RfidError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RfidError::Timeout { .. } | RfidError::LinkBusy)
    }
}

pub type Result<T> = std::result::Result<T, RfidError>;
