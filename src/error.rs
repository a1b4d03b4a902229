//! Custom error types for the device session.
//!
//! This module defines `DeviceError`, the single error type returned by every
//! protocol-layer operation. Using the `thiserror` crate, it gives callers a
//! distinguishable variant per failure category so they can decide whether to
//! retry, reselect a port, or give up.
//!
//! ## Error Hierarchy
//!
//! - **Transport**: `Open`, `Close`, `Write` wrap the underlying `std::io::Error`
//!   of the operation that triggered them. They are never retried automatically.
//! - **Protocol**: `Parse` (a structured read got an unstructured reply) and
//!   `Timeout` (no reply within the deadline). Both leave the command gate free.
//! - **Stream**: `Stream` carries a [`StreamFault`] observed by the background
//!   reader while a command was pending. Faults with no pending command are only
//!   published on the error channel.
//! - **Session**: `NoPorts`, `InvalidSelection`, `NotConnected`, `Disconnected`
//!   and `PortEnumeration` describe the session lifecycle.
//! - **Config**: wraps `figment` extraction errors and semantic validation
//!   failures.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the device error type.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Errors surfaced by the device session and its protocol engine.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The serial device could not be opened (missing, busy, no permission).
    #[error("Failed to open serial port {path}: {source}")]
    Open {
        /// Port path that was requested.
        path: String,
        /// Underlying cause reported by the transport.
        #[source]
        source: std::io::Error,
    },

    /// The transport did not shut down cleanly.
    #[error("Failed to close serial port: {source}")]
    Close {
        /// Underlying cause reported by the transport.
        #[source]
        source: std::io::Error,
    },

    /// The transport rejected a command write.
    #[error("Failed to write command: {source}")]
    Write {
        /// Underlying cause reported by the transport.
        #[source]
        source: std::io::Error,
    },

    /// A structured read received a frame that is not a two-value reading.
    #[error("Unexpected response to sensor read: {frame:?}")]
    Parse {
        /// The raw frame that failed to parse.
        frame: String,
    },

    /// No reply arrived before the deadline.
    #[error("No response to command '{command}' within {after:?}")]
    Timeout {
        /// Command character that was sent.
        command: char,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// The reader task reported a stream-level fault while a command was pending.
    #[error("Serial stream error: {0}")]
    Stream(StreamFault),

    /// Port enumeration returned no candidates.
    #[error("No serial ports found")]
    NoPorts,

    /// The port selector chose something that is not a usable port.
    #[error("Invalid port selection: {0}")]
    InvalidSelection(String),

    /// An operation was attempted before `initialize` or after `close`.
    #[error("Serial port not connected")]
    NotConnected,

    /// The dispatcher channel closed while a command was pending.
    #[error("Response channel closed while waiting for a reply")]
    Disconnected,

    /// The operating system could not enumerate serial ports.
    #[error("Failed to enumerate serial ports: {0}")]
    PortEnumeration(#[from] serialport::Error),

    /// Configuration could not be extracted from its sources.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration was extracted but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl DeviceError {
    /// Whether a caller may simply issue the same operation again.
    ///
    /// Protocol-level failures self-heal (the gate is always released), so the
    /// next command can go out immediately. Open, enumeration and
    /// configuration errors need operator action first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeviceError::Write { .. }
                | DeviceError::Parse { .. }
                | DeviceError::Timeout { .. }
                | DeviceError::Stream(_)
        )
    }
}

impl From<figment::Error> for DeviceError {
    fn from(value: figment::Error) -> Self {
        DeviceError::Config(Box::new(value))
    }
}

/// A stream-level fault observed by the background reader.
///
/// `std::io::Error` is not `Clone`, so faults are flattened into their kind and
/// message before being fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFault {
    /// Category of the underlying I/O error.
    pub kind: std::io::ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl StreamFault {
    /// Capture an I/O error for publication.
    pub fn from_io(err: &std::io::Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Fault reported when the transport reaches end-of-stream.
    pub fn eof() -> Self {
        Self {
            kind: std::io::ErrorKind::UnexpectedEof,
            message: "serial stream closed by peer".to_string(),
        }
    }
}

impl fmt::Display for StreamFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.kind)
    }
}
