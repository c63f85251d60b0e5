//! Communication layer
//!
//! Connection parameters, the byte-stream abstraction a transport runs over,
//! and the serial transport itself.

pub mod loopback;
pub mod serial;
pub mod transport;

use crate::device::Command;
use async_trait::async_trait;
use kneespa_core::{ConnectionError, DeviceEvent};
use std::io::{Read, Write};

pub use transport::Transport;

/// Default baud rate of the rig's controller
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Port name, e.g. `/dev/ttyACM0` or `COM3`.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout in milliseconds. Bounds how long `disconnect` waits for
    /// the read thread.
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: 50,
        }
    }
}

impl ConnectionParams {
    /// Parameters for a port with default settings
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }

    /// Validate the connection parameters
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.port.trim().is_empty() {
            return Err(ConnectionError::InvalidParameters {
                reason: "port name is empty".to_string(),
            });
        }
        if self.baud_rate == 0 {
            return Err(ConnectionError::InvalidParameters {
                reason: "baud rate must be > 0".to_string(),
            });
        }
        if self.timeout_ms == 0 || self.timeout_ms > 1000 {
            return Err(ConnectionError::InvalidParameters {
                reason: "read timeout must be between 1 and 1000 ms".to_string(),
            });
        }
        Ok(())
    }
}

/// Byte stream to the device
///
/// Split once into a reader (owned by the read thread) and a writer (held
/// by the transport). Reads must time out periodically with
/// `ErrorKind::TimedOut` or `WouldBlock` so the read thread can notice a
/// disconnect.
pub trait DeviceLink: Send {
    /// Human-readable name, usually the port name
    fn name(&self) -> String;

    /// Separate read and write halves
    fn split(self: Box<Self>) -> std::io::Result<(Box<dyn Read + Send>, Box<dyn Write + Send>)>;
}

/// What the read thread reports to its dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded device line
    Device(DeviceEvent),
    /// The link failed; sent at most once per transport
    ConnectionLost {
        /// Why the link failed.
        reason: String,
    },
}

/// Anything commands can be written to
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Name of the link, for logs and events
    fn name(&self) -> &str;

    /// Write one command to the device
    async fn send(&self, command: &Command) -> Result<(), ConnectionError>;

    /// Release the link; later sends fail
    async fn disconnect(&self) {}
}
