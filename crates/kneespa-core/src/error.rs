//! Error handling for KneeSpa
//!
//! Provides error types for every layer of the controller:
//! - Connection errors (serial transport)
//! - Codec errors (wire lines that cannot be decoded)
//! - Protocol errors (parameter validation, run lifecycle, device faults)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents errors related to the serial link between the host and the
/// rig's microcontroller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Connection lost mid-session
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// A command could not be written to the device
    #[error("Failed to send '{command}': {reason}")]
    SendFailed {
        /// The wire text that was being sent.
        command: String,
        /// The reason the write failed.
        reason: String,
    },

    /// Transport has not been connected or was already disconnected
    #[error("Not connected")]
    NotConnected,

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },
}

/// Codec error type
///
/// Raised when a line received from the device does not match the firmware
/// report grammar. These are recoverable: the read loop drops the line.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Line does not match any known prefix or arity
    #[error("Malformed line '{line}': {reason}")]
    MalformedLine {
        /// The offending line, trimmed.
        line: String,
        /// Why the line was rejected.
        reason: String,
    },
}

impl CodecError {
    /// Shorthand for building a [`CodecError::MalformedLine`]
    pub fn malformed(line: impl Into<String>, reason: impl Into<String>) -> Self {
        CodecError::MalformedLine {
            line: line.into(),
            reason: reason.into(),
        }
    }
}

/// Protocol error type
///
/// Represents errors raised while validating or running a therapy protocol.
/// None of these are fatal to the process; at worst they end the current run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Physical value outside an actuator's soft limits
    #[error("{actuator}: {value} is outside the soft limits [{min}, {max}]")]
    OutOfRange {
        /// The actuator the value was destined for.
        actuator: String,
        /// The rejected physical value (after rounding).
        value: f64,
        /// Lower soft limit.
        min: f64,
        /// Upper soft limit.
        max: f64,
    },

    /// A protocol parameter failed validation
    #[error("Invalid parameter '{param}': {reason}")]
    InvalidParams {
        /// Name of the parameter.
        param: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A run or a device operation already holds the command stream
    #[error("Rig is busy: {active}")]
    AlreadyRunning {
        /// Protocol identifier, or the name of the operation in progress.
        active: String,
    },

    /// No protocol matches the identifier
    #[error("Unknown protocol '{id}'")]
    UnknownProtocol {
        /// The identifier that did not resolve.
        id: String,
    },

    /// A confirmation did not arrive in time
    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    StepTimeout {
        /// Label of the step that was waiting.
        step: String,
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// The device reported an error
    #[error("Device fault code {code}")]
    DeviceFault {
        /// Firmware error code.
        code: u32,
    },
}

/// Main error type for KneeSpa
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Codec error
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::StepTimeout { .. }))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if this error was raised before any command reached the device
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Protocol(
                ProtocolError::OutOfRange { .. }
                    | ProtocolError::InvalidParams { .. }
                    | ProtocolError::AlreadyRunning { .. }
                    | ProtocolError::UnknownProtocol { .. }
            )
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
