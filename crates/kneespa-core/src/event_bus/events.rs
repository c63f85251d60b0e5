//! Events carried on the bus.
//!
//! Everything here is `Clone + Serialize` so a subscriber can forward events
//! to a log file or another process unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::{DeviceEvent, RunId, RunOutcome};

/// Anything the session layer announces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppEvent {
    /// Serial link lifecycle
    Connection(ConnectionEvent),
    /// Decoded device report, in arrival order
    Device(DeviceEvent),
    /// Protocol run lifecycle and progress
    Protocol(ProtocolEvent),
    /// Failure that an operator should see
    Error(ErrorEvent),
}

impl AppEvent {
    /// Category used for filtering
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Connection(_) => EventCategory::Connection,
            AppEvent::Device(_) => EventCategory::Device,
            AppEvent::Protocol(_) => EventCategory::Protocol,
            AppEvent::Error(_) => EventCategory::Error,
        }
    }

    /// Run the event belongs to, for protocol events
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            AppEvent::Protocol(event) => Some(event.run_id()),
            _ => None,
        }
    }
}

impl fmt::Display for AppEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppEvent::Connection(e) => fmt::Display::fmt(e, f),
            AppEvent::Device(e) => write!(f, "Device {}", e),
            AppEvent::Protocol(e) => fmt::Display::fmt(e, f),
            AppEvent::Error(e) => fmt::Display::fmt(e, f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    Connection,
    Device,
    Protocol,
    Error,
}

/// Why a link went down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Closed by the operator
    UserRequested,
    /// Read or write on the link failed
    ConnectionLost(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::UserRequested => write!(f, "closed"),
            DisconnectReason::ConnectionLost(reason) => write!(f, "lost ({})", reason),
        }
    }
}

/// Serial link lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    Connecting {
        port: String,
    },
    Connected {
        port: String,
    },
    Disconnected {
        port: String,
        reason: DisconnectReason,
    },
    ConnectionFailed {
        port: String,
        error: String,
    },
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Connecting { port } => write!(f, "Connecting to {}", port),
            ConnectionEvent::Connected { port } => write!(f, "Connected to {}", port),
            ConnectionEvent::Disconnected { port, reason } => {
                write!(f, "Link to {} {}", port, reason)
            }
            ConnectionEvent::ConnectionFailed { port, error } => {
                write!(f, "Could not open {}: {}", port, error)
            }
        }
    }
}

/// Protocol run events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolEvent {
    /// Run accepted and spawned.
    Started {
        run_id: RunId,
        /// Protocol identifier, e.g. `AC3`.
        protocol: String,
        cycles: u32,
    },
    /// A step has been issued.
    Progress {
        run_id: RunId,
        /// Human-readable step description.
        message: String,
        /// Index of the step within the flattened step list.
        step: usize,
        /// Current cycle, starting at 1. Zero for preamble and postamble.
        cycle: u32,
    },
    /// Run reached a terminal state. Emitted exactly once per run.
    Completed {
        run_id: RunId,
        protocol: String,
        outcome: RunOutcome,
    },
}

impl ProtocolEvent {
    /// Run this event belongs to
    pub fn run_id(&self) -> RunId {
        match self {
            ProtocolEvent::Started { run_id, .. }
            | ProtocolEvent::Progress { run_id, .. }
            | ProtocolEvent::Completed { run_id, .. } => *run_id,
        }
    }
}

impl fmt::Display for ProtocolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolEvent::Started {
                protocol, cycles, ..
            } => write!(f, "Protocol {} started ({} cycles)", protocol, cycles),
            ProtocolEvent::Progress {
                message, step, cycle, ..
            } => write!(f, "[cycle {} step {}] {}", cycle, step, message),
            ProtocolEvent::Completed {
                protocol, outcome, ..
            } => write!(f, "Protocol {} {}", protocol, outcome),
        }
    }
}

/// Failure reported to the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Stable machine-readable code, e.g. `CONNECTION_LOST`
    pub code: String,
    pub message: String,
    /// Whether the rig can carry on without operator action
    pub recoverable: bool,
}

impl ErrorEvent {
    /// Error that needs the operator to step in
    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recoverable: false,
        }
    }
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error [{}]: {}", self.code, self.message)
    }
}
