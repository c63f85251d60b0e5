//! Device reports and point-in-time device state

use super::actuator::Actuator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One decoded line of device output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// Position of a single actuator
    PositionReport {
        /// Reporting actuator.
        actuator: Actuator,
        /// Position code as reported by the controller.
        raw_position: i32,
        /// Motor step counter.
        raw_steps: i32,
    },
    /// Load cell reading in pounds
    PressureReport {
        /// Pressure in lb.
        value: f64,
    },
    /// Combined status: A and B positions, C step counter, pressure
    StatusReport {
        /// Axial position code.
        a: i32,
        /// Horizontal position code.
        b: i32,
        /// Lateral step counter.
        c: i32,
        /// Pressure in lb.
        pressure: f64,
    },
    /// Device ready for the next command
    Ready,
    /// Requested move has completed
    Done,
    /// Firmware reported an error
    Error {
        /// Firmware error code.
        code: u32,
    },
}

impl DeviceEvent {
    /// Whether this event is a Ready/Done handshake
    pub fn is_handshake(&self) -> bool {
        matches!(self, DeviceEvent::Ready | DeviceEvent::Done)
    }
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::PositionReport {
                actuator,
                raw_position,
                raw_steps,
            } => write!(
                f,
                "position {} = {} ({} steps)",
                actuator, raw_position, raw_steps
            ),
            DeviceEvent::PressureReport { value } => write!(f, "pressure {:.1} lb", value),
            DeviceEvent::StatusReport { a, b, c, pressure } => {
                write!(f, "status A={} B={} C={} P={:.1}", a, b, c, pressure)
            }
            DeviceEvent::Ready => write!(f, "ready"),
            DeviceEvent::Done => write!(f, "done"),
            DeviceEvent::Error { code } => write!(f, "error {}", code),
        }
    }
}

/// Last known position of one actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionReading {
    /// Position code.
    pub raw_position: i32,
    /// Motor step counter.
    pub raw_steps: i32,
}

/// Consistent copy of everything the device has told us
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Per-actuator positions; absent until the first report.
    pub positions: BTreeMap<Actuator, PositionReading>,
    /// Last pressure reading in lb.
    pub pressure: Option<f64>,
    /// Number of events applied so far.
    pub updates: u64,
}

impl DeviceSnapshot {
    /// Position code of an actuator, if known
    pub fn position(&self, actuator: Actuator) -> Option<i32> {
        self.positions.get(&actuator).map(|r| r.raw_position)
    }

    /// Step counter of an actuator, if known
    pub fn steps(&self, actuator: Actuator) -> Option<i32> {
        self.positions.get(&actuator).map(|r| r.raw_steps)
    }
}

/// Snapshot translated into physical units
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhysicalSnapshot {
    /// Per-actuator physical value (lb or degrees).
    pub values: BTreeMap<Actuator, f64>,
    /// Last pressure reading in lb.
    pub pressure: Option<f64>,
}
