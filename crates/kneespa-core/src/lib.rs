//! # KneeSpa Core
//!
//! Core types and utilities for the KneeSpa traction rig controller.
//! Provides actuator identities, unit conversion between physical values and
//! device position codes, the error taxonomy, and the event bus.

pub mod data;
pub mod error;
pub mod event_bus;
pub mod units;

pub use data::{
    Actuator, DeviceEvent, DeviceSnapshot, Direction, PhysicalSnapshot, PositionReading, RunId,
    RunOutcome, SpeedClass,
};

pub use error::{CodecError, ConnectionError, Error, ProtocolError, Result};

pub use event_bus::{
    AppEvent, ConnectionEvent, DisconnectReason, ErrorEvent, EventBus, EventBusError,
    EventCategory, EventFilter, ProtocolEvent, SubscriptionId,
};

pub use units::{
    format_physical, from_device_code, quantize, to_device_code, ActuatorCalibration,
    CalibrationMark, MoveStyle, PhysicalUnit,
};
