//! Data models shared across the KneeSpa crates

pub mod actuator;
pub mod device;
pub mod run;

pub use actuator::{Actuator, Direction, SpeedClass};
pub use device::{DeviceEvent, DeviceSnapshot, PhysicalSnapshot, PositionReading};
pub use run::{RunId, RunOutcome};
