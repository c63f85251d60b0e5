//! KneeSpa device protocol
//!
//! Wire codec for the rig's controller (commands out, reports in), the
//! shared device state tracker, and a simulated rig.

pub mod command;
pub mod response_parser;
pub mod simulator;
pub mod tracker;

pub use command::{Command, MoveTarget};
pub use response_parser::ResponseParser;
pub use simulator::SimulatedRig;
pub use tracker::{DeviceTracker, Handshake};
