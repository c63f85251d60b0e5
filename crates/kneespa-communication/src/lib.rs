//! # KneeSpa Communication
//!
//! Serial transport, the wire codec for the rig's controller, and the
//! device state tracker that the protocol engine waits on.

pub mod communication;
pub mod device;

pub use communication::{
    loopback::{loopback, LoopbackDevice, LoopbackLink},
    serial::{is_candidate_port, list_ports, SerialLink, SerialPortInfo},
    CommandSink, ConnectionParams, DeviceLink, Transport, TransportEvent, DEFAULT_BAUD_RATE,
};

pub use device::{
    Command, DeviceTracker, Handshake, MoveTarget, ResponseParser, SimulatedRig,
};
