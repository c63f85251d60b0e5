//! # KneeSpa Protocols
//!
//! Therapy protocol sequencing: the step lists for every protocol variant,
//! the engine that runs them against the device, and the session
//! coordinator that makes sure only one runs at a time.

pub mod engine;
pub mod factory;
pub mod session;
pub mod steps;

pub use engine::ProtocolEngine;
pub use factory::{
    actuator_reset_steps, build_protocol, initialization_steps, ProtocolId, ProtocolParams,
    MAX_CYCLES, RESET_PROTOCOL,
};
pub use session::{RunHandle, SessionCoordinator};
pub use steps::{Confirmation, Phase, ProtocolSpec, Step, StepAction};
