//! # KneeSpa
//!
//! Host controller for the KneeSpa traction rig. Talks to the rig's
//! microcontroller over a serial link and runs therapy protocols on it.
//!
//! ## Architecture
//!
//! KneeSpa is organized as a workspace with multiple crates:
//!
//! 1. **kneespa-core** - Actuators, unit conversion, errors, event bus
//! 2. **kneespa-communication** - Serial transport, wire codec, device state tracker
//! 3. **kneespa-protocols** - Protocol step lists, engine, session coordinator
//! 4. **kneespa-settings** - Connection settings, calibration tables, protocol timing
//! 5. **kneespa** - This crate, plus the `kneespa` operator console binary
//!
//! ## Protocols
//!
//! - **A**: traction cycles at a set force
//! - **B / C / D**: flexion or lateral swings on one axis
//! - **AB / AC / AD**: a swing performed under constant traction
//! - **AC1..AC9**: graded lateral swings under traction
//! - **RESET**: re-home every drive and reload calibration

pub use kneespa_communication::{
    is_candidate_port, list_ports, loopback, Command, CommandSink, ConnectionParams,
    DeviceTracker, Handshake, MoveTarget, SerialPortInfo, SimulatedRig, Transport,
    TransportEvent,
};

pub use kneespa_core::{
    Actuator, ActuatorCalibration, AppEvent, CodecError, ConnectionError, ConnectionEvent,
    DeviceEvent, DeviceSnapshot, Direction, Error, ErrorEvent, EventBus, EventCategory,
    EventFilter, PhysicalSnapshot, PhysicalUnit, ProtocolError, ProtocolEvent, Result, RunId,
    RunOutcome, SpeedClass,
};

pub use kneespa_protocols::{
    build_protocol, ProtocolEngine, ProtocolId, ProtocolParams, ProtocolSpec, RunHandle,
    SessionCoordinator, RESET_PROTOCOL,
};

pub use kneespa_settings::{default_config_path, Config};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
