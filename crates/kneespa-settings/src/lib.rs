//! KneeSpa Settings Crate
//!
//! Connection settings, per-actuator calibration tables and protocol
//! timing, persisted as JSON or TOML.

pub mod config;
pub mod error;

pub use config::{
    default_config_path, Config, ConnectionSettings, DeviceSettings, ProtocolSettings,
};
pub use error::{SettingsError, SettingsResult};
