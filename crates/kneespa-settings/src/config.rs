//! Configuration for the KneeSpa controller
//!
//! Supports JSON and TOML files, chosen by extension. Sections:
//! - Connection settings (port, baud rate, read timeout)
//! - Device settings (load cell calibration)
//! - Actuator calibration tables
//! - Protocol timing

use crate::error::{SettingsError, SettingsResult};
use kneespa_core::units::ActuatorCalibration;
use kneespa_core::Actuator;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port; `Auto` picks the first candidate port
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Serial read timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: "Auto".to_string(),
            baud_rate: 115_200,
            timeout_ms: 50,
        }
    }
}

impl ConnectionSettings {
    /// Whether the port should be discovered rather than opened by name
    pub fn is_auto(&self) -> bool {
        self.port.eq_ignore_ascii_case("auto")
    }
}

/// Device settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Load cell calibration value sent with `L0` on startup
    pub calibration: i32,
}

/// Protocol timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// How long a step may wait for its confirmation
    pub step_timeout_ms: u64,
    /// Dwell at each extreme of a cycle
    pub hold_ms: u64,
    /// Pause between cycles
    pub rest_ms: u64,
    /// Cycles run when none are requested
    pub default_cycles: u32,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            step_timeout_ms: 30_000,
            hold_ms: 5_000,
            rest_ms: 3_000,
            default_cycles: 10,
        }
    }
}

impl ProtocolSettings {
    /// Step confirmation deadline
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Dwell at each extreme
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }

    /// Pause between cycles
    pub fn rest(&self) -> Duration {
        Duration::from_millis(self.rest_ms)
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Device settings
    pub device: DeviceSettings,
    /// Protocol timing
    pub protocol: ProtocolSettings,
    /// Per-actuator calibration; D may be left out
    pub actuators: Vec<ActuatorCalibration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::default(),
            device: DeviceSettings::default(),
            protocol: ProtocolSettings::default(),
            actuators: Actuator::ALL
                .into_iter()
                .map(ActuatorCalibration::factory)
                .collect(),
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Calibration for an actuator, if configured
    pub fn calibration(&self, actuator: Actuator) -> Option<&ActuatorCalibration> {
        self.actuators.iter().find(|cal| cal.actuator == actuator)
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path).map_err(SettingsError::io(path))?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content).map_err(|e| e.to_string()),
            Format::Toml => toml::from_str(&content).map_err(|e| e.to_string()),
        }
        .map_err(SettingsError::parse(path))?;

        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load config from file, or defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self).map_err(|e| e.to_string()),
            Format::Toml => toml::to_string_pretty(self).map_err(|e| e.to_string()),
        }
        .map_err(SettingsError::Serialize)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(SettingsError::io(parent))?;
            }
        }
        std::fs::write(path, content).map_err(SettingsError::io(path))?;
        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.connection.port.trim().is_empty() {
            return Err(SettingsError::invalid("connection.port", "must not be empty"));
        }
        if self.connection.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }
        if self.connection.timeout_ms == 0 || self.connection.timeout_ms > 1000 {
            return Err(SettingsError::invalid(
                "connection.timeout_ms",
                "must be between 1 and 1000",
            ));
        }

        if self.protocol.step_timeout_ms == 0 {
            return Err(SettingsError::invalid("protocol.step_timeout_ms", "must be > 0"));
        }
        if self.protocol.default_cycles == 0 || self.protocol.default_cycles > 100 {
            return Err(SettingsError::invalid(
                "protocol.default_cycles",
                "must be between 1 and 100",
            ));
        }

        for required in [Actuator::A, Actuator::B, Actuator::C] {
            if self.calibration(required).is_none() {
                return Err(SettingsError::invalid(
                    "actuators",
                    format!("missing calibration for actuator {}", required),
                ));
            }
        }
        for (i, cal) in self.actuators.iter().enumerate() {
            if self.actuators[..i].iter().any(|c| c.actuator == cal.actuator) {
                return Err(SettingsError::invalid(
                    "actuators",
                    format!("actuator {} configured twice", cal.actuator),
                ));
            }
            cal.validate()
                .map_err(|reason| SettingsError::invalid("actuators", reason))?;
        }

        Ok(())
    }
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("toml") => Ok(Format::Toml),
            other => Err(SettingsError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

/// Platform config location: `<config dir>/kneespa/config.toml`
pub fn default_config_path() -> SettingsResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("kneespa").join("config.toml"))
        .ok_or_else(|| SettingsError::ConfigDirectory("no config directory on this platform".into()))
}
