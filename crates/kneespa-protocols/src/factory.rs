//! Step-list factory
//!
//! Every therapy variant is the same shape: load the zero marks, optionally
//! apply traction, swing one actuator between two extremes each cycle, then
//! return everything to rest. The variants only differ in which actuators
//! take part and which parameters get bound, so they are all built here as
//! plain data.

use crate::steps::{Confirmation, ProtocolSpec, Step};
use kneespa_communication::Command;
use kneespa_core::units::{format_physical, ActuatorCalibration};
use kneespa_core::{Actuator, ProtocolError, SpeedClass};
use kneespa_settings::Config;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound on cycles for one run
pub const MAX_CYCLES: u32 = 100;

/// Default lateral swing either side of centre, degrees
pub const DEFAULT_LATERAL: f64 = 10.0;

/// Default horizontal flexion extremes, degrees
pub const DEFAULT_MINUS: f64 = -20.0;
/// See [`DEFAULT_MINUS`]
pub const DEFAULT_PLUS: f64 = -5.0;

/// Identifier of the maintenance re-homing sequence
pub const RESET_PROTOCOL: &str = "RESET";

/// Which protocol to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolId {
    /// Traction only (`A`) or one swing axis alone (`B`, `C`, `D`)
    Single(Actuator),
    /// Traction held while another axis swings (`AB`, `AC`, `AD`)
    WithTraction(Actuator),
    /// Traction with a graded lateral swing of `2n` degrees (`AC1`..`AC9`)
    Graded(u8),
    /// Re-home every actuator and reload calibration
    Reset,
}

impl FromStr for ProtocolId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_ascii_uppercase();
        let unknown = || ProtocolError::UnknownProtocol { id: s.to_string() };

        match id.as_str() {
            "A" => Ok(ProtocolId::Single(Actuator::A)),
            "B" => Ok(ProtocolId::Single(Actuator::B)),
            "C" => Ok(ProtocolId::Single(Actuator::C)),
            "D" => Ok(ProtocolId::Single(Actuator::D)),
            "AB" => Ok(ProtocolId::WithTraction(Actuator::B)),
            "AC" => Ok(ProtocolId::WithTraction(Actuator::C)),
            "AD" => Ok(ProtocolId::WithTraction(Actuator::D)),
            RESET_PROTOCOL => Ok(ProtocolId::Reset),
            _ => {
                // bare digits are the console shorthand for the graded AC variants
                let level = id.strip_prefix("AC").unwrap_or(&id);
                match level.parse::<u8>() {
                    Ok(n @ 1..=9) if level.len() == 1 => Ok(ProtocolId::Graded(n)),
                    _ => Err(unknown()),
                }
            }
        }
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolId::Single(actuator) => write!(f, "{}", actuator),
            ProtocolId::WithTraction(actuator) => write!(f, "A{}", actuator),
            ProtocolId::Graded(n) => write!(f, "AC{}", n),
            ProtocolId::Reset => write!(f, "{}", RESET_PROTOCOL),
        }
    }
}

/// Parameters a protocol is built with
///
/// Anything left out falls back to the configured or built-in default.
/// Traction variants require `pressure`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolParams {
    /// Traction force, pounds
    pub pressure: Option<f64>,
    /// Number of cycles
    pub cycles: Option<u32>,
    /// Lateral swing to the left, degrees (magnitude)
    pub left: Option<f64>,
    /// Lateral swing to the right, degrees (magnitude)
    pub right: Option<f64>,
    /// Lower horizontal flexion extreme, degrees
    pub minus: Option<f64>,
    /// Upper horizontal flexion extreme, degrees
    pub plus: Option<f64>,
}

impl ProtocolParams {
    /// Set the traction force
    pub fn with_pressure(mut self, pressure: f64) -> Self {
        self.pressure = Some(pressure);
        self
    }

    /// Set the cycle count
    pub fn with_cycles(mut self, cycles: u32) -> Self {
        self.cycles = Some(cycles);
        self
    }

    /// Set both lateral extremes
    pub fn with_lateral(mut self, left: f64, right: f64) -> Self {
        self.left = Some(left);
        self.right = Some(right);
        self
    }

    /// Set both horizontal flexion extremes
    pub fn with_flexion(mut self, minus: f64, plus: f64) -> Self {
        self.minus = Some(minus);
        self.plus = Some(plus);
        self
    }
}

/// Build the step list for a protocol identifier
///
/// Fails before anything is sent: `UnknownProtocol` for an identifier that
/// does not resolve, `InvalidParams` for missing or malformed parameters,
/// `OutOfRange` when a bound value falls outside an actuator's soft limits.
pub fn build_protocol(
    id: &str,
    params: &ProtocolParams,
    config: &Config,
) -> Result<ProtocolSpec, ProtocolError> {
    let protocol: ProtocolId = id.parse()?;
    let builder = Builder { config };

    let spec = match protocol {
        ProtocolId::Reset => builder.reset()?,
        ProtocolId::Single(Actuator::A) => builder.traction(params)?,
        ProtocolId::Single(axis) => builder.swing(protocol, axis, params, false)?,
        ProtocolId::WithTraction(axis) => builder.swing(protocol, axis, params, true)?,
        ProtocolId::Graded(n) => {
            let amplitude = 2.0 * f64::from(n);
            let params = params.clone().with_lateral(amplitude, amplitude);
            builder.swing(protocol, Actuator::C, &params, true)?
        }
    };

    tracing::debug!(
        "Built protocol {} ({}): {} steps",
        spec.id,
        spec.summary,
        spec.total_steps()
    );
    Ok(spec)
}

/// Steps sent once after connecting: load cell calibration, then zero marks
pub fn initialization_steps(config: &Config) -> Result<Vec<Step>, ProtocolError> {
    let builder = Builder { config };
    Ok(vec![
        Step::command(
            "Load cell calibration",
            Command::Calibrate(config.device.calibration),
            Confirmation::Ready,
        ),
        builder.zero_marks(Confirmation::Ready)?,
    ])
}

/// Steps that re-home a single drive
///
/// The axial drive homes on the controller and then needs its load cell
/// calibration again. The other drives are moved back to rest.
pub fn actuator_reset_steps(
    actuator: Actuator,
    config: &Config,
) -> Result<Vec<Step>, ProtocolError> {
    let builder = Builder { config };
    match actuator {
        Actuator::A => {
            builder.calibration(Actuator::A)?;
            Ok(vec![
                Step::command("Home A", Command::Reset(Actuator::A), Confirmation::Handshake),
                Step::command(
                    "Load cell calibration",
                    Command::Calibrate(config.device.calibration),
                    Confirmation::Ready,
                ),
            ])
        }
        other => Ok(vec![builder.rest_step(other, Confirmation::Handshake)?]),
    }
}

struct Builder<'a> {
    config: &'a Config,
}

impl Builder<'_> {
    fn calibration(&self, actuator: Actuator) -> Result<&ActuatorCalibration, ProtocolError> {
        self.config
            .calibration(actuator)
            .ok_or_else(|| ProtocolError::InvalidParams {
                param: actuator.to_string(),
                reason: format!("actuator {} is not configured", actuator),
            })
    }

    fn cycles(&self, params: &ProtocolParams) -> Result<u32, ProtocolError> {
        let cycles = params
            .cycles
            .unwrap_or(self.config.protocol.default_cycles);
        if cycles == 0 || cycles > MAX_CYCLES {
            return Err(ProtocolError::InvalidParams {
                param: "cycles".to_string(),
                reason: format!("must be between 1 and {}", MAX_CYCLES),
            });
        }
        Ok(cycles)
    }

    fn pressure(&self, params: &ProtocolParams) -> Result<f64, ProtocolError> {
        let pressure = params.pressure.ok_or_else(|| ProtocolError::InvalidParams {
            param: "pressure".to_string(),
            reason: "required for traction protocols".to_string(),
        })?;
        if !pressure.is_finite() || pressure <= 0.0 {
            return Err(ProtocolError::InvalidParams {
                param: "pressure".to_string(),
                reason: "must be a positive number of pounds".to_string(),
            });
        }
        self.calibration(Actuator::A)?.check(pressure)
    }

    fn zero_marks(&self, confirm: Confirmation) -> Result<Step, ProtocolError> {
        let a = self.calibration(Actuator::A)?.zero_mark();
        let b = self.calibration(Actuator::B)?.zero_mark();
        Ok(Step::command(
            "Load zero marks",
            Command::ZeroMarks { a, b },
            confirm,
        ))
    }

    fn move_step(
        &self,
        actuator: Actuator,
        value: f64,
        confirm: Confirmation,
    ) -> Result<Step, ProtocolError> {
        let cal = self.calibration(actuator)?;
        let command = Command::move_to(cal, value, SpeedClass::Slow)?;
        let label = format!(
            "Move {} to {}",
            actuator,
            format_physical(cal.check(value)?, cal.unit)
        );
        Ok(Step::command(label, command, confirm))
    }

    fn rest_step(&self, actuator: Actuator, confirm: Confirmation) -> Result<Step, ProtocolError> {
        let rest = self.calibration(actuator)?.rest;
        self.move_step(actuator, rest, confirm)
    }

    fn hold(&self, what: &str) -> Step {
        let hold = self.config.protocol.hold();
        Step::hold(format!("Hold {} for {:.1}s", what, hold.as_secs_f64()), hold)
    }

    fn pause(&self) -> Step {
        let rest = self.config.protocol.rest();
        Step::hold(format!("Rest for {:.1}s", rest.as_secs_f64()), rest)
    }

    /// Press, hold, release, rest
    fn traction(&self, params: &ProtocolParams) -> Result<ProtocolSpec, ProtocolError> {
        let cycles = self.cycles(params)?;
        let pressure = self.pressure(params)?;

        Ok(ProtocolSpec {
            id: ProtocolId::Single(Actuator::A).to_string(),
            summary: format!(
                "{} x{}",
                format_physical(pressure, self.calibration(Actuator::A)?.unit),
                cycles
            ),
            preamble: vec![self.zero_marks(Confirmation::Handshake)?],
            cycle: vec![
                self.move_step(Actuator::A, pressure, Confirmation::Done)?,
                self.hold("traction"),
                self.rest_step(Actuator::A, Confirmation::Done)?,
                self.pause(),
            ],
            postamble: Vec::new(),
            cycles,
        })
    }

    /// Extremes a swing axis moves between
    fn extremes(&self, axis: Actuator, params: &ProtocolParams) -> Result<(f64, f64), ProtocolError> {
        if axis == Actuator::B {
            let minus = params.minus.unwrap_or(DEFAULT_MINUS);
            let plus = params.plus.unwrap_or(DEFAULT_PLUS);
            if minus >= plus {
                return Err(ProtocolError::InvalidParams {
                    param: "minus".to_string(),
                    reason: format!("{} must be below plus ({})", minus, plus),
                });
            }
            return Ok((minus, plus));
        }

        let left = params.left.unwrap_or(DEFAULT_LATERAL);
        let right = params.right.unwrap_or(DEFAULT_LATERAL);
        for (param, value) in [("left", left), ("right", right)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ProtocolError::InvalidParams {
                    param: param.to_string(),
                    reason: "must be a non-negative angle".to_string(),
                });
            }
        }
        Ok((-left, right))
    }

    /// Swing one axis between two extremes, optionally under traction
    fn swing(
        &self,
        protocol: ProtocolId,
        axis: Actuator,
        params: &ProtocolParams,
        with_traction: bool,
    ) -> Result<ProtocolSpec, ProtocolError> {
        let cycles = self.cycles(params)?;
        let (first, second) = self.extremes(axis, params)?;
        let unit = self.calibration(axis)?.unit;

        let mut preamble = vec![self.zero_marks(Confirmation::Handshake)?];
        let mut postamble = vec![self.rest_step(axis, Confirmation::Done)?];
        let mut summary = format!(
            "{} {} .. {} x{}",
            axis,
            format_physical(first, unit),
            format_physical(second, unit),
            cycles
        );

        if with_traction {
            let pressure = self.pressure(params)?;
            preamble.push(self.move_step(Actuator::A, pressure, Confirmation::Done)?);
            postamble.push(self.rest_step(Actuator::A, Confirmation::Done)?);
            summary = format!(
                "{} at {}",
                summary,
                format_physical(pressure, self.calibration(Actuator::A)?.unit)
            );
        }

        Ok(ProtocolSpec {
            id: protocol.to_string(),
            summary,
            preamble,
            cycle: vec![
                self.move_step(axis, first, Confirmation::Done)?,
                self.hold("position"),
                self.move_step(axis, second, Confirmation::Done)?,
                self.hold("position"),
            ],
            postamble,
            cycles,
        })
    }

    /// Controller reset, zero marks, every drive to rest, calibration
    fn reset(&self) -> Result<ProtocolSpec, ProtocolError> {
        Ok(ProtocolSpec {
            id: ProtocolId::Reset.to_string(),
            summary: "re-home".to_string(),
            preamble: Vec::new(),
            cycle: vec![
                Step::command("Reset controller", Command::ResetDevice, Confirmation::Ready),
                self.zero_marks(Confirmation::Ready)?,
                self.rest_step(Actuator::A, Confirmation::Handshake)?,
                self.rest_step(Actuator::B, Confirmation::Handshake)?,
                self.rest_step(Actuator::C, Confirmation::Handshake)?,
                Step::command(
                    "Load cell calibration",
                    Command::Calibrate(self.config.device.calibration),
                    Confirmation::Ready,
                ),
            ],
            postamble: Vec::new(),
            cycles: 1,
        })
    }
}
