//! Unit conversion utilities
//!
//! Maps physical values (pounds of traction, degrees of flexion, inches of
//! travel) to the integer position codes the rig's controller understands,
//! and back again.
//!
//! Every actuator carries an [`ActuatorCalibration`]: a granularity, a rest
//! position, soft limits and a table of calibration marks. Values are rounded
//! to the granularity before lookup; exact ties round toward the rest
//! position so repeated increments never creep away from it.

use crate::data::Actuator;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TIE_EPSILON: f64 = 1e-9;
const LIMIT_EPSILON: f64 = 1e-9;

/// Physical unit an actuator is commanded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhysicalUnit {
    /// Traction force (lb)
    Pounds,
    /// Flexion angle
    Degrees,
    /// Linear travel
    Inches,
}

impl fmt::Display for PhysicalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pounds => write!(f, "lb"),
            Self::Degrees => write!(f, "°"),
            Self::Inches => write!(f, "in"),
        }
    }
}

impl FromStr for PhysicalUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pounds" | "lb" | "lbs" => Ok(Self::Pounds),
            "degrees" | "deg" | "°" => Ok(Self::Degrees),
            "inches" | "inch" | "in" => Ok(Self::Inches),
            _ => Err(format!("Unknown physical unit: {}", s)),
        }
    }
}

/// How setpoint moves are expressed on the wire for an actuator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveStyle {
    /// `A<addr><value>` with the physical value
    Absolute,
    /// `K<code>` preset position code
    Preset,
    /// `I1<slot><code>` indexed position set
    Indexed,
    /// Relative `E<addr><sign><speed>` jogs only; no setpoint moves
    Jog,
}

/// One calibration table entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMark {
    /// Physical value of the mark.
    pub value: f64,
    /// Device position code.
    pub code: i32,
}

/// Per-actuator calibration used by the converter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCalibration {
    /// Actuator this calibration belongs to.
    pub actuator: Actuator,
    /// Unit the actuator is commanded in.
    pub unit: PhysicalUnit,
    /// Device units per physical unit, used when the mark table is empty.
    pub scale_factor: f64,
    /// Code of the zero physical value, used when the mark table is empty.
    pub zero_code: i32,
    /// Rounding step for commanded values.
    pub granularity: f64,
    /// Rest position; rounding ties go toward it.
    pub rest: f64,
    /// Lower soft limit.
    pub min: f64,
    /// Upper soft limit.
    pub max: f64,
    /// Wire form used for setpoint moves.
    pub move_style: MoveStyle,
    /// Manual jog increment at slow speed.
    pub jog_step_slow: f64,
    /// Manual jog increment at fast speed.
    pub jog_step_fast: f64,
    /// Discrete calibration marks, sorted by value.
    #[serde(default)]
    pub marks: Vec<CalibrationMark>,
}

impl ActuatorCalibration {
    /// Factory calibration for an actuator
    ///
    /// Mirrors the rig as shipped: axial pressure in 0.5 lb steps, horizontal
    /// flexion in 5° steps over a 0..5 in stroke, lateral flexion in 2.5°
    /// steps from -20° to +20°.
    pub fn factory(actuator: Actuator) -> Self {
        match actuator {
            Actuator::A => {
                let mut cal = Self {
                    actuator,
                    unit: PhysicalUnit::Pounds,
                    scale_factor: 20.0,
                    zero_code: 512,
                    granularity: 0.5,
                    rest: 0.0,
                    min: 0.0,
                    max: 100.0,
                    move_style: MoveStyle::Indexed,
                    jog_step_slow: 0.5,
                    jog_step_fast: 1.0,
                    marks: Vec::new(),
                };
                cal.marks = cal.linear_marks();
                cal
            }
            Actuator::B => {
                // 0° sits at full 5 in stroke, each -5° retracts one inch.
                let b_factor = 1200.0;
                let marks = (0..=5)
                    .map(|i| {
                        let degrees = -5.0 * i as f64;
                        let inches = 5.0 - i as f64;
                        CalibrationMark {
                            value: degrees,
                            code: (inches * b_factor / 6.0).round() as i32,
                        }
                    })
                    .rev()
                    .collect();
                Self {
                    actuator,
                    unit: PhysicalUnit::Degrees,
                    scale_factor: b_factor / 30.0,
                    zero_code: 1000,
                    granularity: 5.0,
                    rest: -15.0,
                    min: -25.0,
                    max: 0.0,
                    move_style: MoveStyle::Indexed,
                    jog_step_slow: 5.0,
                    jog_step_fast: 10.0,
                    marks,
                }
            }
            Actuator::C | Actuator::D => {
                let marks = (0..=16)
                    .map(|i| CalibrationMark {
                        value: i as f64 * 2.5 - 20.0,
                        code: i * 220 + 98,
                    })
                    .collect();
                Self {
                    actuator,
                    unit: PhysicalUnit::Degrees,
                    scale_factor: 88.0,
                    zero_code: 1858,
                    granularity: 2.5,
                    rest: 0.0,
                    min: -20.0,
                    max: 20.0,
                    move_style: if actuator == Actuator::C {
                        MoveStyle::Preset
                    } else {
                        MoveStyle::Indexed
                    },
                    jog_step_slow: 5.0,
                    jog_step_fast: 10.0,
                    marks,
                }
            }
        }
    }

    /// Marks at every granularity step between the soft limits
    pub fn linear_marks(&self) -> Vec<CalibrationMark> {
        if self.granularity <= 0.0 || self.max < self.min {
            return Vec::new();
        }
        let count = ((self.max - self.min) / self.granularity).round() as i64;
        (0..=count)
            .map(|i| {
                let value = self.min + i as f64 * self.granularity;
                CalibrationMark {
                    value,
                    code: self.zero_code + (value * self.scale_factor).round() as i32,
                }
            })
            .collect()
    }

    /// Code of the zero mark (sent with `L5`)
    pub fn zero_mark(&self) -> i32 {
        nearest_mark_by_value(&self.marks, 0.0, self.rest)
            .map(|m| m.code)
            .unwrap_or(self.zero_code)
    }

    /// Check that a physical value is inside the soft limits after rounding
    pub fn check(&self, value: f64) -> Result<f64, ProtocolError> {
        let q = quantize(value, self.granularity, self.rest);
        if !q.is_finite() || q < self.min - LIMIT_EPSILON || q > self.max + LIMIT_EPSILON {
            return Err(ProtocolError::OutOfRange {
                actuator: self.actuator.to_string(),
                value: q,
                min: self.min,
                max: self.max,
            });
        }
        Ok(q)
    }

    /// Sanity checks applied when calibration is loaded
    pub fn validate(&self) -> Result<(), String> {
        if !(self.granularity > 0.0) {
            return Err(format!("{}: granularity must be > 0", self.actuator));
        }
        if self.min > self.max {
            return Err(format!("{}: min limit above max limit", self.actuator));
        }
        if self.rest < self.min || self.rest > self.max {
            return Err(format!("{}: rest position outside limits", self.actuator));
        }
        if self.marks.is_empty() && self.scale_factor == 0.0 {
            return Err(format!(
                "{}: needs calibration marks or a scale factor",
                self.actuator
            ));
        }
        if self.marks.windows(2).any(|w| w[0].value >= w[1].value) {
            return Err(format!(
                "{}: calibration marks must be strictly increasing",
                self.actuator
            ));
        }
        Ok(())
    }
}

/// Round a value to the nearest multiple of `granularity` measured from `rest`
///
/// Exact ties round toward `rest`.
pub fn quantize(value: f64, granularity: f64, rest: f64) -> f64 {
    if !value.is_finite() || granularity <= 0.0 {
        return value;
    }
    let steps = (value - rest) / granularity;
    let magnitude = steps.abs();
    let floor = magnitude.floor();
    let n = if ((magnitude - floor) - 0.5).abs() <= TIE_EPSILON {
        floor
    } else {
        magnitude.round()
    };
    rest + steps.signum() * n * granularity
}

/// Convert a physical value to the device code for an actuator
///
/// Fails with [`ProtocolError::OutOfRange`] when the rounded value falls
/// outside the actuator's soft limits.
pub fn to_device_code(calibration: &ActuatorCalibration, value: f64) -> Result<i32, ProtocolError> {
    let q = calibration.check(value)?;
    if let Some(mark) = nearest_mark_by_value(&calibration.marks, q, calibration.rest) {
        return Ok(mark.code);
    }
    Ok(calibration.zero_code + (q * calibration.scale_factor).round() as i32)
}

/// Convert a device code back to a physical value
///
/// Never fails: unknown codes resolve to the nearest calibration mark.
pub fn from_device_code(calibration: &ActuatorCalibration, raw: i32) -> f64 {
    if !calibration.marks.is_empty() {
        let mut best: Option<&CalibrationMark> = None;
        for mark in &calibration.marks {
            best = match best {
                None => Some(mark),
                Some(current) => {
                    let d_new = (mark.code as i64 - raw as i64).abs();
                    let d_cur = (current.code as i64 - raw as i64).abs();
                    if d_new < d_cur
                        || (d_new == d_cur
                            && (mark.value - calibration.rest).abs()
                                < (current.value - calibration.rest).abs())
                    {
                        Some(mark)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        if let Some(mark) = best {
            return mark.value;
        }
    }

    if calibration.scale_factor == 0.0 {
        return calibration.rest;
    }
    let offset = i64::from(raw) - i64::from(calibration.zero_code);
    let value = offset as f64 / calibration.scale_factor;
    quantize(value, calibration.granularity, calibration.rest)
}

fn nearest_mark_by_value(marks: &[CalibrationMark], value: f64, rest: f64) -> Option<&CalibrationMark> {
    let mut best: Option<&CalibrationMark> = None;
    for mark in marks {
        best = match best {
            None => Some(mark),
            Some(current) => {
                let d_new = (mark.value - value).abs();
                let d_cur = (current.value - value).abs();
                if d_new + TIE_EPSILON < d_cur
                    || ((d_new - d_cur).abs() <= TIE_EPSILON
                        && (mark.value - rest).abs() < (current.value - rest).abs())
                {
                    Some(mark)
                } else {
                    Some(current)
                }
            }
        };
    }
    best
}

/// Format a physical value for display
pub fn format_physical(value: f64, unit: PhysicalUnit) -> String {
    match unit {
        PhysicalUnit::Pounds => format!("{:.1} lb", value),
        PhysicalUnit::Inches => format!("{:.1} in", value),
        PhysicalUnit::Degrees => {
            if value.fract() == 0.0 {
                format!("{:.0}°", value)
            } else {
                format!("{:.1}°", value)
            }
        }
    }
}
