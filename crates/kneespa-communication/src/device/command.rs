//! KneeSpa command creator
//!
//! Builds the single-line ASCII commands understood by the rig's
//! microcontroller and parses them back (for transcript replay and the
//! simulated rig).

use kneespa_core::units::{to_device_code, ActuatorCalibration, MoveStyle};
use kneespa_core::{Actuator, CodecError, Direction, ProtocolError, SpeedClass};
use std::fmt;

/// Where a move should go
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveTarget {
    /// Physical value, sent as `A<addr><value>`
    Absolute(f64),
    /// Preset position code, sent as `K<code>`
    Preset(i32),
    /// Position code for an indexed slot, sent as `I1<slot><code>`
    Indexed(i32),
    /// Continuous jog, sent as `E<addr><sign><speed>`
    Jog(Direction),
}

/// One command to the device
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Move an actuator
    Move {
        /// Actuator to move.
        actuator: Actuator,
        /// Destination.
        target: MoveTarget,
        /// Speed class; only jog moves carry it on the wire.
        speed: SpeedClass,
    },
    /// Stop all motion (`X`)
    Stop,
    /// Re-home one actuator (`R<addr>`)
    Reset(Actuator),
    /// Load cell calibration value (`L0<value>`)
    Calibrate(i32),
    /// Zero marks for the axial and horizontal drives (`L5<a> <b>`)
    ZeroMarks {
        /// Axial zero code.
        a: i32,
        /// Horizontal zero code.
        b: i32,
    },
    /// Request a pressure reading (`L4`)
    MeasurePressure,
    /// Request a status report (`L6`)
    QueryStatus,
    /// Reset the controller (`Y`)
    ResetDevice,
}

impl Command {
    /// Jog an actuator in a direction
    pub fn jog(actuator: Actuator, direction: Direction, speed: SpeedClass) -> Self {
        Command::Move {
            actuator,
            target: MoveTarget::Jog(direction),
            speed,
        }
    }

    /// Setpoint move to a physical value, using the actuator's move style
    ///
    /// The value is rounded and checked against the soft limits first.
    pub fn move_to(
        calibration: &ActuatorCalibration,
        value: f64,
        speed: SpeedClass,
    ) -> Result<Self, ProtocolError> {
        let target = match calibration.move_style {
            MoveStyle::Absolute => MoveTarget::Absolute(calibration.check(value)?),
            MoveStyle::Preset => MoveTarget::Preset(to_device_code(calibration, value)?),
            MoveStyle::Indexed => MoveTarget::Indexed(to_device_code(calibration, value)?),
            MoveStyle::Jog => {
                return Err(ProtocolError::InvalidParams {
                    param: calibration.actuator.to_string(),
                    reason: "actuator only accepts jog moves".to_string(),
                })
            }
        };
        Ok(Command::Move {
            actuator: calibration.actuator,
            target,
            speed,
        })
    }

    /// Wire text without the line terminator
    pub fn encode(&self) -> String {
        match self {
            Command::Move {
                actuator,
                target,
                speed,
            } => match target {
                MoveTarget::Absolute(value) => format!("A{}{:.1}", actuator.address(), value),
                MoveTarget::Preset(code) => format!("K{}", code),
                MoveTarget::Indexed(code) => format!("I1{}{}", actuator.slot(), code),
                MoveTarget::Jog(direction) => format!(
                    "E{}{}{:02}",
                    actuator.address(),
                    direction.sign(),
                    speed.code()
                ),
            },
            Command::Stop => "X".to_string(),
            Command::Reset(actuator) => format!("R{}", actuator.address()),
            Command::Calibrate(value) => format!("L0{}", value),
            Command::ZeroMarks { a, b } => format!("L5{:3} {:3}", a, b),
            Command::MeasurePressure => "L4".to_string(),
            Command::QueryStatus => "L6".to_string(),
            Command::ResetDevice => "Y".to_string(),
        }
    }

    /// Wire text including the `\n` terminator
    pub fn to_line(&self) -> String {
        let mut line = self.encode();
        line.push('\n');
        line
    }

    /// Parse a command line as written by [`Command::encode`]
    ///
    /// `K` presets always address the lateral drive, and speed is only
    /// recovered for jogs.
    pub fn from_wire(line: &str) -> Result<Self, CodecError> {
        let line = line.trim();
        let bad = |reason: &str| CodecError::malformed(line, reason);

        let mut chars = line.chars();
        let prefix = chars.next().ok_or_else(|| bad("empty command"))?;
        let rest = chars.as_str();

        match prefix {
            'X' if rest.is_empty() => Ok(Command::Stop),
            'Y' if rest.is_empty() => Ok(Command::ResetDevice),
            'A' => {
                let (actuator, value) = split_address(rest).ok_or_else(|| bad("bad address"))?;
                let value: f64 = value.parse().map_err(|_| bad("bad value"))?;
                Ok(Command::Move {
                    actuator,
                    target: MoveTarget::Absolute(value),
                    speed: SpeedClass::default(),
                })
            }
            'K' => {
                let code = rest.parse().map_err(|_| bad("bad preset code"))?;
                Ok(Command::Move {
                    actuator: Actuator::C,
                    target: MoveTarget::Preset(code),
                    speed: SpeedClass::default(),
                })
            }
            'I' => {
                let rest = rest.strip_prefix('1').ok_or_else(|| bad("bad index bank"))?;
                let slot = rest
                    .get(..1)
                    .and_then(|s| s.parse::<u8>().ok())
                    .and_then(Actuator::from_slot)
                    .ok_or_else(|| bad("bad slot"))?;
                let code = rest[1..].parse().map_err(|_| bad("bad position code"))?;
                Ok(Command::Move {
                    actuator: slot,
                    target: MoveTarget::Indexed(code),
                    speed: SpeedClass::default(),
                })
            }
            'E' => {
                let (actuator, tail) = split_address(rest).ok_or_else(|| bad("bad address"))?;
                let direction = match tail.chars().next() {
                    Some('+') => Direction::Forward,
                    Some('-') => Direction::Reverse,
                    _ => return Err(bad("bad direction")),
                };
                let speed: u8 = tail[1..].parse().map_err(|_| bad("bad speed"))?;
                Ok(Command::jog(actuator, direction, SpeedClass::from_code(speed)))
            }
            'R' => {
                let (actuator, tail) = split_address(rest).ok_or_else(|| bad("bad address"))?;
                if !tail.is_empty() {
                    return Err(bad("trailing characters"));
                }
                Ok(Command::Reset(actuator))
            }
            'L' => match rest.get(..1) {
                Some("0") => {
                    let value = rest[1..].parse().map_err(|_| bad("bad calibration"))?;
                    Ok(Command::Calibrate(value))
                }
                Some("4") if rest.len() == 1 => Ok(Command::MeasurePressure),
                Some("6") if rest.len() == 1 => Ok(Command::QueryStatus),
                Some("5") => {
                    let fields: Vec<&str> = rest[1..].split_whitespace().collect();
                    match fields.as_slice() {
                        [a, b] => Ok(Command::ZeroMarks {
                            a: a.parse().map_err(|_| bad("bad zero mark"))?,
                            b: b.parse().map_err(|_| bad("bad zero mark"))?,
                        }),
                        _ => Err(bad("expected two zero marks")),
                    }
                }
                _ => Err(bad("unknown L command")),
            },
            _ => Err(bad("unknown command")),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

fn split_address(s: &str) -> Option<(Actuator, &str)> {
    let address = s.get(..2)?.parse::<u8>().ok()?;
    Some((Actuator::from_address(address)?, &s[2..]))
}
