//! Simulated rig
//!
//! Answers command lines the way the controller firmware does: moves report
//! the new position and finish with `D`, control commands answer `G`.
//! Used for dry runs and tests.

use super::command::{Command, MoveTarget};
use kneespa_core::units::{from_device_code, to_device_code, ActuatorCalibration};
use kneespa_core::Actuator;
use std::collections::HashMap;

/// In-memory stand-in for the rig's controller
#[derive(Debug, Clone)]
pub struct SimulatedRig {
    calibrations: HashMap<Actuator, ActuatorCalibration>,
    positions: HashMap<Actuator, i32>,
    steps: HashMap<Actuator, i32>,
    calibration: i32,
}

impl SimulatedRig {
    /// Rig parked at each actuator's rest position
    pub fn new(calibrations: impl IntoIterator<Item = ActuatorCalibration>) -> Self {
        let calibrations: HashMap<_, _> = calibrations
            .into_iter()
            .map(|cal| (cal.actuator, cal))
            .collect();
        let positions = calibrations
            .values()
            .map(|cal| {
                let code = to_device_code(cal, cal.rest).unwrap_or(cal.zero_code);
                (cal.actuator, code)
            })
            .collect();
        Self {
            calibrations,
            positions,
            steps: HashMap::new(),
            calibration: 0,
        }
    }

    /// Rig with factory calibration on all four actuators
    pub fn factory() -> Self {
        Self::new(Actuator::ALL.map(ActuatorCalibration::factory))
    }

    /// Current position code of an actuator
    pub fn position(&self, actuator: Actuator) -> Option<i32> {
        self.positions.get(&actuator).copied()
    }

    /// Last calibration value loaded with `L0`
    pub fn calibration(&self) -> i32 {
        self.calibration
    }

    /// Reply lines for one command line
    pub fn respond(&mut self, line: &str) -> Vec<String> {
        let command = match Command::from_wire(line) {
            Ok(command) => command,
            Err(_) => return vec!["F1".to_string()],
        };

        match command {
            Command::Move {
                actuator, target, ..
            } => {
                let code = match target {
                    MoveTarget::Preset(code) | MoveTarget::Indexed(code) => code,
                    MoveTarget::Absolute(value) => match self.calibrations.get(&actuator) {
                        Some(cal) => match to_device_code(cal, value) {
                            Ok(code) => code,
                            Err(_) => return vec!["F2".to_string()],
                        },
                        None => (value * 10.0).round() as i32,
                    },
                    MoveTarget::Jog(direction) => {
                        let current = self.position(actuator).unwrap_or_default();
                        current + direction.factor() as i32 * 10
                    }
                };
                vec![self.move_to(actuator, code), "D".to_string()]
            }
            Command::Reset(actuator) => {
                let code = self
                    .calibrations
                    .get(&actuator)
                    .map(|cal| cal.zero_mark())
                    .unwrap_or_default();
                vec![self.move_to(actuator, code), "D".to_string()]
            }
            Command::Calibrate(value) => {
                self.calibration = value;
                vec!["G".to_string()]
            }
            Command::Stop | Command::ResetDevice | Command::ZeroMarks { .. } => {
                vec!["G".to_string()]
            }
            Command::MeasurePressure => vec![format!("W{:.1}", self.pressure())],
            Command::QueryStatus => vec![format!(
                "S{} {} {} {:.1}",
                self.position(Actuator::A).unwrap_or_default(),
                self.position(Actuator::B).unwrap_or_default(),
                self.steps.get(&Actuator::C).copied().unwrap_or_default(),
                self.pressure()
            )],
        }
    }

    fn move_to(&mut self, actuator: Actuator, code: i32) -> String {
        let previous = self.positions.insert(actuator, code).unwrap_or(code);
        let steps = self.steps.entry(actuator).or_default();
        *steps += (code - previous).abs();
        format!("P{} {} {}", actuator.address(), code, steps)
    }

    fn pressure(&self) -> f64 {
        match (
            self.calibrations.get(&Actuator::A),
            self.position(Actuator::A),
        ) {
            (Some(cal), Some(code)) => from_device_code(cal, code),
            _ => 0.0,
        }
    }
}
