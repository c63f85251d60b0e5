//! Actuator identities and motion enums

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One physical drive axis of the rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Actuator {
    /// Axial traction drive
    A,
    /// Horizontal flexion drive
    B,
    /// Lateral flexion drive
    C,
    /// Secondary lateral flexion drive (optional on some rigs)
    D,
}

impl Actuator {
    /// All actuators in address order
    pub const ALL: [Actuator; 4] = [Actuator::A, Actuator::B, Actuator::C, Actuator::D];

    /// Two-digit bus address used by `A`, `E`, `R` and position reports
    pub fn address(self) -> u8 {
        match self {
            Actuator::A => 12,
            Actuator::B => 13,
            Actuator::C => 14,
            Actuator::D => 15,
        }
    }

    /// Slot digit used by the indexed position command `I1<slot><code>`
    pub fn slot(self) -> u8 {
        self.address() - 10
    }

    /// Look up an actuator by bus address
    pub fn from_address(address: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.address() == address)
    }

    /// Look up an actuator by indexed slot
    pub fn from_slot(slot: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.slot() == slot)
    }

    /// Human name of the axis
    pub fn description(self) -> &'static str {
        match self {
            Actuator::A => "axial",
            Actuator::B => "horizontal flexion",
            Actuator::C => "lateral flexion",
            Actuator::D => "lateral flexion (secondary)",
        }
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Actuator::A => "A",
            Actuator::B => "B",
            Actuator::C => "C",
            Actuator::D => "D",
        };
        write!(f, "{}", letter)
    }
}

impl FromStr for Actuator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "AXIAL" => Ok(Actuator::A),
            "B" | "HORIZONTAL" => Ok(Actuator::B),
            "C" | "LATERAL" => Ok(Actuator::C),
            "D" => Ok(Actuator::D),
            _ => Err(format!("Unknown actuator: {}", s)),
        }
    }
}

/// Jog direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Increase the physical value
    Forward,
    /// Decrease the physical value
    Reverse,
}

impl Direction {
    /// Sign character used on the wire
    pub fn sign(self) -> char {
        match self {
            Direction::Forward => '+',
            Direction::Reverse => '-',
        }
    }

    /// Multiplier applied to a step size
    pub fn factor(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Reverse => -1.0,
        }
    }
}

/// Speed class of a move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpeedClass {
    /// Fine positioning
    #[default]
    Slow,
    /// Coarse positioning
    Fast,
}

impl SpeedClass {
    /// Firmware speed code sent with jog commands
    pub fn code(self) -> u8 {
        match self {
            SpeedClass::Slow => 4,
            SpeedClass::Fast => 20,
        }
    }

    /// Inverse of [`SpeedClass::code`]; codes at or below 4 are slow
    pub fn from_code(code: u8) -> Self {
        if code <= 4 {
            SpeedClass::Slow
        } else {
            SpeedClass::Fast
        }
    }
}
