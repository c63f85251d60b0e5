//! Protocol step lists
//!
//! A [`ProtocolSpec`] is plain data: what to send, what to wait for, and how
//! many times to repeat the cycle. The engine is the only thing that
//! interprets it.

use kneespa_communication::Command;
use kneespa_core::Actuator;
use std::time::Duration;

/// What must happen before a command step counts as finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Nothing; advance as soon as the command is written
    None,
    /// `G`
    Ready,
    /// `D`
    Done,
    /// Either `G` or `D`
    Handshake,
    /// A position report for the actuator showing this code
    Position {
        /// Actuator to watch.
        actuator: Actuator,
        /// Expected position code.
        code: i32,
    },
}

/// What a step does
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Send a command and wait for its confirmation
    Command {
        /// Command to send.
        command: Command,
        /// Confirmation that ends the step.
        confirm: Confirmation,
    },
    /// Wait for a fixed time
    Hold(Duration),
}

/// One step of a protocol
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Progress text shown while the step runs.
    pub label: String,
    /// The step's action.
    pub action: StepAction,
}

impl Step {
    /// Command step
    pub fn command(label: impl Into<String>, command: Command, confirm: Confirmation) -> Self {
        Self {
            label: label.into(),
            action: StepAction::Command { command, confirm },
        }
    }

    /// Timed hold
    pub fn hold(label: impl Into<String>, duration: Duration) -> Self {
        Self {
            label: label.into(),
            action: StepAction::Hold(duration),
        }
    }

    /// Command sent by this step, if any
    pub fn sent_command(&self) -> Option<&Command> {
        match &self.action {
            StepAction::Command { command, .. } => Some(command),
            StepAction::Hold(_) => None,
        }
    }
}

/// Which part of a protocol a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Run once before the first cycle
    Preamble,
    /// Repeated; carries the cycle number starting at 1
    Cycle(u32),
    /// Run once after the last cycle
    Postamble,
}

impl Phase {
    /// Cycle number, zero outside the cycles
    pub fn cycle(self) -> u32 {
        match self {
            Phase::Cycle(n) => n,
            _ => 0,
        }
    }
}

/// Immutable description of one protocol run
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolSpec {
    /// Identifier such as `A`, `AB` or `AC3`.
    pub id: String,
    /// Human summary of the bound parameters.
    pub summary: String,
    /// Steps run once before the cycles.
    pub preamble: Vec<Step>,
    /// Steps repeated every cycle.
    pub cycle: Vec<Step>,
    /// Steps run once after the cycles.
    pub postamble: Vec<Step>,
    /// Number of cycles.
    pub cycles: u32,
}

impl ProtocolSpec {
    /// Every step in execution order with its phase
    pub fn sequence(&self) -> impl Iterator<Item = (Phase, &Step)> + '_ {
        let pre = self.preamble.iter().map(|s| (Phase::Preamble, s));
        let cycles = (1..=self.cycles)
            .flat_map(move |n| self.cycle.iter().map(move |s| (Phase::Cycle(n), s)));
        let post = self.postamble.iter().map(|s| (Phase::Postamble, s));
        pre.chain(cycles).chain(post)
    }

    /// Number of steps a full run executes
    pub fn total_steps(&self) -> usize {
        self.preamble.len() + self.cycle.len() * self.cycles as usize + self.postamble.len()
    }

    /// Commands a full run sends, in order
    pub fn commands(&self) -> Vec<&Command> {
        self.sequence()
            .filter_map(|(_, step)| step.sent_command())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ProtocolSpec {
        ProtocolSpec {
            id: "T".to_string(),
            summary: String::new(),
            preamble: vec![Step::command("zero", Command::QueryStatus, Confirmation::None)],
            cycle: vec![
                Step::command("stop", Command::Stop, Confirmation::Ready),
                Step::hold("hold", Duration::from_millis(5)),
            ],
            postamble: vec![Step::command("reset", Command::ResetDevice, Confirmation::Ready)],
            cycles: 3,
        }
    }

    #[test]
    fn test_sequence_order() {
        let spec = spec();
        let phases: Vec<Phase> = spec.sequence().map(|(phase, _)| phase).collect();
        assert_eq!(phases.len(), spec.total_steps());
        assert_eq!(phases[0], Phase::Preamble);
        assert_eq!(phases[1], Phase::Cycle(1));
        assert_eq!(phases[6], Phase::Cycle(3));
        assert_eq!(phases[7], Phase::Postamble);
        assert_eq!(Phase::Postamble.cycle(), 0);
    }

    #[test]
    fn test_commands_skip_holds() {
        let spec = spec();
        let commands = spec.commands();
        assert_eq!(commands.len(), 5);
        assert_eq!(commands[0], &Command::QueryStatus);
        assert_eq!(commands[4], &Command::ResetDevice);
    }
}
