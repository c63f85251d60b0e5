//! Property tests for the command codec

use kneespa_communication::{Command, MoveTarget, ResponseParser};
use kneespa_core::units::{from_device_code, to_device_code, ActuatorCalibration};
use kneespa_core::{Actuator, DeviceEvent, Direction, SpeedClass};
use proptest::prelude::*;

fn actuator() -> impl Strategy<Value = Actuator> {
    prop::sample::select(Actuator::ALL.to_vec())
}

fn command() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Stop),
        Just(Command::ResetDevice),
        Just(Command::MeasurePressure),
        Just(Command::QueryStatus),
        actuator().prop_map(Command::Reset),
        (0i32..100_000).prop_map(Command::Calibrate),
        (0i32..10_000, 0i32..10_000).prop_map(|(a, b)| Command::ZeroMarks { a, b }),
        (0i32..10_000).prop_map(|code| Command::Move {
            actuator: Actuator::C,
            target: MoveTarget::Preset(code),
            speed: SpeedClass::Slow,
        }),
        (actuator(), 0i32..10_000).prop_map(|(actuator, code)| Command::Move {
            actuator,
            target: MoveTarget::Indexed(code),
            speed: SpeedClass::Slow,
        }),
        (actuator(), -500i32..500).prop_map(|(actuator, tenths)| Command::Move {
            actuator,
            target: MoveTarget::Absolute(tenths as f64 / 10.0),
            speed: SpeedClass::Slow,
        }),
        (
            actuator(),
            prop::bool::ANY,
            prop::sample::select(vec![SpeedClass::Slow, SpeedClass::Fast])
        )
            .prop_map(|(actuator, forward, speed)| {
                let direction = if forward {
                    Direction::Forward
                } else {
                    Direction::Reverse
                };
                Command::jog(actuator, direction, speed)
            }),
    ]
}

proptest! {
    #[test]
    fn encoded_commands_parse_back(cmd in command()) {
        let line = cmd.to_line();
        prop_assert!(line.ends_with('\n'));
        prop_assert_eq!(line.matches('\n').count(), 1);
        prop_assert_eq!(Command::from_wire(&line).unwrap(), cmd);
    }

    #[test]
    fn parser_never_panics(line in "\\PC{0,24}") {
        let mut parser = ResponseParser::new();
        let _ = parser.parse(&line);
    }

    #[test]
    fn position_reports_decode(addr in 12u8..=15, pos in -10_000i32..10_000, steps in 0i32..100_000) {
        let mut parser = ResponseParser::new();
        let event = parser.parse(&format!("P{} {} {}", addr, pos, steps)).unwrap();
        prop_assert_eq!(
            event,
            Some(DeviceEvent::PositionReport {
                actuator: Actuator::from_address(addr).unwrap(),
                raw_position: pos,
                raw_steps: steps,
            })
        );
    }

    #[test]
    fn converter_round_trip_within_granularity(which in actuator(), t in 0.0f64..=1.0) {
        let cal = ActuatorCalibration::factory(which);
        let value = cal.min + t * (cal.max - cal.min);
        let code = to_device_code(&cal, value).unwrap();
        let back = from_device_code(&cal, code);
        prop_assert!((back - value).abs() <= cal.granularity + 1e-9,
            "{} -> {} -> {}", value, code, back);
    }
}
