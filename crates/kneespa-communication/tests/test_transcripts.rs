//! Replay recorded serial transcripts through the codec

use kneespa_communication::{Command, DeviceTracker, ResponseParser};
use kneespa_core::{Actuator, CodecError, DeviceEvent};

enum Entry {
    Host(String),
    Device(String),
}

fn load(name: &str) -> Vec<Entry> {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    let text = std::fs::read_to_string(&path).expect("fixture should exist");
    text.lines()
        .filter_map(|line| {
            if let Some(cmd) = line.strip_prefix(">> ") {
                Some(Entry::Host(cmd.to_string()))
            } else if let Some(reply) = line.strip_prefix("<<") {
                Some(Entry::Device(reply.trim_start().to_string()))
            } else {
                None
            }
        })
        .collect()
}

/// Replays a transcript, returning decoded events and rejected lines
fn replay(name: &str) -> (Vec<DeviceEvent>, Vec<CodecError>, DeviceTracker) {
    let mut parser = ResponseParser::new();
    let tracker = DeviceTracker::new();
    let mut events = Vec::new();
    let mut errors = Vec::new();

    for entry in load(name) {
        match entry {
            Entry::Host(line) => {
                let command = Command::from_wire(&line).expect("host line should parse");
                assert_eq!(command.encode(), line, "host line should re-encode verbatim");
            }
            Entry::Device(line) => match parser.parse(&line) {
                Ok(Some(event)) => {
                    tracker.apply(&event);
                    events.push(event);
                }
                Ok(None) => {}
                Err(e) => errors.push(e),
            },
        }
    }

    (events, errors, tracker)
}

#[test]
fn test_startup_and_press() {
    let (events, errors, tracker) = replay("startup_and_press.txt");
    assert!(errors.is_empty());
    assert_eq!(events.len(), 9);
    assert!(events.contains(&DeviceEvent::PressureReport { value: 40.0 }));

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.position(Actuator::A), Some(512));
    assert_eq!(snapshot.position(Actuator::B), Some(400));
    assert_eq!(snapshot.pressure, Some(0.0));
}

#[test]
fn test_lateral_swing_short_status() {
    let (events, errors, tracker) = replay("lateral_swing.txt");
    assert!(errors.is_empty());

    // "P13 390" carries no step count and "S512 390" no C or pressure
    assert!(events.contains(&DeviceEvent::StatusReport {
        a: 512,
        b: 390,
        c: 1320,
        pressure: 0.0,
    }));

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.position(Actuator::C), Some(1858));
    assert_eq!(snapshot.steps(Actuator::C), Some(1760));
    assert_eq!(snapshot.position(Actuator::B), Some(390));
}

#[test]
fn test_noisy_link() {
    let (events, errors, tracker) = replay("noisy_link.txt");

    assert_eq!(errors.len(), 2, "banner and over-long report are dropped");
    assert!(events.contains(&DeviceEvent::Error { code: 4 }));

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.position(Actuator::C), Some(185));
}
