//! Session coordinator against a scripted device

use async_trait::async_trait;
use kneespa_communication::{Command, CommandSink, DeviceTracker, TransportEvent};
use kneespa_core::{
    Actuator, AppEvent, ConnectionError, ConnectionEvent, DeviceEvent, Direction,
    DisconnectReason, Error, EventBus, EventCategory, EventFilter, ProtocolError, ProtocolEvent,
    RunOutcome, SpeedClass,
};
use kneespa_protocols::{ProtocolParams, SessionCoordinator};
use kneespa_settings::Config;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

type Responder = fn(&Command) -> Vec<DeviceEvent>;

/// Stands in for the transport: records every command and answers through
/// the same channel a real read thread would use
struct ScriptedRig {
    sent: Mutex<Vec<String>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    respond: Responder,
    closed: AtomicBool,
}

impl ScriptedRig {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    fn inject(&self, event: TransportEvent) {
        self.events.send(event).expect("dispatcher alive");
    }
}

#[async_trait]
impl CommandSink for ScriptedRig {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, command: &Command) -> Result<(), ConnectionError> {
        self.sent.lock().push(command.encode());
        for event in (self.respond)(command) {
            let _ = self.events.send(TransportEvent::Device(event));
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Moves finish, everything else is acknowledged
fn cooperative(command: &Command) -> Vec<DeviceEvent> {
    match command {
        Command::Move { .. } | Command::Reset(_) => vec![DeviceEvent::Done],
        Command::MeasurePressure => vec![DeviceEvent::PressureReport { value: 12.5 }],
        _ => vec![DeviceEvent::Ready],
    }
}

/// Never acknowledges the load cell calibration
fn slow_calibration(command: &Command) -> Vec<DeviceEvent> {
    match command {
        Command::Calibrate(_) => Vec::new(),
        other => cooperative(other),
    }
}

/// Acknowledges control commands but never finishes a move
fn stuck(command: &Command) -> Vec<DeviceEvent> {
    match command {
        Command::Move { .. } => Vec::new(),
        _ => vec![DeviceEvent::Ready],
    }
}

fn quick_config() -> Config {
    let mut config = Config::default();
    config.protocol.hold_ms = 1;
    config.protocol.rest_ms = 1;
    config.protocol.step_timeout_ms = 2_000;
    config
}

fn setup(config: Config, respond: Responder) -> (Arc<SessionCoordinator>, Arc<ScriptedRig>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let rig = Arc::new(ScriptedRig {
        sent: Mutex::new(Vec::new()),
        events: tx,
        respond,
        closed: AtomicBool::new(false),
    });
    let session = Arc::new(SessionCoordinator::new(
        rig.clone(),
        Arc::new(DeviceTracker::new()),
        Arc::new(EventBus::new()),
        config,
    ));
    session.spawn_dispatch(rx);
    (session, rig)
}

fn count_completions(bus: &EventBus) -> Arc<AtomicUsize> {
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = completed.clone();
    bus.subscribe(
        EventFilter::Categories(vec![EventCategory::Protocol]),
        move |event| {
            if let AppEvent::Protocol(ProtocolEvent::Completed { .. }) = event {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        },
    );
    completed
}

#[tokio::test]
async fn test_traction_protocol_completes_once() {
    let (session, rig) = setup(quick_config(), cooperative);
    let completed = count_completions(session.bus());

    let params = ProtocolParams::default().with_pressure(40.0).with_cycles(10);
    let handle = session.start("A", &params).expect("start");
    assert_eq!(handle.protocol, "A");
    assert_eq!(handle.cycles, 10);

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("run should finish");
    assert_eq!(outcome, RunOutcome::Completed);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert!(!session.is_running());

    let sent = rig.sent();
    assert_eq!(sent[0], "L5512 1000");
    assert_eq!(sent[1], "I121312");
    assert_eq!(sent[2], "I12512");
    assert_eq!(sent.len(), 1 + 2 * 10);
    assert!(!sent.contains(&"X".to_string()));
}

#[tokio::test]
async fn test_progress_events_follow_the_steps() {
    let (session, _rig) = setup(quick_config(), cooperative);
    let mut events = session.bus().receiver();

    let params = ProtocolParams::default().with_cycles(2);
    let handle = session.start("C", &params).expect("start");
    handle.wait().await;

    let mut progress = Vec::new();
    let mut started = 0;
    loop {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Ok(AppEvent::Protocol(ProtocolEvent::Started { .. }))) => started += 1,
            Ok(Ok(AppEvent::Protocol(ProtocolEvent::Progress { step, cycle, .. }))) => {
                progress.push((step, cycle))
            }
            Ok(Ok(AppEvent::Protocol(ProtocolEvent::Completed { outcome, .. }))) => {
                assert!(outcome.is_completed());
                break;
            }
            Ok(Ok(_)) => {}
            other => panic!("event stream ended early: {:?}", other),
        }
    }

    assert_eq!(started, 1);
    // zero marks, 2 cycles of 4 steps, back to rest
    assert_eq!(progress.len(), 1 + 4 * 2 + 1);
    assert_eq!(progress[0], (0, 0));
    assert_eq!(progress[1], (1, 1));
    assert_eq!(progress[5], (5, 2));
    assert_eq!(progress[9], (9, 0));
}

#[tokio::test]
async fn test_step_timeout_stops_device_and_late_done_is_ignored() {
    let mut config = quick_config();
    config.protocol.step_timeout_ms = 100;
    let (session, rig) = setup(config, stuck);

    let params = ProtocolParams::default().with_pressure(40.0);
    let handle = session.start("A", &params).expect("start");
    let outcome = handle.wait().await;

    match outcome {
        RunOutcome::Faulted { reason } => assert!(reason.contains("timed out"), "{}", reason),
        other => panic!("expected a fault, got {:?}", other),
    }
    assert_eq!(rig.sent(), vec!["L5512 1000", "I121312", "X"]);

    // a Done arriving after the fault must not confirm anything later
    rig.inject(TransportEvent::Device(DeviceEvent::Done));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!session.is_running());

    let handle = session.start("A", &params).expect("restart");
    assert!(matches!(handle.wait().await, RunOutcome::Faulted { .. }));
    assert_eq!(rig.sent().len(), 6);
}

#[tokio::test]
async fn test_stop_cancels_during_hold() {
    let mut config = quick_config();
    config.protocol.hold_ms = 60_000;
    let (session, rig) = setup(config, cooperative);
    let completed = count_completions(session.bus());

    let handle = session.start("C", &ProtocolParams::default()).expect("start");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.active_protocol().as_deref(), Some("C"));

    let outcome = tokio::time::timeout(Duration::from_secs(1), session.stop())
        .await
        .expect("stop should not wait out the hold");
    assert_eq!(outcome, Some(RunOutcome::Cancelled));
    assert_eq!(handle.outcome(), Some(RunOutcome::Cancelled));
    assert_eq!(rig.sent().last().map(String::as_str), Some("X"));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(session.stop().await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_one_run() {
    let mut config = quick_config();
    config.protocol.hold_ms = 60_000;
    let (session, _rig) = setup(config, cooperative);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            session.start("B", &ProtocolParams::default())
        }));
    }

    let mut started = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.expect("task") {
            Ok(_) => started += 1,
            Err(ProtocolError::AlreadyRunning { active }) => {
                assert_eq!(active, "B");
                rejected += 1;
            }
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(started, 1);
    assert_eq!(rejected, 7);

    assert_eq!(session.stop().await, Some(RunOutcome::Cancelled));
}

#[tokio::test]
async fn test_rejected_starts_send_nothing() {
    let (session, rig) = setup(quick_config(), cooperative);

    assert!(matches!(
        session.start("Z", &ProtocolParams::default()),
        Err(ProtocolError::UnknownProtocol { .. })
    ));
    assert!(matches!(
        session.start("AC", &ProtocolParams::default()),
        Err(ProtocolError::InvalidParams { .. })
    ));
    assert!(matches!(
        session.start("A", &ProtocolParams::default().with_pressure(500.0)),
        Err(ProtocolError::OutOfRange { .. })
    ));
    assert!(matches!(
        session.start("B", &ProtocolParams::default().with_cycles(1000)),
        Err(ProtocolError::InvalidParams { .. })
    ));

    assert!(!session.is_running());
    assert!(rig.sent().is_empty());
}

#[tokio::test]
async fn test_manual_moves_track_setpoints() {
    let (session, rig) = setup(quick_config(), cooperative);

    assert_eq!(session.move_to(Actuator::C, 10.0).await.expect("move"), 10.0);
    assert_eq!(
        session
            .jog(Actuator::C, Direction::Forward, SpeedClass::Slow)
            .await
            .expect("jog"),
        Some(15.0)
    );
    let err = session
        .jog(Actuator::C, Direction::Forward, SpeedClass::Fast)
        .await
        .unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(rig.sent(), vec!["K2738", "K3178"]);

    // without a setpoint the jog starts from the reported position
    session.on_device_event(DeviceEvent::PositionReport {
        actuator: Actuator::A,
        raw_position: 1312,
        raw_steps: 0,
    });
    assert_eq!(
        session
            .jog(Actuator::A, Direction::Forward, SpeedClass::Slow)
            .await
            .expect("jog"),
        Some(40.5)
    );
    assert_eq!(rig.sent().last().map(String::as_str), Some("I121322"));
}

#[tokio::test]
async fn test_manual_commands_rejected_while_running() {
    let mut config = quick_config();
    config.protocol.hold_ms = 60_000;
    let (session, rig) = setup(config, cooperative);

    session.start("D", &ProtocolParams::default()).expect("start");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let before = rig.sent().len();

    assert!(session.move_to(Actuator::D, 0.0).await.unwrap_err().is_rejection());
    assert!(session
        .jog(Actuator::B, Direction::Reverse, SpeedClass::Slow)
        .await
        .unwrap_err()
        .is_rejection());
    assert!(session.measure_pressure().await.unwrap_err().is_rejection());
    assert!(session.query_status().await.unwrap_err().is_rejection());
    assert!(session.initialize_device().await.unwrap_err().is_rejection());
    assert_eq!(rig.sent().len(), before);

    let outcome = session.emergency_stop().await.expect("stop");
    assert_eq!(outcome, Some(RunOutcome::Cancelled));
    assert!(!session.is_running());
}

#[tokio::test]
async fn test_emergency_stop_when_idle() {
    let (session, rig) = setup(quick_config(), cooperative);
    assert_eq!(session.emergency_stop().await.expect("stop"), None);
    assert_eq!(rig.sent(), vec!["X"]);
}

#[tokio::test]
async fn test_connection_loss_faults_the_run() {
    let (session, rig) = setup(quick_config(), stuck);
    let mut events = session.bus().receiver();

    let handle = session
        .start("A", &ProtocolParams::default().with_pressure(20.0))
        .expect("start");
    tokio::time::sleep(Duration::from_millis(20)).await;
    rig.inject(TransportEvent::ConnectionLost {
        reason: "unplugged".to_string(),
    });

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle.wait())
        .await
        .expect("loss should end the run");
    assert!(matches!(outcome, RunOutcome::Faulted { .. }));
    assert!(session.tracker().is_connection_lost());

    let mut disconnected = false;
    while let Ok(event) = events.try_recv() {
        if let AppEvent::Connection(ConnectionEvent::Disconnected { port, .. }) = event {
            assert_eq!(port, "scripted");
            disconnected = true;
        }
    }
    assert!(disconnected);

    // no stop is written to a dead link
    assert!(!rig.sent().contains(&"X".to_string()));
}

#[tokio::test]
async fn test_initialize_and_snapshot() {
    let mut config = quick_config();
    config.device.calibration = 2150;
    let (session, rig) = setup(config, cooperative);

    session.initialize_device().await.expect("initialize");
    assert_eq!(rig.sent(), vec!["L02150", "L5512 1000"]);

    session.on_device_event(DeviceEvent::StatusReport {
        a: 1312,
        b: 400,
        c: 0,
        pressure: 39.5,
    });
    let snapshot = session.snapshot_physical();
    assert_eq!(snapshot.values.get(&Actuator::A), Some(&40.0));
    assert_eq!(snapshot.values.get(&Actuator::B), Some(&-15.0));
    assert_eq!(snapshot.values.get(&Actuator::D), None);
    assert_eq!(snapshot.pressure, Some(39.5));

    session.measure_pressure().await.expect("measure");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.snapshot_physical().pressure, Some(12.5));
}

#[tokio::test]
async fn test_start_rejected_while_initializing() {
    let mut config = quick_config();
    config.protocol.step_timeout_ms = 300;
    config.device.calibration = 2150;
    let (session, rig) = setup(config, slow_calibration);

    let init = tokio::spawn({
        let session = session.clone();
        async move { session.initialize_device().await }
    });
    while rig.sent().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(session.is_busy());
    assert!(!session.is_running());
    match session.start("C", &ProtocolParams::default()) {
        Err(ProtocolError::AlreadyRunning { active }) => assert_eq!(active, "initialization"),
        other => panic!("start during initialization: {:?}", other.map(|h| h.protocol)),
    }
    assert!(session.query_status().await.unwrap_err().is_rejection());

    let err = init.await.expect("task").unwrap_err();
    assert!(err.is_timeout());
    // nothing from a run was interleaved with initialization
    assert_eq!(rig.sent(), vec!["L02150", "X"]);
    assert!(!session.is_busy());

    // the slot is free again once initialization gave up
    let handle = session.start("C", &ProtocolParams::default()).expect("start");
    assert_eq!(handle.protocol, "C");
    session.stop().await;
}

#[tokio::test]
async fn test_reset_single_actuator() {
    let mut config = quick_config();
    config.device.calibration = 2150;
    let (session, rig) = setup(config, cooperative);

    session.reset_actuator(Actuator::A).await.expect("reset A");
    assert_eq!(rig.sent(), vec!["R12", "L02150"]);

    session.reset_actuator(Actuator::C).await.expect("reset C");
    assert_eq!(rig.sent().last().map(String::as_str), Some("K1858"));
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_reset_rejected_while_running() {
    let mut config = quick_config();
    config.protocol.hold_ms = 60_000;
    let (session, rig) = setup(config, cooperative);

    session.start("B", &ProtocolParams::default()).expect("start");
    tokio::time::sleep(Duration::from_millis(20)).await;
    let before = rig.sent().len();

    match session.reset_actuator(Actuator::B).await {
        Err(Error::Protocol(ProtocolError::AlreadyRunning { active })) => assert_eq!(active, "B"),
        other => panic!("reset during a run: {:?}", other),
    }
    assert_eq!(rig.sent().len(), before);
    session.stop().await;
}

#[tokio::test]
async fn test_extreme_position_on_linear_calibration() {
    let mut config = quick_config();
    for cal in config.actuators.iter_mut() {
        if cal.actuator == Actuator::A {
            cal.marks.clear();
        }
    }
    let (session, rig) = setup(config, cooperative);

    session.on_device_event(DeviceEvent::PositionReport {
        actuator: Actuator::A,
        raw_position: i32::MIN,
        raw_steps: 0,
    });
    let value = session.snapshot_physical().values[&Actuator::A];
    assert!(value.is_finite() && value < 0.0);

    // jogging from there is out of range, not a crash
    let err = session
        .jog(Actuator::A, Direction::Forward, SpeedClass::Slow)
        .await
        .unwrap_err();
    assert!(err.is_rejection());
    assert!(rig.sent().is_empty());
}

#[tokio::test]
async fn test_disconnect_releases_the_link() {
    let mut config = quick_config();
    config.protocol.hold_ms = 60_000;
    let (session, rig) = setup(config, cooperative);
    let mut events = session.bus().receiver();

    session.start("C", &ProtocolParams::default()).expect("start");
    tokio::time::sleep(Duration::from_millis(20)).await;
    session.disconnect().await;

    assert!(rig.closed.load(Ordering::SeqCst));
    assert!(!session.is_running());

    let mut closed_by_user = false;
    while let Ok(event) = events.try_recv() {
        if let AppEvent::Connection(ConnectionEvent::Disconnected { reason, .. }) = event {
            closed_by_user = reason == DisconnectReason::UserRequested;
        }
    }
    assert!(closed_by_user);
}
