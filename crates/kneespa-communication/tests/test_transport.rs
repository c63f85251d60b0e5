//! Transport against the simulated rig over an in-memory link

use kneespa_communication::{
    loopback, Command, CommandSink, DeviceTracker, Handshake, SimulatedRig, Transport,
    TransportEvent,
};
use kneespa_core::{Actuator, DeviceEvent};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_simulated_round_trip() {
    let (link, device) = loopback("sim");
    let mut rig = SimulatedRig::factory();
    let _server = device.serve(move |line| rig.respond(line));

    let (transport, mut rx) = Transport::open(Box::new(link)).expect("open");
    let tracker = Arc::new(DeviceTracker::new());

    transport.send(&Command::Calibrate(2150)).expect("send");
    transport
        .send(&Command::Move {
            actuator: Actuator::A,
            target: kneespa_communication::MoveTarget::Indexed(1312),
            speed: Default::default(),
        })
        .expect("send");
    transport.send(&Command::MeasurePressure).expect("send");

    let mut seen = Vec::new();
    while seen.len() < 4 {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("device should answer")
            .expect("channel open");
        if let TransportEvent::Device(event) = event {
            tracker.apply(&event);
            seen.push(event);
        }
    }

    assert_eq!(seen[0], DeviceEvent::Ready);
    assert_eq!(seen[2], DeviceEvent::Done);
    assert_eq!(seen[3], DeviceEvent::PressureReport { value: 40.0 });
    assert_eq!(tracker.snapshot().position(Actuator::A), Some(1312));
    assert_eq!(tracker.handshake(), Some(Handshake::Done));

    transport.disconnect();
}

#[tokio::test]
async fn test_concurrent_senders_do_not_interleave() {
    let (link, mut device) = loopback("sim");
    let (transport, _rx) = Transport::open(Box::new(link)).expect("open");
    let transport = Arc::new(transport);

    let mut handles = Vec::new();
    for i in 0..8 {
        let transport = transport.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..25 {
                transport
                    .send(&Command::ZeroMarks { a: 1000 + i, b: 2000 + i })
                    .expect("send");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("sender thread");
    }

    for _ in 0..200 {
        let line = device
            .recv_line(Duration::from_secs(1))
            .expect("line should arrive");
        assert!(
            matches!(Command::from_wire(&line), Ok(Command::ZeroMarks { .. })),
            "garbled line: {:?}",
            line
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sink_disconnect_releases_link() {
    let (link, mut device) = loopback("sim");
    let (transport, mut rx) = Transport::open(Box::new(link)).expect("open");
    let sink: Arc<dyn CommandSink> = Arc::new(transport);

    sink.send(&Command::Stop).await.expect("send");
    assert_eq!(device.recv_line(Duration::from_secs(1)).as_deref(), Some("X"));

    sink.disconnect().await;
    assert!(sink.send(&Command::Stop).await.is_err());

    // the read thread is joined and the event channel closed
    let closed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("channel should close");
    assert!(closed.is_none());

    // a second close is harmless
    sink.disconnect().await;
}
