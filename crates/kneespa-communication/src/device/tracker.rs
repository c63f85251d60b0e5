//! Device state tracker
//!
//! Holds the last thing the device told us about every actuator, plus a
//! single handshake slot for Ready/Done/Error. Written by the event dispatch
//! path only; read by the protocol engine and anyone wanting a snapshot.

use kneespa_core::{Actuator, DeviceEvent, DeviceSnapshot};
use parking_lot::{Mutex, RwLock};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Acknowledgement waiting in the handshake slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// Device is ready for the next command
    Ready,
    /// Last move finished
    Done,
    /// Device reported an error code
    Fault(u32),
    /// The serial link is gone; nothing else will arrive
    ConnectionLost,
}

/// Shared device state
#[derive(Debug, Default)]
pub struct DeviceTracker {
    state: RwLock<DeviceSnapshot>,
    handshake: Mutex<Option<Handshake>>,
    notify: Notify,
}

impl DeviceTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one device event into the state and wake a waiter
    pub fn apply(&self, event: &DeviceEvent) {
        {
            let mut state = self.state.write();
            match event {
                DeviceEvent::PositionReport {
                    actuator,
                    raw_position,
                    raw_steps,
                } => {
                    let reading = state.positions.entry(*actuator).or_default();
                    reading.raw_position = *raw_position;
                    reading.raw_steps = *raw_steps;
                }
                DeviceEvent::PressureReport { value } => {
                    state.pressure = Some(*value);
                }
                DeviceEvent::StatusReport { a, b, c, pressure } => {
                    state.positions.entry(Actuator::A).or_default().raw_position = *a;
                    state.positions.entry(Actuator::B).or_default().raw_position = *b;
                    state.positions.entry(Actuator::C).or_default().raw_steps = *c;
                    state.pressure = Some(*pressure);
                }
                DeviceEvent::Ready => self.set_handshake(Handshake::Ready),
                DeviceEvent::Done => self.set_handshake(Handshake::Done),
                DeviceEvent::Error { code } => self.set_handshake(Handshake::Fault(*code)),
            }
            state.updates += 1;
        }
        self.notify.notify_one();
    }

    /// Consistent copy of the current state
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.state.read().clone()
    }

    /// Current handshake, left in place
    pub fn handshake(&self) -> Option<Handshake> {
        *self.handshake.lock()
    }

    /// Take the handshake out of the slot
    pub fn take_handshake(&self) -> Option<Handshake> {
        self.handshake.lock().take()
    }

    /// Take the handshake only if it satisfies `accept`
    pub fn take_handshake_if(&self, accept: impl FnOnce(Handshake) -> bool) -> Option<Handshake> {
        let mut slot = self.handshake.lock();
        match *slot {
            Some(handshake) if handshake != Handshake::ConnectionLost && accept(handshake) => {
                slot.take()
            }
            _ => None,
        }
    }

    /// Drop any stale acknowledgement before a new command goes out
    ///
    /// A lost connection is terminal and is never cleared.
    pub fn clear_handshake(&self) {
        let mut slot = self.handshake.lock();
        if *slot != Some(Handshake::ConnectionLost) {
            *slot = None;
        }
    }

    /// Record that the link is gone and wake any waiter
    pub fn mark_connection_lost(&self) {
        self.set_handshake(Handshake::ConnectionLost);
        self.notify.notify_one();
    }

    /// Whether the link has been reported lost
    pub fn is_connection_lost(&self) -> bool {
        self.handshake() == Some(Handshake::ConnectionLost)
    }

    /// Future that resolves on the next state change
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    fn set_handshake(&self, handshake: Handshake) {
        let mut slot = self.handshake.lock();
        if *slot != Some(Handshake::ConnectionLost) {
            *slot = Some(handshake);
        }
    }
}
