//! Protocol engine
//!
//! Walks a [`ProtocolSpec`] one step at a time. Command steps are written to
//! the sink and then wait on the tracker until their confirmation shows up;
//! holds wait out a deadline. Every wait also wakes on cancellation and on
//! a device fault, so a stop request never has to sit out a long hold.

use crate::steps::{Confirmation, ProtocolSpec, Step, StepAction};
use kneespa_communication::{Command, CommandSink, DeviceTracker, Handshake};
use kneespa_core::{
    AppEvent, ConnectionError, Error, EventBus, ProtocolError, ProtocolEvent, RunId, RunOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Why a run stopped early
enum Interrupt {
    Cancelled,
    Fault(Error),
}

impl From<ConnectionError> for Interrupt {
    fn from(err: ConnectionError) -> Self {
        Interrupt::Fault(err.into())
    }
}

impl From<ProtocolError> for Interrupt {
    fn from(err: ProtocolError) -> Self {
        Interrupt::Fault(err.into())
    }
}

/// Runs step lists against the device
#[derive(Clone)]
pub struct ProtocolEngine {
    sink: Arc<dyn CommandSink>,
    tracker: Arc<DeviceTracker>,
    bus: Arc<EventBus>,
    step_timeout: Duration,
}

impl ProtocolEngine {
    /// Create an engine
    pub fn new(
        sink: Arc<dyn CommandSink>,
        tracker: Arc<DeviceTracker>,
        bus: Arc<EventBus>,
        step_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            tracker,
            bus,
            step_timeout,
        }
    }

    /// How long a command step waits for its confirmation
    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Run a protocol to a terminal state
    ///
    /// Setting `cancel` to `true`, or dropping its sender, stops the run: a
    /// stop command goes out at once and nothing further is sent. A device
    /// error or step timeout also sends a stop. Publishes a progress event
    /// per step; the caller owns the start and completion events.
    pub async fn run(
        &self,
        run_id: RunId,
        spec: &ProtocolSpec,
        mut cancel: watch::Receiver<bool>,
    ) -> RunOutcome {
        tracing::info!(
            "{} running protocol {} ({}), {} steps",
            run_id,
            spec.id,
            spec.summary,
            spec.total_steps()
        );

        let mut result = Ok(());
        for (index, (phase, step)) in spec.sequence().enumerate() {
            self.publish(ProtocolEvent::Progress {
                run_id,
                message: step.label.clone(),
                step: index,
                cycle: phase.cycle(),
            });
            result = self.step(step, &mut cancel).await;
            if result.is_err() {
                break;
            }
        }
        // a stop that raced the last confirmation still wins
        if result.is_ok() {
            result = unless_cancelled(&cancel);
        }

        let outcome = match result {
            Ok(()) => RunOutcome::Completed,
            Err(Interrupt::Cancelled) => {
                tracing::info!("{} cancelled", run_id);
                self.stop_device().await;
                RunOutcome::Cancelled
            }
            Err(Interrupt::Fault(err)) => {
                tracing::error!("{} faulted: {}", run_id, err);
                self.after_fault(&err).await;
                RunOutcome::Faulted {
                    reason: err.to_string(),
                }
            }
        };
        tracing::info!("{} protocol {} {}", run_id, spec.id, outcome);
        outcome
    }

    /// Run a short list of steps outside any protocol run
    ///
    /// Used for device initialization. Not cancellable; fails on the first
    /// step that faults or times out.
    pub async fn execute(&self, steps: &[Step]) -> kneespa_core::Result<()> {
        let (_keep_open, mut cancel) = watch::channel(false);
        for step in steps {
            match self.step(step, &mut cancel).await {
                Ok(()) => {}
                Err(Interrupt::Fault(err)) => {
                    self.after_fault(&err).await;
                    return Err(err);
                }
                Err(Interrupt::Cancelled) => return Err(Error::other("step sequence cancelled")),
            }
        }
        Ok(())
    }

    async fn step(&self, step: &Step, cancel: &mut watch::Receiver<bool>) -> Result<(), Interrupt> {
        if *cancel.borrow() {
            return Err(Interrupt::Cancelled);
        }
        tracing::debug!("Step: {}", step.label);

        match &step.action {
            StepAction::Command { command, confirm } => {
                self.command(&step.label, command, *confirm, cancel).await
            }
            StepAction::Hold(duration) => self.hold(*duration, cancel).await,
        }
    }

    async fn command(
        &self,
        label: &str,
        command: &Command,
        confirm: Confirmation,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), Interrupt> {
        // stale acknowledgements must not satisfy this step
        self.tracker.clear_handshake();
        if let Some(err) = self.fault() {
            return Err(Interrupt::Fault(err));
        }

        let baseline = self.tracker.snapshot().updates;
        self.sink.send(command).await?;
        if confirm == Confirmation::None {
            return unless_cancelled(cancel);
        }

        let deadline = Instant::now() + self.step_timeout;
        loop {
            if let Some(err) = self.fault() {
                return Err(Interrupt::Fault(err));
            }
            if self.confirmed(confirm, baseline) {
                return unless_cancelled(cancel);
            }

            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Err(Interrupt::Cancelled);
                    }
                }
                _ = self.tracker.notified() => {}
                _ = sleep_until(deadline) => {
                    if self.confirmed(confirm, baseline) {
                        return unless_cancelled(cancel);
                    }
                    return Err(ProtocolError::StepTimeout {
                        step: label.to_string(),
                        timeout_ms: self.step_timeout.as_millis() as u64,
                    }
                    .into());
                }
            }
        }
    }

    async fn hold(
        &self,
        duration: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), Interrupt> {
        let deadline = Instant::now() + duration;
        loop {
            if let Some(err) = self.fault() {
                return Err(Interrupt::Fault(err));
            }

            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return Err(Interrupt::Cancelled);
                    }
                }
                _ = sleep_until(deadline) => return Ok(()),
                _ = self.tracker.notified() => {}
            }
        }
    }

    /// Device fault or lost link waiting in the handshake slot
    fn fault(&self) -> Option<Error> {
        match self.tracker.handshake()? {
            Handshake::ConnectionLost => Some(
                ConnectionError::ConnectionLost {
                    reason: format!("link to {} lost", self.sink.name()),
                }
                .into(),
            ),
            Handshake::Fault(code) => {
                self.tracker.take_handshake();
                Some(ProtocolError::DeviceFault { code }.into())
            }
            Handshake::Ready | Handshake::Done => None,
        }
    }

    fn confirmed(&self, confirm: Confirmation, baseline: u64) -> bool {
        let take = |wanted: fn(Handshake) -> bool| self.tracker.take_handshake_if(wanted).is_some();
        match confirm {
            Confirmation::None => true,
            Confirmation::Ready => take(|h| h == Handshake::Ready),
            Confirmation::Done => take(|h| h == Handshake::Done),
            Confirmation::Handshake => take(|h| matches!(h, Handshake::Ready | Handshake::Done)),
            Confirmation::Position { actuator, code } => {
                let snapshot = self.tracker.snapshot();
                snapshot.updates > baseline && snapshot.position(actuator) == Some(code)
            }
        }
    }

    async fn after_fault(&self, err: &Error) {
        let device_may_be_moving = matches!(
            err,
            Error::Protocol(ProtocolError::StepTimeout { .. } | ProtocolError::DeviceFault { .. })
        );
        if device_may_be_moving {
            self.stop_device().await;
        }
    }

    async fn stop_device(&self) {
        if let Err(e) = self.sink.send(&Command::Stop).await {
            tracing::warn!("Could not send stop: {}", e);
        }
    }

    fn publish(&self, event: ProtocolEvent) {
        if let Err(e) = self.bus.publish(AppEvent::Protocol(event)) {
            tracing::trace!("Progress event not delivered: {}", e);
        }
    }
}

fn unless_cancelled(cancel: &watch::Receiver<bool>) -> Result<(), Interrupt> {
    if *cancel.borrow() {
        Err(Interrupt::Cancelled)
    } else {
        Ok(())
    }
}
