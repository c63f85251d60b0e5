//! Session coordinator
//!
//! The one place callers go through. Owns the single slot that a protocol
//! run, device initialization, a drive reset or a manual command must hold
//! before writing to the device, and feeds device events into the tracker.
//! All notifications go out on the injected event bus.

use crate::engine::ProtocolEngine;
use crate::factory::{actuator_reset_steps, build_protocol, initialization_steps, ProtocolParams};
use chrono::{DateTime, Utc};
use kneespa_communication::{Command, CommandSink, DeviceTracker, TransportEvent};
use kneespa_core::units::{from_device_code, ActuatorCalibration, MoveStyle};
use kneespa_core::{
    Actuator, AppEvent, ConnectionEvent, DeviceEvent, Direction, DisconnectReason, ErrorEvent,
    EventBus, PhysicalSnapshot, ProtocolError, ProtocolEvent, RunId, RunOutcome, SpeedClass,
};
use kneespa_settings::Config;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// The run currently holding the slot
struct ActiveRun {
    run_id: RunId,
    protocol: String,
    cancel: watch::Sender<bool>,
    finished: watch::Receiver<Option<RunOutcome>>,
}

/// Whatever holds the command stream
enum Occupant {
    Run(ActiveRun),
    /// Initialization, a drive reset or a manual command
    Operation(&'static str),
}

impl Occupant {
    fn name(&self) -> String {
        match self {
            Occupant::Run(run) => run.protocol.clone(),
            Occupant::Operation(what) => (*what).to_string(),
        }
    }
}

type Slot = Arc<Mutex<Option<Occupant>>>;

/// Frees the slot when a device operation ends, however it ends
struct OperationGuard {
    slot: Slot,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Some(Occupant::Operation(_))) {
            *slot = None;
        }
    }
}

/// Handle to a started run
#[derive(Debug, Clone)]
pub struct RunHandle {
    /// Run identifier, as carried by the run's events.
    pub run_id: RunId,
    /// Protocol identifier, e.g. `AC3`.
    pub protocol: String,
    /// Number of cycles the run was built with.
    pub cycles: u32,
    /// When the run was accepted.
    pub started_at: DateTime<Utc>,
    finished: watch::Receiver<Option<RunOutcome>>,
}

impl RunHandle {
    /// Outcome, if the run has finished
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.finished.borrow().clone()
    }

    /// Wait for the run to reach a terminal state
    pub async fn wait(&self) -> RunOutcome {
        wait_outcome(self.finished.clone()).await
    }
}

async fn wait_outcome(mut finished: watch::Receiver<Option<RunOutcome>>) -> RunOutcome {
    match finished.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone().unwrap_or(RunOutcome::Cancelled),
        Err(_) => RunOutcome::Faulted {
            reason: "run task ended without an outcome".to_string(),
        },
    }
}

/// Serializes everything the operator asks the rig to do
pub struct SessionCoordinator {
    sink: Arc<dyn CommandSink>,
    tracker: Arc<DeviceTracker>,
    bus: Arc<EventBus>,
    config: Config,
    active: Slot,
    setpoints: Mutex<HashMap<Actuator, f64>>,
}

impl SessionCoordinator {
    /// Create a coordinator over a command sink
    pub fn new(
        sink: Arc<dyn CommandSink>,
        tracker: Arc<DeviceTracker>,
        bus: Arc<EventBus>,
        config: Config,
    ) -> Self {
        Self {
            sink,
            tracker,
            bus,
            config,
            active: Arc::new(Mutex::new(None)),
            setpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared device state
    pub fn tracker(&self) -> &Arc<DeviceTracker> {
        &self.tracker
    }

    /// Event bus notifications are published on
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Whether a protocol run is active
    pub fn is_running(&self) -> bool {
        matches!(*self.active.lock(), Some(Occupant::Run(_)))
    }

    /// Whether a run or a device operation holds the command stream
    pub fn is_busy(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Identifier of the active protocol, if any
    pub fn active_protocol(&self) -> Option<String> {
        match self.active.lock().as_ref() {
            Some(Occupant::Run(run)) => Some(run.protocol.clone()),
            _ => None,
        }
    }

    fn engine(&self) -> ProtocolEngine {
        ProtocolEngine::new(
            self.sink.clone(),
            self.tracker.clone(),
            self.bus.clone(),
            self.config.protocol.step_timeout(),
        )
    }

    /// Start a protocol in the background
    ///
    /// Rejected without sending anything when a run or device operation is
    /// active, or the protocol cannot be built. Must be called from within a
    /// tokio runtime.
    pub fn start(
        &self,
        protocol_id: &str,
        params: &ProtocolParams,
    ) -> Result<RunHandle, ProtocolError> {
        let mut slot = self.active.lock();
        if let Some(occupant) = slot.as_ref() {
            let active = occupant.name();
            tracing::warn!("Rejected {}: busy with {}", protocol_id, active);
            return Err(ProtocolError::AlreadyRunning { active });
        }
        let spec = build_protocol(protocol_id, params, &self.config)?;

        let run_id = RunId::new();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (finished_tx, finished_rx) = watch::channel(None);
        *slot = Some(Occupant::Run(ActiveRun {
            run_id,
            protocol: spec.id.clone(),
            cancel: cancel_tx,
            finished: finished_rx.clone(),
        }));
        drop(slot);

        // positions change under the run; manual moves re-read the tracker
        self.setpoints.lock().clear();

        let handle = RunHandle {
            run_id,
            protocol: spec.id.clone(),
            cycles: spec.cycles,
            started_at: Utc::now(),
            finished: finished_rx,
        };
        tracing::info!("{} started protocol {}", run_id, spec.id);
        publish(
            &self.bus,
            AppEvent::Protocol(ProtocolEvent::Started {
                run_id,
                protocol: spec.id.clone(),
                cycles: spec.cycles,
            }),
        );

        let engine = self.engine();
        let active = self.active.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let outcome = engine.run(run_id, &spec, cancel_rx).await;

            {
                let mut slot = active.lock();
                if matches!(slot.as_ref(), Some(Occupant::Run(run)) if run.run_id == run_id) {
                    *slot = None;
                }
            }
            finished_tx.send_replace(Some(outcome.clone()));
            publish(
                &bus,
                AppEvent::Protocol(ProtocolEvent::Completed {
                    run_id,
                    protocol: spec.id,
                    outcome,
                }),
            );
        });

        Ok(handle)
    }

    /// Cancel the active run and wait for it to stop
    ///
    /// Returns `None` when nothing was running.
    pub async fn stop(&self) -> Option<RunOutcome> {
        let finished = {
            let slot = self.active.lock();
            let Some(Occupant::Run(run)) = slot.as_ref() else {
                return None;
            };
            tracing::info!("Stopping {} ({})", run.run_id, run.protocol);
            run.cancel.send_replace(true);
            run.finished.clone()
        };
        Some(wait_outcome(finished).await)
    }

    /// Send stop to the device, then cancel any run
    ///
    /// The stop goes out even when nothing is running. A failed write is
    /// reported after the run has been cancelled.
    pub async fn emergency_stop(&self) -> kneespa_core::Result<Option<RunOutcome>> {
        tracing::warn!("Emergency stop");
        let sent = self.sink.send(&Command::Stop).await;
        let outcome = self.stop().await;
        sent?;
        Ok(outcome)
    }

    /// Feed one decoded device line into the session
    pub fn on_device_event(&self, event: DeviceEvent) {
        if event.is_handshake() {
            tracing::trace!("Handshake {}", event);
        }
        self.tracker.apply(&event);
        publish(&self.bus, AppEvent::Device(event));
    }

    /// Record that the link is gone
    ///
    /// Wakes the active run, which then faults. Reported on the bus once per
    /// call; the transport only reports a loss once.
    pub fn on_connection_lost(&self, reason: &str) {
        tracing::error!("Connection to {} lost: {}", self.sink.name(), reason);
        self.tracker.mark_connection_lost();
        publish(
            &self.bus,
            AppEvent::Connection(ConnectionEvent::Disconnected {
                port: self.sink.name().to_string(),
                reason: DisconnectReason::ConnectionLost(reason.to_string()),
            }),
        );
        publish(
            &self.bus,
            AppEvent::Error(ErrorEvent::fatal(
                "CONNECTION_LOST",
                format!("{}: {}", self.sink.name(), reason),
            )),
        );
    }

    /// Drain a transport's event channel in order
    ///
    /// The task ends when the transport closes the channel.
    pub fn spawn_dispatch(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransportEvent::Device(event) => session.on_device_event(event),
                    TransportEvent::ConnectionLost { reason } => {
                        session.on_connection_lost(&reason)
                    }
                }
            }
            tracing::debug!("Event channel from {} closed", session.sink.name());
        })
    }

    /// Load calibration and zero marks, as the rig expects after power-up
    ///
    /// Holds the command stream until the last acknowledgement, so a run
    /// cannot start in between.
    pub async fn initialize_device(&self) -> kneespa_core::Result<()> {
        let _guard = self.claim("initialization")?;
        let steps = initialization_steps(&self.config)?;
        self.engine().execute(&steps).await?;
        tracing::info!("Device initialized");
        Ok(())
    }

    /// Re-home one drive and wait for the device to confirm
    ///
    /// The axial drive homes on the controller and has its load cell
    /// calibration reloaded; the other drives are moved back to rest.
    pub async fn reset_actuator(&self, actuator: Actuator) -> kneespa_core::Result<()> {
        let _guard = self.claim("actuator reset")?;
        let steps = actuator_reset_steps(actuator, &self.config)?;
        self.engine().execute(&steps).await?;
        self.setpoints.lock().remove(&actuator);
        tracing::info!("Actuator {} reset", actuator);
        Ok(())
    }

    /// Stop any run and release the link
    pub async fn disconnect(&self) {
        if let Some(outcome) = self.stop().await {
            tracing::info!("Run ended before disconnect: {}", outcome);
        }
        self.sink.disconnect().await;
        publish(
            &self.bus,
            AppEvent::Connection(ConnectionEvent::Disconnected {
                port: self.sink.name().to_string(),
                reason: DisconnectReason::UserRequested,
            }),
        );
    }

    /// Nudge an actuator by one jog step
    ///
    /// Returns the new setpoint, or `None` for actuators that only take
    /// relative jogs.
    pub async fn jog(
        &self,
        actuator: Actuator,
        direction: Direction,
        speed: SpeedClass,
    ) -> kneespa_core::Result<Option<f64>> {
        let _guard = self.claim("manual command")?;
        let cal = self.calibration(actuator)?;

        if cal.move_style == MoveStyle::Jog {
            self.sink
                .send(&Command::jog(actuator, direction, speed))
                .await?;
            self.setpoints.lock().remove(&actuator);
            return Ok(None);
        }

        let step = match speed {
            SpeedClass::Slow => cal.jog_step_slow,
            SpeedClass::Fast => cal.jog_step_fast,
        };
        let target = cal.check(self.current_value(cal) + step * direction.factor())?;
        self.sink
            .send(&Command::move_to(cal, target, speed)?)
            .await?;
        self.setpoints.lock().insert(actuator, target);
        Ok(Some(target))
    }

    /// Move an actuator to a physical value
    ///
    /// Returns the value actually commanded after rounding.
    pub async fn move_to(&self, actuator: Actuator, value: f64) -> kneespa_core::Result<f64> {
        let _guard = self.claim("manual command")?;
        let cal = self.calibration(actuator)?;
        let target = cal.check(value)?;
        tracing::debug!("Moving {} ({}) to {}", actuator, actuator.description(), target);
        self.sink
            .send(&Command::move_to(cal, target, SpeedClass::Slow)?)
            .await?;
        self.setpoints.lock().insert(actuator, target);
        Ok(target)
    }

    /// Ask for a pressure reading; it arrives as a pressure report
    pub async fn measure_pressure(&self) -> kneespa_core::Result<()> {
        let _guard = self.claim("manual command")?;
        self.sink.send(&Command::MeasurePressure).await?;
        Ok(())
    }

    /// Ask for a status report
    pub async fn query_status(&self) -> kneespa_core::Result<()> {
        let _guard = self.claim("manual command")?;
        self.sink.send(&Command::QueryStatus).await?;
        Ok(())
    }

    /// Last reported positions in physical units
    pub fn snapshot_physical(&self) -> PhysicalSnapshot {
        let snapshot = self.tracker.snapshot();
        let values = self
            .config
            .actuators
            .iter()
            .filter_map(|cal| {
                snapshot
                    .position(cal.actuator)
                    .map(|raw| (cal.actuator, from_device_code(cal, raw)))
            })
            .collect();
        PhysicalSnapshot {
            values,
            pressure: snapshot.pressure,
        }
    }

    /// Take the slot for a device operation
    fn claim(&self, what: &'static str) -> Result<OperationGuard, ProtocolError> {
        let mut slot = self.active.lock();
        if let Some(occupant) = slot.as_ref() {
            return Err(ProtocolError::AlreadyRunning {
                active: occupant.name(),
            });
        }
        *slot = Some(Occupant::Operation(what));
        Ok(OperationGuard {
            slot: self.active.clone(),
        })
    }

    fn calibration(&self, actuator: Actuator) -> Result<&ActuatorCalibration, ProtocolError> {
        self.config
            .calibration(actuator)
            .ok_or_else(|| ProtocolError::InvalidParams {
                param: actuator.to_string(),
                reason: format!("actuator {} is not configured", actuator),
            })
    }

    /// Setpoint, else last reported position, else rest
    fn current_value(&self, cal: &ActuatorCalibration) -> f64 {
        if let Some(value) = self.setpoints.lock().get(&cal.actuator) {
            return *value;
        }
        self.tracker
            .snapshot()
            .position(cal.actuator)
            .map(|raw| from_device_code(cal, raw))
            .unwrap_or(cal.rest)
    }
}

fn publish(bus: &EventBus, event: AppEvent) {
    if let Err(e) = bus.publish(event) {
        tracing::trace!("Event not delivered: {}", e);
    }
}
