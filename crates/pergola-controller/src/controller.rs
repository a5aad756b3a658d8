//! The controller task.
//!
//! A single task owns the [`ModeStateMachine`], so every mutation of the
//! controller state is serialized without locks. Three inputs feed it:
//! commands from sessions (each with a reply channel), sensor frames from the
//! bridge runner, and the periodic broadcast ticker.
//!
//! Nothing in the loop waits on I/O. Board commands are queued with
//! `try_send`, and snapshots go out through the [`BroadcastHub`], whose
//! sinks never block.

use std::time::Duration;

use chrono::Utc;
use pergola_hardware::{HardwareCommand, SensorFrame};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastHub;
use crate::command::Command;
use crate::config::Config;
use crate::error::{PergolaError, Rejection, Result};
use crate::state::{ModeStateMachine, StateSnapshot, Transition};
use crate::sun::{SolarCalculator, SunPosition, SunPositionSource};

/// Pending commands from sessions before senders wait.
const EVENT_BUFFER: usize = 64;

/// What became of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The state changed (or already matched); the broadcast carries the result.
    Applied,
    /// The command is not allowed in the current state.
    Rejected(Rejection),
    /// Answer to a query.
    Snapshot(StateSnapshot),
}

/// A request to the controller task.
#[derive(Debug)]
enum ControlEvent {
    Command {
        command: Command,
        reply: oneshot::Sender<CommandOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<StateSnapshot>,
    },
}

/// Cheap, cloneable handle for talking to the controller task.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    events: mpsc::Sender<ControlEvent>,
}

impl ControllerHandle {
    /// Runs a command and waits for its outcome.
    ///
    /// # Errors
    ///
    /// Returns `PergolaError::ControllerUnavailable` if the task has stopped.
    pub async fn execute(&self, command: Command) -> Result<CommandOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.events
            .send(ControlEvent::Command { command, reply })
            .await
            .map_err(|_| PergolaError::ControllerUnavailable)?;
        outcome.await.map_err(|_| PergolaError::ControllerUnavailable)
    }

    /// Fetches the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns `PergolaError::ControllerUnavailable` if the task has stopped.
    pub async fn snapshot(&self) -> Result<StateSnapshot> {
        let (reply, snapshot) = oneshot::channel();
        self.events
            .send(ControlEvent::Snapshot { reply })
            .await
            .map_err(|_| PergolaError::ControllerUnavailable)?;
        snapshot.await.map_err(|_| PergolaError::ControllerUnavailable)
    }
}

/// The controller task's state.
pub struct Controller {
    machine: ModeStateMachine,
    hub: BroadcastHub,
    hardware: mpsc::Sender<HardwareCommand>,
    sun: Option<Box<dyn SunPositionSource>>,
    events: mpsc::Receiver<ControlEvent>,
    broadcast_interval: Duration,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("state", self.machine.state())
            .field("astronomical", &self.sun.is_some())
            .field("broadcast_interval", &self.broadcast_interval)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a controller and its handle.
    ///
    /// Actuator and mode commands are queued on `hardware`. Without a sun
    /// source, tracking relies on the light sensors alone.
    #[must_use]
    pub fn new(
        night_threshold_lux: u32,
        broadcast_interval: Duration,
        hub: BroadcastHub,
        hardware: mpsc::Sender<HardwareCommand>,
    ) -> (Self, ControllerHandle) {
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let controller = Self {
            machine: ModeStateMachine::new(night_threshold_lux),
            hub,
            hardware,
            sun: None,
            events,
            broadcast_interval,
        };
        (controller, ControllerHandle { events: events_tx })
    }

    /// Creates a controller from configuration, with a solar calculator if a
    /// location is configured.
    #[must_use]
    pub fn from_config(
        config: &Config,
        hub: BroadcastHub,
        hardware: mpsc::Sender<HardwareCommand>,
    ) -> (Self, ControllerHandle) {
        let (controller, handle) = Self::new(
            config.night_threshold_lux,
            config.broadcast_interval(),
            hub,
            hardware,
        );
        let controller = match config.location {
            Some(location) => controller.with_sun_source(SolarCalculator::from(location)),
            None => controller,
        };
        (controller, handle)
    }

    /// Enables astronomical tracking with the given source.
    #[must_use]
    pub fn with_sun_source(mut self, source: impl SunPositionSource + 'static) -> Self {
        self.sun = Some(Box::new(source));
        self
    }

    /// Runs until every [`ControllerHandle`] has been dropped.
    ///
    /// `frames` delivers one [`SensorFrame`] per sensor poll. If the feed
    /// closes, the controller keeps serving sessions with the last known
    /// state.
    pub async fn run(mut self, mut frames: mpsc::Receiver<SensorFrame>) {
        let mut ticker = interval(self.broadcast_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frames_open = true;

        info!(
            astronomical = self.sun.is_some(),
            "Controller started in {} mode",
            self.machine.state().mode()
        );

        loop {
            tokio::select! {
                // Frames first, so a command sent after a frame sees its effect
                biased;

                frame = frames.recv(), if frames_open => {
                    if let Some(frame) = frame {
                        self.handle_frame(frame).await;
                    } else {
                        warn!("Sensor feed closed, continuing with last known state");
                        frames_open = false;
                    }
                }

                event = self.events.recv() => {
                    let Some(event) = event else {
                        info!("All controller handles dropped, stopping");
                        break;
                    };
                    self.handle_event(event).await;
                }

                _ = ticker.tick() => {
                    self.publish().await;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Command { command, reply } => {
                let outcome = self.handle_command(command).await;
                if reply.send(outcome).is_err() {
                    debug!("Requester went away before the outcome was ready");
                }
            }
            ControlEvent::Snapshot { reply } => {
                if reply.send(self.machine.state().snapshot()).is_err() {
                    debug!("Requester went away before the snapshot was ready");
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> CommandOutcome {
        match command {
            Command::SetMode(mode) => {
                let transition = self.machine.set_mode(mode, self.sun_now());
                self.apply(transition).await;
                CommandOutcome::Applied
            }
            Command::SetAngles {
                horizontal,
                vertical,
            } => match self.machine.set_angles(horizontal, vertical) {
                Ok(transition) => {
                    self.apply(transition).await;
                    CommandOutcome::Applied
                }
                Err(rejection) => CommandOutcome::Rejected(rejection),
            },
            Command::Query(_) => CommandOutcome::Snapshot(self.machine.state().snapshot()),
        }
    }

    async fn handle_frame(&mut self, frame: SensorFrame) {
        if let Some(positions) = frame.servo_feedback {
            self.machine.servo_feedback(positions);
        }

        let sun = self.sun_now();
        let transition = match frame.ldr {
            Some(readings) => self.machine.sensor_tick(readings, sun),
            None => self.machine.tracking_tick(sun),
        };
        self.apply(transition).await;
    }

    async fn apply(&mut self, transition: Transition) {
        if let Some(mode) = transition.runtime_mode {
            self.send_to_board(HardwareCommand::SetRuntimeMode(mode.into()));
        }
        if let Some(positions) = transition.actuators {
            self.send_to_board(HardwareCommand::SetActuators(positions));
        }
        if transition.publish {
            self.publish().await;
        }
    }

    fn send_to_board(&self, command: HardwareCommand) {
        match self.hardware.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                warn!(?command, "Board command queue full, dropping command");
            }
            Err(TrySendError::Closed(command)) => {
                debug!(?command, "Bridge runner stopped, dropping command");
            }
        }
    }

    async fn publish(&self) {
        let snapshot = self.machine.state().snapshot();
        let delivered = self.hub.publish_snapshot(&snapshot).await;
        debug!(sessions = delivered, "Published snapshot");
    }

    fn sun_now(&self) -> Option<SunPosition> {
        self.sun.as_ref().map(|source| source.sun_position(Utc::now()))
    }
}
