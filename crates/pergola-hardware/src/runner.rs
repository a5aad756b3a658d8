//! The task that owns a bridge.
//!
//! Sensor polling and command delivery share one bridge, so both run in a
//! single task: a poll tick reads the board and forwards the frame, and each
//! queued [`HardwareCommand`] is written as it arrives.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{HardwareBridge, HardwareCommand, HardwareError, SensorFrame};

/// Drives a [`HardwareBridge`] on the sensor cadence.
#[derive(Debug)]
pub struct BridgeRunner<B> {
    bridge: B,
    poll_interval: Duration,
}

impl<B: HardwareBridge> BridgeRunner<B> {
    /// Creates a runner polling `bridge` every `poll_interval`.
    pub const fn new(bridge: B, poll_interval: Duration) -> Self {
        Self {
            bridge,
            poll_interval,
        }
    }

    /// Runs until the controller goes away, then hands the bridge back.
    ///
    /// A failed read still forwards an empty frame so per-tick work on the
    /// controller side keeps its cadence while the board is unreachable.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<HardwareCommand>,
        frames: mpsc::Sender<SensorFrame>,
    ) -> B {
        let mut poll = interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    let frame = match self.bridge.read_sensors().await {
                        Ok(frame) => frame,
                        Err(HardwareError::NotConnected) => {
                            debug!("Board not connected, skipping sensor read");
                            SensorFrame::default()
                        }
                        Err(e) => {
                            warn!(error = %e, "Sensor read failed");
                            SensorFrame::default()
                        }
                    };

                    if frames.send(frame).await.is_err() {
                        info!("Controller stopped, bridge runner exiting");
                        break;
                    }
                }

                command = commands.recv() => {
                    let Some(command) = command else {
                        info!("Command queue closed, bridge runner exiting");
                        break;
                    };
                    self.apply(command).await;
                }
            }
        }

        self.bridge
    }

    async fn apply(&mut self, command: HardwareCommand) {
        let result = match command {
            HardwareCommand::SetActuators(positions) => {
                self.bridge.write_actuators(positions).await
            }
            HardwareCommand::SetRuntimeMode(mode) => self.bridge.set_runtime_mode(mode).await,
        };

        if let Err(e) = result {
            warn!(?command, error = %e, "Board command failed");
        }
    }
}
