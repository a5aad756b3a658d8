//! Simulated board for running without hardware.

use tracing::debug;

use crate::{HardwareBridge, HardwareError, LdrReadings, RuntimeMode, SensorFrame, ServoPositions};

/// A board that always reports the same quadrant readings and echoes the
/// last actuator command back as feedback.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBridge {
    readings: LdrReadings,
    last_command: Option<ServoPositions>,
    mode: Option<RuntimeMode>,
}

impl SimulatedBridge {
    /// Creates a simulated board reporting `readings` on every poll.
    #[must_use]
    pub const fn new(readings: LdrReadings) -> Self {
        Self {
            readings,
            last_command: None,
            mode: None,
        }
    }

    /// Changes the readings reported from the next poll on.
    pub fn set_readings(&mut self, readings: LdrReadings) {
        self.readings = readings;
    }

    /// The last actuator command received.
    #[must_use]
    pub const fn last_command(&self) -> Option<ServoPositions> {
        self.last_command
    }

    /// The last mode reported by the controller.
    #[must_use]
    pub const fn mode(&self) -> Option<RuntimeMode> {
        self.mode
    }
}

impl HardwareBridge for SimulatedBridge {
    async fn read_sensors(&mut self) -> Result<SensorFrame, HardwareError> {
        Ok(SensorFrame {
            ldr: Some(self.readings),
            servo_feedback: self.last_command,
        })
    }

    async fn write_actuators(&mut self, positions: ServoPositions) -> Result<(), HardwareError> {
        debug!(%positions, "Simulated actuators moved");
        self.last_command = Some(positions);
        Ok(())
    }

    async fn set_runtime_mode(&mut self, mode: RuntimeMode) -> Result<(), HardwareError> {
        debug!(%mode, "Simulated board mode set");
        self.mode = Some(mode);
        Ok(())
    }
}
