//! Pergola Hardware Bridge
//!
//! Sensor and actuator plumbing between the controller and the shade's
//! microcontroller board.
//!
//! This crate defines the narrow [`HardwareBridge`] interface the controller
//! talks to, the value types that cross it, and the transports behind it:
//! the Arduino text-line protocol over a serial port, Modbus-RTU holding
//! registers, and a simulated board for running without hardware.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod line;
pub mod modbus;
pub mod protocol;
pub mod runner;
pub mod serial;
pub mod simulated;

pub use line::LineBridge;
pub use modbus::{ModbusBridge, RegisterBridge, RegisterBus};
pub use runner::BridgeRunner;
pub use serial::{SerialBridge, SerialSettings};
pub use simulated::SimulatedBridge;

/// Neutral actuator position: the panel lies flat.
pub const FLAT_POSITION: u8 = 90;

/// Upper bound of the actuator range in degrees.
pub const MAX_POSITION: u8 = 180;

/// Errors that can occur while talking to the board.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// No link to the board is currently open.
    #[error("board not connected")]
    NotConnected,

    /// None of the candidate ports could be opened.
    #[error("failed to connect to board on any of: {ports}")]
    ConnectFailed {
        /// Comma-separated list of the ports that were tried.
        ports: String,
    },

    /// The board closed the link.
    #[error("board disconnected")]
    Disconnected,

    /// The board rejected or garbled a register request.
    #[error("modbus error: {0}")]
    Modbus(String),

    /// I/O failure on an open link.
    #[error("board I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    /// Returns `true` if the link is unusable and must be reopened.
    #[must_use]
    pub const fn is_link_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Io(_))
    }
}

/// Raw readings of the four quadrant light sensors.
///
/// Ordered (front, right, back, left); serialized as a four-element array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LdrReadings([u16; 4]);

impl LdrReadings {
    /// Creates readings from the four quadrant values.
    #[must_use]
    pub const fn new(front: u16, right: u16, back: u16, left: u16) -> Self {
        Self([front, right, back, left])
    }

    /// Front sensor.
    #[must_use]
    pub const fn front(&self) -> u16 {
        self.0[0]
    }

    /// Right sensor.
    #[must_use]
    pub const fn right(&self) -> u16 {
        self.0[1]
    }

    /// Back sensor.
    #[must_use]
    pub const fn back(&self) -> u16 {
        self.0[2]
    }

    /// Left sensor.
    #[must_use]
    pub const fn left(&self) -> u16 {
        self.0[3]
    }

    /// All four readings in (front, right, back, left) order.
    #[must_use]
    pub const fn as_array(&self) -> [u16; 4] {
        self.0
    }

    /// Ambient light estimate: ten times the mean raw reading, truncated.
    #[must_use]
    pub fn lux(&self) -> u32 {
        let sum: u32 = self.0.iter().map(|&r| u32::from(r)).sum();
        sum * 10 / 4
    }
}

/// Positions of the four edge actuators in degrees, each within `[0, 180]`.
///
/// Ordered (front, right, back, left); serialized as a four-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServoPositions([u8; 4]);

impl Default for ServoPositions {
    fn default() -> Self {
        Self::FLAT
    }
}

impl ServoPositions {
    /// All four actuators at the neutral position.
    pub const FLAT: Self = Self([FLAT_POSITION; 4]);

    /// Creates positions, clamping each to the actuator range.
    #[must_use]
    pub fn new(front: u8, right: u8, back: u8, left: u8) -> Self {
        Self([front, right, back, left].map(|p| p.min(MAX_POSITION)))
    }

    /// Creates positions from signed degrees, clamping each to `[0, 180]`.
    #[must_use]
    pub fn clamped(degrees: [i32; 4]) -> Self {
        Self(degrees.map(|d| d.clamp(0, i32::from(MAX_POSITION)) as u8))
    }

    /// Front actuator.
    #[must_use]
    pub const fn front(&self) -> u8 {
        self.0[0]
    }

    /// Right actuator.
    #[must_use]
    pub const fn right(&self) -> u8 {
        self.0[1]
    }

    /// Back actuator.
    #[must_use]
    pub const fn back(&self) -> u8 {
        self.0[2]
    }

    /// Left actuator.
    #[must_use]
    pub const fn left(&self) -> u8 {
        self.0[3]
    }

    /// All four positions in (front, right, back, left) order.
    #[must_use]
    pub const fn as_array(&self) -> [u8; 4] {
        self.0
    }
}

impl std::fmt::Display for ServoPositions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [front, right, back, left] = self.0;
        write!(f, "{front},{right},{back},{left}")
    }
}

/// Operating mode as reported to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Automatic sun tracking.
    Auto,
    /// Angles set by a remote client.
    Manual,
    /// Panels held flat.
    Off,
}

impl RuntimeMode {
    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Off => "off",
        }
    }
}

impl std::fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the board reported during one poll.
///
/// Either part may be absent when the board sent nothing new.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorFrame {
    /// Latest quadrant readings, if any arrived.
    pub ldr: Option<LdrReadings>,
    /// Latest actuator feedback, if any arrived.
    pub servo_feedback: Option<ServoPositions>,
}

impl SensorFrame {
    /// Returns `true` if the poll produced no data.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ldr.is_none() && self.servo_feedback.is_none()
    }
}

/// A command queued for the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareCommand {
    /// Drive the four actuators to the given positions.
    SetActuators(ServoPositions),
    /// Tell the board which mode the controller is in.
    SetRuntimeMode(RuntimeMode),
}

/// The narrow interface between the controller and a board transport.
///
/// Implementations are owned by a single [`BridgeRunner`] task, so methods
/// take `&mut self` and need no internal locking.
pub trait HardwareBridge: Send {
    /// Collects whatever sensor data the board has reported since the last call.
    fn read_sensors(&mut self) -> impl Future<Output = Result<SensorFrame, HardwareError>> + Send;

    /// Sends an actuator command.
    fn write_actuators(
        &mut self,
        positions: ServoPositions,
    ) -> impl Future<Output = Result<(), HardwareError>> + Send;

    /// Reports the controller's operating mode to the board.
    fn set_runtime_mode(
        &mut self,
        mode: RuntimeMode,
    ) -> impl Future<Output = Result<(), HardwareError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lux_is_ten_times_mean_reading() {
        assert_eq!(LdrReadings::new(512, 487, 523, 498).lux(), 5050);
        assert_eq!(LdrReadings::new(10, 10, 10, 11).lux(), 102);
        assert_eq!(LdrReadings::default().lux(), 0);
    }

    #[test]
    fn test_readings_accessors_follow_quadrant_order() {
        let readings = LdrReadings::new(1, 2, 3, 4);
        assert_eq!(readings.front(), 1);
        assert_eq!(readings.right(), 2);
        assert_eq!(readings.back(), 3);
        assert_eq!(readings.left(), 4);
    }

    #[test]
    fn test_servo_positions_default_is_flat() {
        assert_eq!(ServoPositions::default(), ServoPositions::FLAT);
        assert_eq!(ServoPositions::FLAT.as_array(), [90, 90, 90, 90]);
    }

    #[test]
    fn test_servo_positions_clamp_to_range() {
        let positions = ServoPositions::clamped([-12, 45, 200, 180]);
        assert_eq!(positions.as_array(), [0, 45, 180, 180]);

        let positions = ServoPositions::new(255, 0, 181, 90);
        assert_eq!(positions.as_array(), [180, 0, 180, 90]);
    }

    #[test]
    fn test_servo_positions_display_as_csv() {
        assert_eq!(ServoPositions::new(72, 72, 107, 107).to_string(), "72,72,107,107");
    }

    #[test]
    fn test_readings_serialize_as_array() {
        let json = serde_json::to_string(&LdrReadings::new(600, 400, 400, 600)).unwrap_or_default();
        assert_eq!(json, "[600,400,400,600]");
    }

    #[test]
    fn test_runtime_mode_wire_names() {
        assert_eq!(RuntimeMode::Auto.to_string(), "auto");
        assert_eq!(RuntimeMode::Manual.to_string(), "manual");
        assert_eq!(RuntimeMode::Off.to_string(), "off");
    }

    #[test]
    fn test_link_lost_classification() {
        assert!(HardwareError::Disconnected.is_link_lost());
        assert!(HardwareError::Io(std::io::Error::other("boom")).is_link_lost());
        assert!(!HardwareError::NotConnected.is_link_lost());
        assert!(!HardwareError::Modbus("exception IllegalDataAddress".to_string()).is_link_lost());
    }

    #[test]
    fn test_empty_frame() {
        assert!(SensorFrame::default().is_empty());
        let frame = SensorFrame {
            ldr: Some(LdrReadings::default()),
            servo_feedback: None,
        };
        assert!(!frame.is_empty());
    }
}
