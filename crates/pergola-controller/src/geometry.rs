//! Tilt-to-actuator geometry.
//!
//! The panel is held by four edge actuators. Tilting about the vertical axis
//! raises one side edge and lowers the other; tilting about the horizontal
//! axis does the same for the front and back edges. Zero tilt puts every
//! actuator at [`FLAT_POSITION`].

use pergola_hardware::{ServoPositions, FLAT_POSITION};

use crate::tracking::{Angles, MAX_TILT};

/// Actuator degrees per degree of tilt: the full tilt range spans half the
/// actuator range.
pub const SERVO_SCALE: f64 = 90.0 / MAX_TILT;

/// Maps tilt angles to the four actuator positions.
///
/// Each position is truncated toward zero and clamped to `[0, 180]`, so any
/// input, including one beyond the tilt range, yields a valid command.
#[must_use]
pub fn actuator_positions(angles: Angles) -> ServoPositions {
    let base = f64::from(FLAT_POSITION);
    let h = angles.horizontal * SERVO_SCALE;
    let v = angles.vertical * SERVO_SCALE;

    ServoPositions::clamped([
        (base - v) as i32,
        (base + h) as i32,
        (base + v) as i32,
        (base - h) as i32,
    ])
}
