//! Arduino text-line protocol.
//!
//! Each message is one newline-terminated ASCII line of the form
//! `PREFIX:a,b,c,d`.
//!
//! Board to host:
//! - `LDR:512,487,523,498` - raw quadrant readings (front, right, back, left)
//! - `SERVO_POS:90,45,135,90` - actuator feedback (front, right, back, left)
//!
//! Host to board:
//! - `SERVOS:72,72,107,107` - actuator command
//! - `MODE:auto` - operating mode

use thiserror::Error;

use crate::{LdrReadings, RuntimeMode, ServoPositions};

const LDR_PREFIX: &str = "LDR:";
const SERVO_POS_PREFIX: &str = "SERVO_POS:";

/// A decoded line sent by the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardLine {
    /// Quadrant light readings.
    Ldr(LdrReadings),
    /// Actuator feedback.
    ServoFeedback(ServoPositions),
    /// Anything else (boot banners, debug prints).
    Other,
}

/// Why a recognized line could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    /// The line did not carry exactly four values.
    #[error("{prefix} expects 4 values, got {count}")]
    WrongFieldCount {
        /// The line prefix.
        prefix: &'static str,
        /// Number of values found.
        count: usize,
    },

    /// A value was not an integer in range.
    #[error("{prefix} has invalid value '{value}'")]
    InvalidValue {
        /// The line prefix.
        prefix: &'static str,
        /// The offending text.
        value: String,
    },
}

/// Decodes one line received from the board.
///
/// Surrounding whitespace (including `\r\n`) is ignored.
pub fn parse_line(line: &str) -> Result<BoardLine, LineError> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(LDR_PREFIX) {
        let [front, right, back, left] = parse_values::<u16>(LDR_PREFIX, rest)?;
        return Ok(BoardLine::Ldr(LdrReadings::new(front, right, back, left)));
    }

    if let Some(rest) = line.strip_prefix(SERVO_POS_PREFIX) {
        let values = parse_values::<i32>(SERVO_POS_PREFIX, rest)?;
        return Ok(BoardLine::ServoFeedback(ServoPositions::clamped(values)));
    }

    Ok(BoardLine::Other)
}

fn parse_values<T: std::str::FromStr>(prefix: &'static str, rest: &str) -> Result<[T; 4], LineError> {
    let fields: Vec<&str> = rest.split(',').map(str::trim).collect();
    let count = fields.len();

    let values = fields
        .into_iter()
        .map(|field| {
            field.parse::<T>().map_err(|_| LineError::InvalidValue {
                prefix,
                value: field.to_string(),
            })
        })
        .collect::<Result<Vec<T>, LineError>>()?;

    values
        .try_into()
        .map_err(|_| LineError::WrongFieldCount { prefix, count })
}

/// Encodes an actuator command line.
#[must_use]
pub fn encode_actuators(positions: &ServoPositions) -> String {
    format!("SERVOS:{positions}\n")
}

/// Encodes a mode line.
#[must_use]
pub fn encode_mode(mode: RuntimeMode) -> String {
    format!("MODE:{mode}\n")
}
