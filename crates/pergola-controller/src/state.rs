//! Operating mode state machine for the pergola controller.
//!
//! [`ModeStateMachine`] owns the single [`ControllerState`] aggregate and is
//! the only thing that mutates it. Every input (a client command, a sensor
//! tick, a tracking tick) returns a [`Transition`] describing what the caller
//! has to do next: send an actuator command, tell the board about a mode
//! change, publish a snapshot. The machine itself performs no I/O.
//!
//! # States
//!
//! The state is the product of the operating [`Mode`] and the night-mode
//! override. Night mode engages when ambient light drops below the threshold
//! and flattens the panels regardless of mode:
//!
//! - entering night mode remembers the mode, and the manual angles if the
//!   mode was `Manual`
//! - leaving it restores the manual angles, or resumes tracking, unless the
//!   mode has since been switched to `Off`

use chrono::{DateTime, Utc};
use pergola_hardware::{LdrReadings, RuntimeMode, ServoPositions};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Rejection;
use crate::geometry::actuator_positions;
use crate::sun::SunPosition;
use crate::tracking::{self, Angles, TrackingSource};

// ============================================================================
// Mode
// ============================================================================

/// Operating mode selected by clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Follow the sun (default).
    #[default]
    Auto,
    /// Hold client-set angles.
    Manual,
    /// Hold the panels flat.
    Off,
}

impl Mode {
    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Off => "off",
        }
    }

    /// Parses a string into a `Mode`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            "off" => Some(Self::Off),
            _ => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid mode '{s}': expected one of 'auto', 'manual', 'off'"
            ))
        })
    }
}

impl Serialize for Mode {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl From<Mode> for RuntimeMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Auto => Self::Auto,
            Mode::Manual => Self::Manual,
            Mode::Off => Self::Off,
        }
    }
}

// ============================================================================
// Controller State
// ============================================================================

/// What was in effect when night mode engaged.
///
/// Exists only while night mode is active, so it can only be read between
/// entry and exit, and is consumed by the exit.
#[derive(Debug, Clone, Copy, PartialEq)]
struct NightSnapshot {
    previous_mode: Mode,
    previous_angles: Option<Angles>,
}

/// The controller's canonical state.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    mode: Mode,
    night: Option<NightSnapshot>,
    angles: Angles,
    servo_positions: ServoPositions,
    ldr_readings: LdrReadings,
    light_lux: u32,
    tracking_mode: TrackingSource,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            mode: Mode::Auto,
            night: None,
            angles: Angles::ZERO,
            servo_positions: ServoPositions::FLAT,
            ldr_readings: LdrReadings::default(),
            light_lux: 0,
            tracking_mode: TrackingSource::default(),
        }
    }
}

impl ControllerState {
    /// Current operating mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns `true` while the night-mode override is engaged.
    #[must_use]
    pub const fn night_mode_active(&self) -> bool {
        self.night.is_some()
    }

    /// Angles held internally, including while they are hidden.
    #[must_use]
    pub const fn angles(&self) -> Angles {
        self.angles
    }

    /// Angles as reported to clients: zero whenever the panels are held flat.
    #[must_use]
    pub const fn displayed_angles(&self) -> Angles {
        if matches!(self.mode, Mode::Off) || self.night.is_some() {
            Angles::ZERO
        } else {
            self.angles
        }
    }

    /// Last commanded or reported actuator positions.
    #[must_use]
    pub const fn servo_positions(&self) -> ServoPositions {
        self.servo_positions
    }

    /// Last quadrant readings.
    #[must_use]
    pub const fn ldr_readings(&self) -> LdrReadings {
        self.ldr_readings
    }

    /// Ambient light derived from the last readings.
    #[must_use]
    pub const fn light_lux(&self) -> u32 {
        self.light_lux
    }

    /// The estimate last used by tracking.
    #[must_use]
    pub const fn tracking_mode(&self) -> TrackingSource {
        self.tracking_mode
    }

    /// Snapshot of the externally visible state, stamped now.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot_at(Utc::now())
    }

    /// Snapshot of the externally visible state with an explicit timestamp.
    #[must_use]
    pub fn snapshot_at(&self, timestamp: DateTime<Utc>) -> StateSnapshot {
        let displayed = self.displayed_angles();
        StateSnapshot {
            status: SessionStatus::Connected,
            mode: self.mode,
            data: SnapshotData {
                horizontal_angle: displayed.horizontal,
                vertical_angle: displayed.vertical,
                light_sensor_reading: self.light_lux,
                servo_positions: self.servo_positions,
                ldr_readings: self.ldr_readings,
                tracking_mode: self.tracking_mode,
            },
            night_mode: NightModeStatus {
                active: self.night_mode_active(),
            },
            timestamp,
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// The `status` field of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// The controller is up and the session is live.
    Connected,
}

/// Externally visible state, as sent to sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Always `connected`.
    pub status: SessionStatus,
    /// Operating mode.
    pub mode: Mode,
    /// Angles and sensor data.
    pub data: SnapshotData,
    /// Night-mode override.
    pub night_mode: NightModeStatus,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// Angles and sensor data carried by a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    /// Displayed horizontal tilt.
    pub horizontal_angle: f64,
    /// Displayed vertical tilt.
    pub vertical_angle: f64,
    /// Ambient light in lux.
    pub light_sensor_reading: u32,
    /// Actuator positions (front, right, back, left).
    pub servo_positions: ServoPositions,
    /// Raw quadrant readings (front, right, back, left).
    pub ldr_readings: LdrReadings,
    /// Estimate last used by tracking.
    pub tracking_mode: TrackingSource,
}

/// Night-mode section of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightModeStatus {
    /// Whether the override is engaged.
    pub active: bool,
}

// ============================================================================
// Transitions
// ============================================================================

/// Side effects requested by a state change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    /// Actuator command to send, if any.
    pub actuators: Option<ServoPositions>,
    /// New mode to report to the board, if the mode changed.
    pub runtime_mode: Option<Mode>,
    /// Whether clients should be sent a snapshot right away.
    pub publish: bool,
}

impl Transition {
    /// A transition with no side effects.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing needs to happen.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.actuators.is_none() && self.runtime_mode.is_none() && !self.publish
    }

    /// Combines two transitions; the later actuator command wins.
    #[must_use]
    pub fn then(self, later: Self) -> Self {
        Self {
            actuators: later.actuators.or(self.actuators),
            runtime_mode: later.runtime_mode.or(self.runtime_mode),
            publish: self.publish || later.publish,
        }
    }
}

// ============================================================================
// Mode State Machine
// ============================================================================

/// Sole writer of the [`ControllerState`].
#[derive(Debug, Clone)]
pub struct ModeStateMachine {
    state: ControllerState,
    night_threshold_lux: u32,
}

impl ModeStateMachine {
    /// Creates a machine in `(Auto, day)` with the given night threshold.
    #[must_use]
    pub fn new(night_threshold_lux: u32) -> Self {
        Self {
            state: ControllerState::default(),
            night_threshold_lux,
        }
    }

    /// Read access to the current state.
    #[must_use]
    pub const fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Switches the operating mode.
    ///
    /// Switching to the current mode does nothing. `Off` flattens the panels
    /// immediately, even in night mode; `Auto` and `Manual` only move the
    /// panels outside night mode.
    pub fn set_mode(&mut self, mode: Mode, sun: Option<SunPosition>) -> Transition {
        if mode == self.state.mode {
            return Transition::none();
        }

        info!(from = %self.state.mode, to = %mode, "Mode changed");
        self.state.mode = mode;

        let changed = Transition {
            runtime_mode: Some(mode),
            publish: true,
            ..Transition::none()
        };

        let moved = match mode {
            Mode::Auto if !self.state.night_mode_active() => self.track(sun),
            Mode::Manual if !self.state.night_mode_active() => self.hold_angles(),
            Mode::Off => self.flatten(),
            Mode::Auto | Mode::Manual => Transition::none(),
        };

        changed.then(moved)
    }

    /// Sets the manual angles, clamped to the tilt range.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] unless the mode is `Manual` and night mode is
    /// off. A rejected command leaves the state untouched.
    pub fn set_angles(&mut self, horizontal: f64, vertical: f64) -> Result<Transition, Rejection> {
        if self.state.mode != Mode::Manual {
            return Err(Rejection::NotInManualMode {
                mode: self.state.mode,
            });
        }
        if self.state.night_mode_active() {
            return Err(Rejection::NightModeActive);
        }

        self.state.angles = Angles::new(horizontal, vertical);
        debug!(angles = ?self.state.angles, "Manual angles set");

        Ok(Transition {
            publish: true,
            ..self.hold_angles()
        })
    }

    /// Absorbs new quadrant readings.
    ///
    /// Updates the light level, enters or leaves night mode when it crosses
    /// the threshold (below it to enter, at or above it to leave), then runs
    /// the per-tick tracking step.
    pub fn sensor_tick(&mut self, readings: LdrReadings, sun: Option<SunPosition>) -> Transition {
        self.state.ldr_readings = readings;
        self.state.light_lux = readings.lux();

        let dark = self.state.light_lux < self.night_threshold_lux;
        let night = match (dark, self.state.night_mode_active()) {
            (true, false) => self.enter_night(),
            (false, true) => self.exit_night(),
            _ => Transition::none(),
        };

        night.then(self.tracking_tick(sun))
    }

    /// Recomputes the tracking target if the mode is `Auto` outside night mode.
    ///
    /// Called once per sensor tick. Leaving `Auto` therefore stops tracking
    /// at the next tick without any task to cancel.
    pub fn tracking_tick(&mut self, sun: Option<SunPosition>) -> Transition {
        if self.state.mode == Mode::Auto && !self.state.night_mode_active() {
            self.track(sun)
        } else {
            Transition::none()
        }
    }

    /// Records actuator positions reported by the board.
    pub fn servo_feedback(&mut self, positions: ServoPositions) {
        self.state.servo_positions = positions;
    }

    fn enter_night(&mut self) -> Transition {
        info!(lux = self.state.light_lux, mode = %self.state.mode, "Night mode activated");

        self.state.night = Some(NightSnapshot {
            previous_mode: self.state.mode,
            previous_angles: (self.state.mode == Mode::Manual).then_some(self.state.angles),
        });

        Transition {
            publish: true,
            ..self.flatten()
        }
    }

    fn exit_night(&mut self) -> Transition {
        info!(lux = self.state.light_lux, mode = %self.state.mode, "Night mode deactivated");

        let snapshot = self.state.night.take();
        let exited = Transition {
            publish: true,
            ..Transition::none()
        };

        if self.state.mode == Mode::Off {
            return exited;
        }

        if let Some(NightSnapshot {
            previous_mode: Mode::Manual,
            previous_angles: Some(angles),
        }) = snapshot
        {
            self.state.angles = angles;
        }

        // Auto resumes through the tracking step of the same tick
        if self.state.mode == Mode::Manual {
            exited.then(self.hold_angles())
        } else {
            exited
        }
    }

    fn track(&mut self, sun: Option<SunPosition>) -> Transition {
        let decision = tracking::select(&self.state.ldr_readings, sun);
        debug!(
            source = %decision.source,
            horizontal = decision.angles.horizontal,
            vertical = decision.angles.vertical,
            "Tracking target"
        );

        self.state.angles = decision.angles;
        self.state.tracking_mode = decision.source;
        self.hold_angles()
    }

    fn hold_angles(&mut self) -> Transition {
        self.command(actuator_positions(self.state.angles))
    }

    fn flatten(&mut self) -> Transition {
        self.state.angles = Angles::ZERO;
        self.command(ServoPositions::FLAT)
    }

    fn command(&mut self, positions: ServoPositions) -> Transition {
        self.state.servo_positions = positions;
        Transition {
            actuators: Some(positions),
            ..Transition::none()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
