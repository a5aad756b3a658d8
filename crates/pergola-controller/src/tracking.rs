//! Target tilt computation.
//!
//! Two estimates are available each tick. The light-sensor estimate steers
//! toward the brighter side of the four quadrant sensors. The astronomical
//! estimate maps the computed sun position onto the tilt range. When both
//! are present and agree on both axes to within [`LDR_PREFERENCE_THRESHOLD`]
//! degrees, the local sensor estimate wins; otherwise the astronomical one
//! does.

use pergola_hardware::LdrReadings;
use serde::{Deserialize, Serialize};

use crate::sun::SunPosition;

/// Largest tilt magnitude on either axis, in degrees.
pub const MAX_TILT: f64 = 40.0;

/// Full-scale raw reading of a quadrant sensor.
pub const LDR_FULL_SCALE: f64 = 1024.0;

/// Per-axis disagreement below which the sensor estimate is preferred.
pub const LDR_PREFERENCE_THRESHOLD: f64 = 10.0;

/// Degrees of azimuth per degree of horizontal tilt.
const AZIMUTH_PER_TILT: f64 = 4.5;

/// Sun elevation at which the vertical tilt is zero.
const NEUTRAL_ELEVATION: f64 = 45.0;

/// Panel tilt in degrees on both axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Angles {
    /// Tilt about the vertical axis; positive raises the right edge.
    pub horizontal: f64,
    /// Tilt about the horizontal axis; positive lowers the front edge.
    pub vertical: f64,
}

impl Angles {
    /// No tilt.
    pub const ZERO: Self = Self {
        horizontal: 0.0,
        vertical: 0.0,
    };

    /// Creates angles clamped to the tilt range.
    #[must_use]
    pub fn new(horizontal: f64, vertical: f64) -> Self {
        Self {
            horizontal,
            vertical,
        }
        .clamped()
    }

    /// Returns these angles with both axes clamped to `[-40, 40]`.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            horizontal: self.horizontal.clamp(-MAX_TILT, MAX_TILT),
            vertical: self.vertical.clamp(-MAX_TILT, MAX_TILT),
        }
    }
}

/// Which estimate produced the current target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingSource {
    /// Quadrant light sensors.
    Ldr,
    /// Computed sun position.
    #[default]
    Astronomical,
}

impl std::fmt::Display for TrackingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ldr => write!(f, "ldr"),
            Self::Astronomical => write!(f, "astronomical"),
        }
    }
}

/// The outcome of one tracking computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingDecision {
    /// Target tilt, within the tilt range.
    pub angles: Angles,
    /// The estimate that was selected.
    pub source: TrackingSource,
}

/// Tilt suggested by the quadrant sensors.
///
/// The result is not clamped: a strong imbalance can exceed
/// the tilt range, and the selection step compares the raw values.
#[must_use]
pub fn ldr_estimate(readings: &LdrReadings) -> Angles {
    let h_bias = (f64::from(readings.right()) - f64::from(readings.left())) / LDR_FULL_SCALE;
    let v_bias = (f64::from(readings.front()) - f64::from(readings.back())) / LDR_FULL_SCALE;

    Angles {
        horizontal: h_bias * MAX_TILT,
        vertical: v_bias * MAX_TILT,
    }
}

/// Tilt suggested by the sun position, within the tilt range.
///
/// Azimuth is measured from due south and wrapped into `(-180, 180]`.
#[must_use]
pub fn astronomical_estimate(sun: SunPosition) -> Angles {
    let mut from_south = (sun.azimuth - 180.0).rem_euclid(360.0);
    if from_south > 180.0 {
        from_south -= 360.0;
    }

    Angles::new(
        from_south / AZIMUTH_PER_TILT,
        sun.elevation - NEUTRAL_ELEVATION,
    )
}

/// Picks between the sensor and astronomical estimates.
#[must_use]
pub fn choose(ldr: Angles, astronomical: Option<Angles>) -> TrackingDecision {
    let Some(astro) = astronomical else {
        return TrackingDecision {
            angles: ldr.clamped(),
            source: TrackingSource::Ldr,
        };
    };

    let h_diff = (ldr.horizontal - astro.horizontal).abs();
    let v_diff = (ldr.vertical - astro.vertical).abs();

    if h_diff < LDR_PREFERENCE_THRESHOLD && v_diff < LDR_PREFERENCE_THRESHOLD {
        TrackingDecision {
            angles: ldr.clamped(),
            source: TrackingSource::Ldr,
        }
    } else {
        TrackingDecision {
            angles: astro.clamped(),
            source: TrackingSource::Astronomical,
        }
    }
}

/// Computes the target tilt from the latest readings and, if available, the
/// current sun position.
#[must_use]
pub fn select(readings: &LdrReadings, sun: Option<SunPosition>) -> TrackingDecision {
    choose(ldr_estimate(readings), sun.map(astronomical_estimate))
}
