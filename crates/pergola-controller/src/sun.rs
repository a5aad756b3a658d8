//! Solar position.
//!
//! [`SolarCalculator`] wraps the NOAA general solar position approximation
//! from `astronav`, which is good to about a degree. That is well within what
//! the tilt mapping can make use of.

use astronav::coords::noaa_sun::NOAASun;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Location;

/// Where the sun is in the sky, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunPosition {
    /// Angle above the horizon; negative below it.
    pub elevation: f64,
    /// Compass bearing, clockwise from north, in `[0, 360)`.
    pub azimuth: f64,
}

/// Anything that can say where the sun is at a given instant.
pub trait SunPositionSource: Send + Sync {
    /// The sun position at `at`.
    fn sun_position(&self, at: DateTime<Utc>) -> SunPosition;
}

/// A fixed position is a source that never moves.
impl SunPositionSource for SunPosition {
    fn sun_position(&self, _at: DateTime<Utc>) -> SunPosition {
        *self
    }
}

/// Computes the sun position for a fixed observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarCalculator {
    latitude: f64,
    longitude: f64,
}

impl SolarCalculator {
    /// Creates a calculator for an observer at the given latitude (degrees
    /// north) and longitude (degrees east).
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// The NOAA model for this observer at `at`, expressed in UTC.
    fn noaa(&self, at: DateTime<Utc>) -> NOAASun {
        NOAASun {
            year: at.year() as u16,
            doy: at.ordinal() as u16,
            long: self.longitude as f32,
            lat: self.latitude as f32,
            timezone: 0.0,
            hour: at.hour() as u8,
            min: at.minute() as u8,
            sec: at.second() as u8,
        }
    }
}

impl From<Location> for SolarCalculator {
    fn from(location: Location) -> Self {
        Self::new(location.latitude, location.longitude)
    }
}

impl SunPositionSource for SolarCalculator {
    fn sun_position(&self, at: DateTime<Utc>) -> SunPosition {
        let sun = self.noaa(at);

        SunPosition {
            elevation: 90.0 - sun.zenith_in_deg(),
            azimuth: sun.azimuth_in_deg().rem_euclid(360.0),
        }
    }
}
