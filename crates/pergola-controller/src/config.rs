//! Configuration types for the pergola controller.
//!
//! Configuration is read from a JSON file (`pergola.json` by default) with
//! camelCase keys. Every key is optional; missing keys take the defaults
//! below, and unknown keys are ignored.

use std::path::Path;
use std::time::Duration;

use pergola_hardware::modbus::DEFAULT_UNIT_ID;
use pergola_hardware::{LdrReadings, SerialSettings};
use serde::{Deserialize, Serialize};

use crate::error::{PergolaError, Result};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "pergola.json";

/// Default listen address.
fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Default listen port. The mobile client connects to `ws://<host>:8080`.
const fn default_port() -> u16 {
    8080
}

/// Default ambient light level below which night mode engages.
const fn default_night_threshold_lux() -> u32 {
    300
}

/// Default sensor polling cadence in milliseconds.
const fn default_sensor_poll_ms() -> u64 {
    1000
}

/// Default periodic broadcast cadence in milliseconds.
const fn default_broadcast_interval_ms() -> u64 {
    2000
}

/// Default observer location for the solar calculator.
#[allow(clippy::unnecessary_wraps)]
const fn default_location() -> Option<Location> {
    Some(Location::BEIRUT)
}

fn default_serial_ports() -> Vec<String> {
    SerialSettings::default().ports
}

const fn default_baud_rate() -> u32 {
    9600
}

const fn default_settle_ms() -> u64 {
    2000
}

const fn default_reconnect_interval_ms() -> u64 {
    10_000
}

const fn default_modbus_unit_id() -> u8 {
    DEFAULT_UNIT_ID
}

const fn default_simulated_readings() -> LdrReadings {
    LdrReadings::new(600, 400, 400, 600)
}

/// Main configuration for the pergola controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Address to listen on.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Night mode engages when ambient light drops below this many lux.
    #[serde(default = "default_night_threshold_lux")]
    pub night_threshold_lux: u32,

    /// Sensor polling cadence in milliseconds.
    #[serde(default = "default_sensor_poll_ms")]
    pub sensor_poll_ms: u64,

    /// Periodic broadcast cadence in milliseconds.
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,

    /// Observer location for astronomical tracking; `null` disables it.
    #[serde(default = "default_location")]
    pub location: Option<Location>,

    /// Board transport settings.
    #[serde(default)]
    pub hardware: HardwareConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            night_threshold_lux: default_night_threshold_lux(),
            sensor_poll_ms: default_sensor_poll_ms(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            location: default_location(),
            hardware: HardwareConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `pergola.json` in the current directory and falls back to
    /// the default configuration when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed or fails
    /// validation.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            PergolaError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `pergola.json` from a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `PergolaError::ConfigParseError` if the file cannot be read or
    /// contains invalid JSON, and `PergolaError::ConfigValidationError` if a
    /// value is out of range.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(PergolaError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| PergolaError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `PergolaError::ConfigValidationError` naming the first invalid
    /// value.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(PergolaError::config_validation(
                "host must not be empty",
                "Set host to an address such as \"0.0.0.0\" in your pergola.json",
            ));
        }

        if self.port == 0 {
            return Err(PergolaError::config_validation(
                "port must be greater than 0",
                "Set port to a free TCP port (the mobile app expects 8080)",
            ));
        }

        if self.sensor_poll_ms == 0 {
            return Err(PergolaError::config_validation(
                "sensorPollMs must be greater than 0",
                "Set sensorPollMs to at least 1 in your pergola.json (1000 is typical)",
            ));
        }

        if self.broadcast_interval_ms == 0 {
            return Err(PergolaError::config_validation(
                "broadcastIntervalMs must be greater than 0",
                "Set broadcastIntervalMs to at least 1 in your pergola.json (2000 is typical)",
            ));
        }

        if let Some(location) = &self.location {
            location.validate()?;
        }

        self.hardware.validate()
    }

    /// The address to bind the HTTP listener to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Sensor polling cadence.
    #[must_use]
    pub const fn sensor_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_poll_ms)
    }

    /// Periodic broadcast cadence.
    #[must_use]
    pub const fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }
}

/// Geographic position of the pergola.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Degrees north of the equator.
    pub latitude: f64,
    /// Degrees east of Greenwich.
    pub longitude: f64,
}

impl Location {
    /// Beirut, Lebanon.
    pub const BEIRUT: Self = Self {
        latitude: 33.8938,
        longitude: 35.5018,
    };

    fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(PergolaError::config_validation(
                format!("location.latitude {} is outside [-90, 90]", self.latitude),
                "Set location.latitude in degrees north, or set location to null",
            ));
        }

        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(PergolaError::config_validation(
                format!("location.longitude {} is outside [-180, 180]", self.longitude),
                "Set location.longitude in degrees east, or set location to null",
            ));
        }

        Ok(())
    }
}

/// Which board transport to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// Arduino over a serial port (default).
    #[default]
    Serial,
    /// Board exposing Modbus-RTU holding registers on a serial port.
    Modbus,
    /// In-process simulated board.
    Simulated,
}

impl TransportKind {
    /// Config name of the transport.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Modbus => "modbus",
            Self::Simulated => "simulated",
        }
    }

    /// Parses a string into a `TransportKind`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "serial" => Some(Self::Serial),
            "modbus" => Some(Self::Modbus),
            "simulated" => Some(Self::Simulated),
            _ => None,
        }
    }

    /// Returns `true` if the transport talks to a board over a serial port.
    #[must_use]
    pub const fn uses_serial_port(&self) -> bool {
        matches!(self, Self::Serial | Self::Modbus)
    }
}

impl<'de> Deserialize<'de> for TransportKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid transport '{s}': expected one of 'serial', 'modbus', 'simulated'"
            ))
        })
    }
}

impl Serialize for TransportKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Board transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareConfig {
    /// Which transport to use.
    #[serde(default)]
    pub transport: TransportKind,

    /// Serial devices to probe, in order.
    #[serde(default = "default_serial_ports")]
    pub serial_ports: Vec<String>,

    /// Serial line speed.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Wait after opening a port, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Minimum gap between reconnect attempts, in milliseconds.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Modbus unit id of the board.
    #[serde(default = "default_modbus_unit_id")]
    pub modbus_unit_id: u8,

    /// Readings reported by the simulated board.
    #[serde(default = "default_simulated_readings")]
    pub simulated_readings: LdrReadings,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            serial_ports: default_serial_ports(),
            baud_rate: default_baud_rate(),
            settle_ms: default_settle_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            modbus_unit_id: default_modbus_unit_id(),
            simulated_readings: default_simulated_readings(),
        }
    }
}

impl HardwareConfig {
    fn validate(&self) -> Result<()> {
        if self.transport.uses_serial_port() {
            if self.serial_ports.iter().all(|p| p.trim().is_empty()) {
                return Err(PergolaError::config_validation(
                    "hardware.serialPorts must list at least one port",
                    "Add a device such as \"/dev/ttyACM0\" to hardware.serialPorts, or use --simulate",
                ));
            }

            if self.baud_rate == 0 {
                return Err(PergolaError::config_validation(
                    "hardware.baudRate must be greater than 0",
                    "Set hardware.baudRate to the board's speed (9600 for the stock sketch)",
                ));
            }
        }

        if self.transport == TransportKind::Modbus && !(1..=247).contains(&self.modbus_unit_id) {
            return Err(PergolaError::config_validation(
                format!("hardware.modbusUnitId {} is outside [1, 247]", self.modbus_unit_id),
                "Set hardware.modbusUnitId to the board's Modbus address (1 for the stock sketch)",
            ));
        }

        Ok(())
    }

    /// Settings for the serial bridge.
    #[must_use]
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            ports: self
                .serial_ports
                .iter()
                .filter(|p| !p.trim().is_empty())
                .cloned()
                .collect(),
            baud_rate: self.baud_rate,
            settle: Duration::from_millis(self.settle_ms),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.night_threshold_lux, 300);
        assert_eq!(config.sensor_poll_interval(), Duration::from_secs(1));
        assert_eq!(config.broadcast_interval(), Duration::from_secs(2));
        assert_eq!(config.location, Some(Location::BEIRUT));
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_hardware_default_values() {
        let hardware = HardwareConfig::default();

        assert_eq!(hardware.transport, TransportKind::Serial);
        assert_eq!(hardware.serial_ports.len(), 4);
        assert_eq!(hardware.baud_rate, 9600);
        assert_eq!(hardware.modbus_unit_id, 1);
        assert_eq!(hardware.simulated_readings, LdrReadings::new(600, 400, 400, 600));

        let settings = hardware.serial_settings();
        assert_eq!(settings.settle, Duration::from_secs(2));
        assert_eq!(settings.reconnect_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_deserialization_with_overrides() {
        let json = r#"{
            "port": 9000,
            "nightThresholdLux": 150,
            "location": {"latitude": 51.5, "longitude": -0.12},
            "hardware": {
                "transport": "Simulated",
                "simulatedReadings": [100, 200, 300, 400]
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.night_threshold_lux, 150);
        assert_eq!(
            config.location,
            Some(Location {
                latitude: 51.5,
                longitude: -0.12
            })
        );
        assert_eq!(config.hardware.transport, TransportKind::Simulated);
        assert_eq!(
            config.hardware.simulated_readings,
            LdrReadings::new(100, 200, 300, 400)
        );
        // Untouched keys keep their defaults
        assert_eq!(config.hardware.baud_rate, 9600);
    }

    #[test]
    fn test_null_location_disables_astronomical_tracking() {
        let config: Config = serde_json::from_str(r#"{"location": null}"#).unwrap();
        assert_eq!(config.location, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transport_case_insensitive() {
        for raw in ["serial", "SERIAL", "Serial"] {
            let json = format!(r#"{{"hardware": {{"transport": "{raw}"}}}}"#);
            let config: Config = serde_json::from_str(&json).unwrap();
            assert_eq!(config.hardware.transport, TransportKind::Serial);
        }

        assert_eq!(
            serde_json::to_string(&TransportKind::Simulated).unwrap(),
            "\"simulated\""
        );
    }

    #[test]
    fn test_invalid_transport_error() {
        let json = r#"{"hardware": {"transport": "canbus"}}"#;
        let err = serde_json::from_str::<Config>(json).unwrap_err().to_string();
        assert!(err.contains("invalid transport"));
        assert!(err.contains("canbus"));
    }

    #[test]
    fn test_load_from_file_nonexistent_returns_default() {
        let path = PathBuf::from("/nonexistent/path/pergola.json");
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        use std::io::Write;

        let config_path = std::env::temp_dir().join("test_pergola_invalid.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(b"{ not valid json }").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        assert!(
            matches!(&err, PergolaError::ConfigParseError { path, message } if *path == config_path && !message.is_empty()),
            "Expected ConfigParseError with correct path, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
    }

    #[test]
    fn test_load_from_dir_validates_after_parsing() {
        use std::io::Write;

        let temp_dir = std::env::temp_dir().join("test_pergola_dir");
        std::fs::create_dir_all(&temp_dir).unwrap();
        let config_path = temp_dir.join(CONFIG_FILE_NAME);
        let mut file = std::fs::File::create(&config_path).unwrap();
        file.write_all(br#"{"sensorPollMs": 0}"#).unwrap();

        let err = Config::load_from_dir(&temp_dir).unwrap_err();
        assert!(
            matches!(&err, PergolaError::ConfigValidationError { message, .. } if message.contains("sensorPollMs")),
            "Expected ConfigValidationError about sensorPollMs, got: {err:?}"
        );

        std::fs::remove_file(&config_path).ok();
        std::fs::remove_dir(&temp_dir).ok();
    }

    #[test]
    fn test_config_validation_zero_values() {
        let cases = [
            (
                Config {
                    port: 0,
                    ..Default::default()
                },
                "port",
            ),
            (
                Config {
                    broadcast_interval_ms: 0,
                    ..Default::default()
                },
                "broadcastIntervalMs",
            ),
            (
                Config {
                    host: "  ".to_string(),
                    ..Default::default()
                },
                "host",
            ),
        ];

        for (config, field) in cases {
            let err = config.validate().unwrap_err();
            assert!(
                matches!(&err, PergolaError::ConfigValidationError { message, .. } if message.contains(field)),
                "Expected ConfigValidationError about {field}, got: {err:?}"
            );
        }
    }

    #[test]
    fn test_config_validation_location_range() {
        let config = Config {
            location: Some(Location {
                latitude: 91.0,
                longitude: 0.0,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            location: Some(Location {
                latitude: 0.0,
                longitude: -181.0,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_serial_ports() {
        let mut config = Config::default();
        config.hardware.serial_ports.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("serialPorts"));

        // The simulated transport does not need any
        config.hardware.transport = TransportKind::Simulated;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_modbus_transport_config() {
        let json = r#"{"hardware": {"transport": "MODBUS", "modbusUnitId": 3}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.hardware.transport, TransportKind::Modbus);
        assert_eq!(config.hardware.modbus_unit_id, 3);
        assert!(config.validate().is_ok());

        // Modbus runs over the serial ports too
        let mut config = config;
        config.hardware.serial_ports.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("serialPorts"));
    }

    #[test]
    fn test_config_validation_modbus_unit_id() {
        let mut config = Config::default();
        config.hardware.transport = TransportKind::Modbus;
        config.hardware.modbus_unit_id = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("modbusUnitId"));

        // Ignored by the other transports
        config.hardware.transport = TransportKind::Serial;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_baud_rate() {
        let mut config = Config::default();
        config.hardware.baud_rate = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("baudRate"));
    }
}
