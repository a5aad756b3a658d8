//! Serial-port bridge to the Arduino board.
//!
//! The bridge probes a list of candidate ports and keeps the first one that
//! opens. When the link drops it goes back to probing, no more often than the
//! configured reconnect interval. While disconnected every call fails with
//! [`HardwareError::NotConnected`], which the runner treats as degraded mode.

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, instrument, warn};

use crate::{
    HardwareBridge, HardwareError, LineBridge, RuntimeMode, SensorFrame, ServoPositions,
};

/// Connection parameters for [`SerialBridge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Candidate device paths, tried in order.
    pub ports: Vec<String>,
    /// Line speed.
    pub baud_rate: u32,
    /// Pause after opening a port; opening resets most Arduino boards.
    pub settle: Duration,
    /// Minimum gap between two connection attempts.
    pub reconnect_interval: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            ports: ["/dev/ttyACM0", "/dev/ttyACM1", "/dev/ttyUSB0", "/dev/ttyUSB1"]
                .map(String::from)
                .to_vec(),
            baud_rate: 9600,
            settle: Duration::from_secs(2),
            reconnect_interval: Duration::from_secs(10),
        }
    }
}

/// [`HardwareBridge`] over a serial port, reconnecting on demand.
pub struct SerialBridge {
    settings: SerialSettings,
    link: Option<LineBridge<SerialStream>>,
    last_attempt: Option<Instant>,
}

impl std::fmt::Debug for SerialBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialBridge")
            .field("settings", &self.settings)
            .field("connected", &self.link.is_some())
            .finish_non_exhaustive()
    }
}

impl SerialBridge {
    /// Creates a disconnected bridge. The first call to any bridge method
    /// attempts to connect.
    #[must_use]
    pub const fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            link: None,
            last_attempt: None,
        }
    }

    /// Returns `true` while a port is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Tries every candidate port in order and keeps the first that opens.
    #[instrument(skip(self), fields(baud_rate = self.settings.baud_rate))]
    pub async fn connect(&mut self) -> Result<(), HardwareError> {
        self.last_attempt = Some(Instant::now());

        for port in &self.settings.ports {
            match tokio_serial::new(port, self.settings.baud_rate).open_native_async() {
                Ok(stream) => {
                    sleep(self.settings.settle).await;
                    info!(port = %port, "Connected to board");
                    self.link = Some(LineBridge::new(stream));
                    return Ok(());
                }
                Err(e) => debug!(port = %port, error = %e, "Port unavailable"),
            }
        }

        Err(HardwareError::ConnectFailed {
            ports: self.settings.ports.join(", "),
        })
    }

    async fn link(&mut self) -> Result<&mut LineBridge<SerialStream>, HardwareError> {
        if self.link.is_none() {
            let due = self
                .last_attempt
                .map_or(true, |at| at.elapsed() >= self.settings.reconnect_interval);
            if !due {
                return Err(HardwareError::NotConnected);
            }
            self.connect().await?;
        }

        self.link.as_mut().ok_or(HardwareError::NotConnected)
    }

    fn check<T>(&mut self, result: Result<T, HardwareError>) -> Result<T, HardwareError> {
        if let Err(e) = &result {
            if e.is_link_lost() {
                warn!(error = %e, "Lost board link");
                self.link = None;
            }
        }
        result
    }
}

impl HardwareBridge for SerialBridge {
    async fn read_sensors(&mut self) -> Result<SensorFrame, HardwareError> {
        let result = self.link().await?.read_frame().await;
        self.check(result)
    }

    async fn write_actuators(&mut self, positions: ServoPositions) -> Result<(), HardwareError> {
        let result = self.link().await?.write_actuators(positions).await;
        self.check(result)
    }

    async fn set_runtime_mode(&mut self, mode: RuntimeMode) -> Result<(), HardwareError> {
        let result = self.link().await?.set_runtime_mode(mode).await;
        self.check(result)
    }
}
