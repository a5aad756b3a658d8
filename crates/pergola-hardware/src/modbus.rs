//! Modbus-RTU bridge for boards that expose holding registers instead of
//! the text-line protocol.
//!
//! # Register map
//!
//! | register | direction | meaning |
//! |---|---|---|
//! | 0..=3 | read | light sensors (front, right, back, left) |
//! | 10..=13 | read/write | actuator positions (front, right, back, left) |
//! | 20 | write | runtime mode: 0 off, 1 manual, 2 auto |

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::time::{sleep, timeout};
use tokio_modbus::client::Context;
use tokio_modbus::prelude::{rtu, Reader, Slave, Writer};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, instrument, warn};

use crate::{
    HardwareBridge, HardwareError, LdrReadings, RuntimeMode, SensorFrame, SerialSettings,
    ServoPositions,
};

/// First light sensor register.
pub const SENSOR_REGISTER: u16 = 0;

/// First actuator position register.
pub const ACTUATOR_REGISTER: u16 = 10;

/// Runtime mode register.
pub const MODE_REGISTER: u16 = 20;

/// Unit id of the stock board sketch.
pub const DEFAULT_UNIT_ID: u8 = 1;

/// How long the board gets to answer a request.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Holding-register access, the only part of Modbus the bridge needs.
pub trait RegisterBus: Send {
    /// Reads `count` consecutive holding registers starting at `address`.
    fn read_holding(
        &mut self,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, HardwareError>> + Send;

    /// Writes consecutive holding registers starting at `address`.
    fn write_holding(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = Result<(), HardwareError>> + Send;
}

fn modbus_error(e: tokio_modbus::Error) -> HardwareError {
    match e {
        tokio_modbus::Error::Transport(e) => HardwareError::Io(e),
        e => HardwareError::Modbus(e.to_string()),
    }
}

fn no_response() -> HardwareError {
    HardwareError::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        "board did not answer in time",
    ))
}

impl RegisterBus for Context {
    async fn read_holding(&mut self, address: u16, count: u16) -> Result<Vec<u16>, HardwareError> {
        timeout(RESPONSE_TIMEOUT, self.read_holding_registers(address, count))
            .await
            .map_err(|_| no_response())?
            .map_err(modbus_error)?
            .map_err(|code| HardwareError::Modbus(format!("exception {code:?}")))
    }

    async fn write_holding(&mut self, address: u16, values: &[u16]) -> Result<(), HardwareError> {
        timeout(RESPONSE_TIMEOUT, self.write_multiple_registers(address, values))
            .await
            .map_err(|_| no_response())?
            .map_err(modbus_error)?
            .map_err(|code| HardwareError::Modbus(format!("exception {code:?}")))
    }
}

/// Register value of a runtime mode.
#[must_use]
pub const fn mode_register_value(mode: RuntimeMode) -> u16 {
    match mode {
        RuntimeMode::Off => 0,
        RuntimeMode::Manual => 1,
        RuntimeMode::Auto => 2,
    }
}

fn quad(words: &[u16]) -> Result<[u16; 4], HardwareError> {
    <[u16; 4]>::try_from(words).map_err(|_| {
        HardwareError::Modbus(format!("expected 4 registers, got {}", words.len()))
    })
}

/// [`HardwareBridge`] over any [`RegisterBus`].
#[derive(Debug)]
pub struct RegisterBridge<R> {
    bus: R,
}

impl<R: RegisterBus> RegisterBridge<R> {
    /// Wraps an open bus.
    pub const fn new(bus: R) -> Self {
        Self { bus }
    }

    /// Reads the sensor registers and the actuator positions the board holds.
    pub async fn read_frame(&mut self) -> Result<SensorFrame, HardwareError> {
        let [front, right, back, left] =
            quad(&self.bus.read_holding(SENSOR_REGISTER, 4).await?)?;
        let positions = quad(&self.bus.read_holding(ACTUATOR_REGISTER, 4).await?)?.map(i32::from);

        Ok(SensorFrame {
            ldr: Some(LdrReadings::new(front, right, back, left)),
            servo_feedback: Some(ServoPositions::clamped(positions)),
        })
    }
}

impl<R: RegisterBus> HardwareBridge for RegisterBridge<R> {
    async fn read_sensors(&mut self) -> Result<SensorFrame, HardwareError> {
        self.read_frame().await
    }

    async fn write_actuators(&mut self, positions: ServoPositions) -> Result<(), HardwareError> {
        let words = positions.as_array().map(u16::from);
        self.bus.write_holding(ACTUATOR_REGISTER, &words).await?;
        debug!(%positions, "Wrote actuator registers");
        Ok(())
    }

    async fn set_runtime_mode(&mut self, mode: RuntimeMode) -> Result<(), HardwareError> {
        self.bus
            .write_holding(MODE_REGISTER, &[mode_register_value(mode)])
            .await?;
        debug!(%mode, "Wrote mode register");
        Ok(())
    }
}

/// [`HardwareBridge`] speaking Modbus-RTU over a serial port, reconnecting
/// on demand the same way as [`SerialBridge`](crate::SerialBridge).
pub struct ModbusBridge {
    settings: SerialSettings,
    unit_id: u8,
    link: Option<RegisterBridge<Context>>,
    last_attempt: Option<Instant>,
}

impl std::fmt::Debug for ModbusBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusBridge")
            .field("settings", &self.settings)
            .field("unit_id", &self.unit_id)
            .field("connected", &self.link.is_some())
            .finish_non_exhaustive()
    }
}

impl ModbusBridge {
    /// Creates a disconnected bridge talking to the given unit.
    #[must_use]
    pub const fn new(settings: SerialSettings, unit_id: u8) -> Self {
        Self {
            settings,
            unit_id,
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
    #[instrument(skip(self), fields(baud_rate = self.settings.baud_rate, unit_id = self.unit_id))]
    pub async fn connect(&mut self) -> Result<(), HardwareError> {
        self.last_attempt = Some(Instant::now());

        for port in &self.settings.ports {
            match tokio_serial::new(port, self.settings.baud_rate).open_native_async() {
                Ok(stream) => {
                    sleep(self.settings.settle).await;
                    info!(port = %port, "Connected to Modbus board");
                    let context = rtu::attach_slave(stream, Slave(self.unit_id));
                    self.link = Some(RegisterBridge::new(context));
                    return Ok(());
                }
                Err(e) => debug!(port = %port, error = %e, "Port unavailable"),
            }
        }

        Err(HardwareError::ConnectFailed {
            ports: self.settings.ports.join(", "),
        })
    }

    async fn link(&mut self) -> Result<&mut RegisterBridge<Context>, HardwareError> {
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
                warn!(error = %e, "Lost Modbus link");
                self.link = None;
            }
        }
        result
    }
}

impl HardwareBridge for ModbusBridge {
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
