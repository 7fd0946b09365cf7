use crate::Retry;
use anyhow::Context;
use std::{fmt, time::Duration};

pub mod status;
pub use self::status::Status;

pub mod aht21;
#[cfg(feature = "sensor-ccs811")]
pub mod ccs811;
pub mod hdc1080;
pub mod scd4x;
#[cfg(feature = "sensor-sgp30")]
pub mod sgp30;
pub mod sgp41;
pub mod sps30;
pub mod zh03b;

/// Publish group used unless a sensor asks for its own.
pub const READINGS_GROUP: &str = "readings";

/// Sensor-specific options from the config file.
pub type Options = serde_json::Map<String, serde_json::Value>;

/// Topic (without the hub suffix) and a flat JSON object of metric values.
pub type PublishData = Vec<(&'static str, serde_json::Value)>;

/// One physical sensor model.
///
/// Implementations only talk to their device; retries, failure isolation and
/// logging of failed calls are handled by [`Module`].
pub trait Sensor {
    fn name(&self) -> &'static str;

    /// Applies sensor-specific options. Must not touch the bus.
    fn load_config(&mut self, _options: &Options) -> anyhow::Result<()> {
        Ok(())
    }

    /// Attaches to the device and brings it into measurement mode.
    fn connect(&mut self) -> anyhow::Result<()>;

    /// Takes one measurement. Transport failures should be returned as
    /// [`BusError`]s so that they are retried.
    fn poll(&mut self) -> anyhow::Result<()>;

    /// Compensates for ambient temperature (Celsius) and relative humidity.
    fn calibrate(&mut self, _temp_c: f32, _humidity: f32) -> anyhow::Result<()> {
        Ok(())
    }

    /// The latest temperature and humidity, for sensors that can serve as the
    /// calibration source for the others.
    fn temp_humidity(&self) -> Option<(f32, f32)> {
        None
    }

    /// When several sensors have a temperature and humidity reading, the one
    /// with the highest priority is used for calibration.
    fn calibration_priority(&self) -> u8 {
        0
    }

    fn publish_group(&self) -> &'static str {
        READINGS_GROUP
    }

    fn publish_data(&self) -> PublishData;
}

/// A transport failure (I2C or serial), as opposed to the device reporting a
/// fault.
#[derive(Debug, thiserror::Error)]
#[error("{sensor}: bus error: {message}")]
pub struct BusError {
    sensor: &'static str,
    message: String,
}

/// A sensor plus the bookkeeping that keeps one bad sensor from affecting the
/// rest of the hub.
pub struct Module<'bus> {
    sensor: Box<dyn Sensor + 'bus>,
    status: Status,
    consecutive_failures: usize,
    max_failures: usize,
    measure_attempts: usize,
    measure_delay: Duration,
}

// === impl BusError ===

impl BusError {
    pub fn new(sensor: &'static str, error: impl fmt::Debug) -> Self {
        Self {
            sensor,
            message: format!("{error:?}"),
        }
    }

    pub fn crc(sensor: &'static str, expected: u8, found: u8) -> Self {
        Self {
            sensor,
            message: format!("CRC mismatch (expected {expected:#04x}, found {found:#04x})"),
        }
    }
}

// === impl Module ===

impl<'bus> Module<'bus> {
    pub fn new(sensor: impl Sensor + 'bus) -> Self {
        Self {
            sensor: Box::new(sensor),
            status: Status::Missing,
            consecutive_failures: 0,
            max_failures: 0,
            measure_attempts: 1,
            measure_delay: Duration::ZERO,
        }
    }

    pub fn with_measure_retry(self, attempts: usize, delay: Duration) -> Self {
        Self {
            measure_attempts: attempts,
            measure_delay: delay,
            ..self
        }
    }

    /// Mark the module down after `max` consecutive failed measurements. Zero
    /// never gives up.
    pub fn with_max_failures(self, max: usize) -> Self {
        Self {
            max_failures: max,
            ..self
        }
    }

    pub fn name(&self) -> &'static str {
        self.sensor.name()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn load_config(&mut self, options: &Options) -> anyhow::Result<()> {
        let name = self.name();
        self.sensor
            .load_config(options)
            .with_context(|| format!("invalid configuration for {name}"))
    }

    /// Connects the sensor, retrying any error up to `attempts` times.
    pub fn connect(&mut self, attempts: usize, delay: Duration) -> anyhow::Result<()> {
        let name = self.name();
        log::info!(target: name, "connecting {name}...");
        let sensor = &mut self.sensor;
        Retry::<anyhow::Error>::new(attempts)
            .with_delay(delay)
            .with_target(name)
            .run(|| sensor.connect())
            .with_context(|| format!("failed to connect {name} after {attempts} attempts"))?;

        self.status = Status::Up;
        self.consecutive_failures = 0;
        log::info!(target: name, "{name} is up");
        Ok(())
    }

    /// Takes a measurement. Failures are logged and never propagated; the
    /// sensor keeps its previous values.
    pub fn measure(&mut self) {
        if !self.status.is_up() {
            return;
        }

        let name = self.name();
        let sensor = &mut self.sensor;
        let result = Retry::<anyhow::Error>::new(self.measure_attempts)
            .with_delay(self.measure_delay)
            .with_target(name)
            .with_predicate(|error: &anyhow::Error| error.is::<BusError>())
            .run(|| sensor.poll());

        match result {
            Ok(()) => self.consecutive_failures = 0,
            Err(error) => {
                self.consecutive_failures += 1;
                log::warn!(
                    target: name,
                    "{name} measurement failed ({} in a row): {error:#}",
                    self.consecutive_failures
                );
                if self.max_failures > 0 && self.consecutive_failures >= self.max_failures {
                    log::error!(
                        target: name,
                        "{name} failed {} measurements in a row; marking it down",
                        self.consecutive_failures
                    );
                    self.status = Status::Down;
                }
            }
        }
    }

    /// Best-effort temperature/humidity compensation.
    pub fn calibrate_temps(&mut self, temp_c: f32, humidity: f32) {
        if !self.status.is_up() {
            return;
        }

        let name = self.name();
        match self.sensor.calibrate(temp_c, humidity) {
            Ok(()) => log::debug!(target: name, "calibrated {name} to {temp_c:.2}°C, {humidity:.2}% RH"),
            Err(error) => log::warn!(target: name, "failed to calibrate {name}: {error:#}"),
        }
    }

    pub fn temp_humidity(&self) -> Option<(f32, f32)> {
        if !self.status.is_up() {
            return None;
        }
        self.sensor.temp_humidity()
    }

    pub fn calibration_priority(&self) -> u8 {
        self.sensor.calibration_priority()
    }

    pub fn publish_group(&self) -> &'static str {
        self.sensor.publish_group()
    }

    /// `None` unless the sensor is attached and healthy.
    pub fn publish_data(&self) -> Option<PublishData> {
        if !self.status.is_up() {
            return None;
        }
        Some(self.sensor.publish_data())
    }
}

impl fmt::Debug for Module<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("sensor", &self.name())
            .field("status", &self.status)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}
