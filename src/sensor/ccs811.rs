use super::{BusError, Options, PublishData, Sensor};
use crate::filter::SensorFilter;
use ccs811::{DriveMode, Error};
use embedded_hal::blocking::{delay::DelayMs, i2c};
use serde_json::json;
use std::{fmt, ops::Range};

pub use ccs811::{ALTERNATE_ADDRESS, DEFAULT_ADDRESS};

const NAME: &str = "CCS811";

/// Plausible eCO2 values, in ppm. The algorithm never reports less than 400.
const ECO2_RANGE: Range<u16> = 400..30_000;
/// Plausible TVOC values, in ppb.
const TVOC_RANGE: Range<u16> = 0..30_000;

const FILTER_WINDOW: usize = 9;
const FILTER_ALPHA: f32 = 0.2;

pub struct Ccs811<I, D> {
    sensor: ccs811::Ccs811<I, D>,
    mode: DriveMode,
    /// Forward the hub's temperature and humidity to the device. Off unless
    /// the `compensate` option is set.
    compensate: bool,
    last_eco2: Option<u16>,
    last_tvoc: Option<u16>,
    eco2: SensorFilter<FILTER_WINDOW>,
    tvoc: SensorFilter<FILTER_WINDOW>,
}

fn driver_error<E: fmt::Debug>(error: Error<E>) -> anyhow::Error {
    match error {
        Error::I2c(error) => BusError::new(NAME, error).into(),
        error => anyhow::anyhow!("{NAME}: {error}"),
    }
}

fn drive_mode(value: u64) -> Option<DriveMode> {
    Some(match value {
        0 => DriveMode::Idle,
        1 => DriveMode::EverySecond,
        2 => DriveMode::Every10Seconds,
        3 => DriveMode::Every60Seconds,
        4 => DriveMode::Every250Millis,
        _ => return None,
    })
}

impl<I, D, E> Ccs811<I, D>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    D: DelayMs<u16>,
    E: fmt::Debug,
{
    pub fn new(i2c: I, address: u8, delay: D) -> Self {
        Self {
            sensor: ccs811::Ccs811::new(i2c, address, delay),
            mode: DriveMode::EverySecond,
            compensate: false,
            last_eco2: None,
            last_tvoc: None,
            eco2: SensorFilter::new(FILTER_ALPHA),
            tvoc: SensorFilter::new(FILTER_ALPHA),
        }
    }

    /// Logs whatever the device can still tell us after a failed read.
    fn log_diagnostics(&mut self, error: &Error<E>) {
        if let Error::Device(fault) = error {
            log::warn!(
                target: NAME,
                "{NAME} fault: status [{}], error [{}], read back [{}]; raw eCO2 {}, TVOC {}",
                fault.reading.status,
                fault.reading.error_id,
                fault.error_code,
                fault.reading.eco2_orig,
                fault.reading.tvoc_orig,
            );
            return;
        }

        match self.sensor.error_code() {
            Ok(code) => log::warn!(target: NAME, "{NAME} error register: {:#04x} [{code}]", code.0),
            Err(error) => log::warn!(target: NAME, "{NAME} error register unreadable: {error}"),
        }
    }
}

impl<I, D, E> Sensor for Ccs811<I, D>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    D: DelayMs<u16>,
    E: fmt::Debug,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn load_config(&mut self, options: &Options) -> anyhow::Result<()> {
        if let Some(value) = options.get("driveMode") {
            self.mode = value
                .as_u64()
                .and_then(drive_mode)
                .ok_or_else(|| anyhow::anyhow!("invalid drive mode {value}, expected 0-4"))?;
        }
        if let Some(value) = options.get("compensate") {
            self.compensate = value
                .as_bool()
                .ok_or_else(|| anyhow::anyhow!("invalid compensate flag {value}"))?;
        }
        Ok(())
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        self.sensor.reboot_to_mode(self.mode).map_err(driver_error)
    }

    fn poll(&mut self) -> anyhow::Result<()> {
        if !self.sensor.fw_mode().map_err(driver_error)? {
            log::warn!(target: NAME, "{NAME} fell back to boot mode; rebooting");
            return self.sensor.reboot_to_mode(self.mode).map_err(driver_error);
        }

        let reading = match self.sensor.read_data() {
            Ok(Some(reading)) => reading,
            Ok(None) => {
                log::trace!(target: NAME, "{NAME} has no new data");
                return Ok(());
            }
            Err(error) => {
                self.log_diagnostics(&error);
                return Err(driver_error(error));
            }
        };

        log::debug!(
            target: NAME,
            "eCO2: {} ppm, TVOC: {} ppb, {} uA, {:.3} V",
            reading.eco2,
            reading.tvoc,
            reading.raw_current,
            reading.raw_voltage,
        );
        if reading.overflow {
            log::info!(
                target: NAME,
                "{NAME} overflow corrected: eCO2 {:#06x} -> {}, TVOC {:#06x} -> {}",
                reading.eco2_orig,
                reading.eco2,
                reading.tvoc_orig,
                reading.tvoc,
            );
        }

        // each channel is kept or dropped on its own
        let eco2_ok = ECO2_RANGE.contains(&reading.eco2);
        if eco2_ok {
            self.eco2.update(f32::from(reading.eco2));
            self.last_eco2 = Some(reading.eco2);
        }
        let tvoc_ok = TVOC_RANGE.contains(&reading.tvoc);
        if tvoc_ok {
            self.tvoc.update(f32::from(reading.tvoc));
            self.last_tvoc = Some(reading.tvoc);
        }

        anyhow::ensure!(
            eco2_ok && tvoc_ok,
            "{NAME}: implausible reading (eCO2 {} ppm, TVOC {} ppb)",
            reading.eco2,
            reading.tvoc
        );
        Ok(())
    }

    fn calibrate(&mut self, temp_c: f32, humidity: f32) -> anyhow::Result<()> {
        if !self.compensate {
            return Ok(());
        }
        self.sensor
            .set_environmental_data(humidity, temp_c)
            .map_err(driver_error)
    }

    fn publish_data(&self) -> PublishData {
        if self.last_eco2.is_none() && self.last_tvoc.is_none() {
            return Vec::new();
        }
        vec![
            (
                "sensors/ccs811_raw",
                json!({ "eCO2": self.last_eco2, "TVOC": self.last_tvoc }),
            ),
            (
                "sensors/ccs811_filt",
                json!({ "eCO2": self.eco2.value(), "TVOC": self.tvoc.value() }),
            ),
        ]
    }
}
