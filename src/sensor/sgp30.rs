//! Sensirion SGP30 eCO2/TVOC sensor, driven through the `sgp30` crate.
use super::{BusError, PublishData, Sensor};
use crate::{filter::SensorFilter, units};
use embedded_hal::blocking::{
    delay::{DelayMs, DelayUs},
    i2c,
};
use serde_json::json;
use std::{fmt, time::Instant};

// the adafruit breakout board has this I2C address.
pub const ADDRESS: u8 = 0x58;

const NAME: &str = "SGP30";

/// Measurements taken while the sensor initializes its baseline read a fixed
/// 400 ppm / 0 ppb.
const INIT_MEASUREMENTS: usize = 15;

/// Compensation applied until the first calibration arrives.
const INITIAL_TEMP_HUMIDITY: (f32, f32) = (26.0, 45.0);

const FILTER_WINDOW: usize = 5;
const FILTER_ALPHA: f32 = 0.2;

pub struct Sgp30<I, D> {
    sensor: sgp30::Sgp30<I, D>,
    started_at: Instant,
    init_measurements: usize,
    compensation: Option<(f32, f32)>,
    readings: Readings,
}

#[derive(Debug)]
struct Readings {
    eco2: u16,
    tvoc: u16,
    h2: u16,
    ethanol: u16,
    eco2_filt: SensorFilter<FILTER_WINDOW>,
    tvoc_filt: SensorFilter<FILTER_WINDOW>,
}

impl<I, D, E> Sgp30<I, D>
where
    I: i2c::Read<Error = E> + i2c::Write<Error = E> + i2c::WriteRead<Error = E>,
    D: DelayUs<u16> + DelayMs<u16>,
    E: fmt::Debug,
{
    pub fn new(i2c: I, address: u8, delay: D) -> Self {
        Self {
            sensor: sgp30::Sgp30::new(i2c, address, delay),
            started_at: Instant::now(),
            init_measurements: 0,
            compensation: None,
            readings: Readings::new(),
        }
    }

    fn set_humidity(&mut self, temp_c: f32, humidity: f32) -> anyhow::Result<()> {
        let absolute = units::absolute_humidity(temp_c, humidity);
        let absolute = sgp30::Humidity::from_f32(absolute)
            .map_err(|error| anyhow::anyhow!("invalid absolute humidity {absolute}: {error:?}"))?;
        self.sensor
            .set_humidity(Some(&absolute))
            .map_err(|error| BusError::new(NAME, error))?;
        Ok(())
    }
}

impl<I, D, E> Sensor for Sgp30<I, D>
where
    I: i2c::Read<Error = E> + i2c::Write<Error = E> + i2c::WriteRead<Error = E>,
    D: DelayUs<u16> + DelayMs<u16>,
    E: fmt::Debug,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        let version = self
            .sensor
            .get_feature_set()
            .map_err(|error| BusError::new(NAME, error))?;
        log::info!(target: NAME, "connected to {NAME}: version: {version:?}");

        // run the self-test
        let selftest = self
            .sensor
            .selftest()
            .map_err(|error| BusError::new(NAME, error))?;
        if !selftest {
            anyhow::bail!("{NAME} self-test failed");
        }

        self.sensor
            .init()
            .map_err(|error| BusError::new(NAME, error))?;
        self.started_at = Instant::now();
        self.init_measurements = 0;

        let (temp_c, humidity) = self.compensation.unwrap_or(INITIAL_TEMP_HUMIDITY);
        self.set_humidity(temp_c, humidity)
    }

    fn poll(&mut self) -> anyhow::Result<()> {
        let sgp30::Measurement {
            tvoc_ppb,
            co2eq_ppm,
        } = self
            .sensor
            .measure()
            .map_err(|error| BusError::new(NAME, error))?;
        let sgp30::RawSignals { h2, ethanol } = self
            .sensor
            .measure_raw_signals()
            .map_err(|error| BusError::new(NAME, error))?;

        if self.init_measurements < INIT_MEASUREMENTS {
            let elapsed = self.started_at.elapsed();
            log::info!(
                target: NAME,
                "{NAME} in init phase for {elapsed:?} ({} measurements)...",
                self.init_measurements
            );
            self.init_measurements += 1;
            return Ok(());
        }

        log::debug!(target: NAME, "eCO2: {co2eq_ppm} ppm, tVOC: {tvoc_ppb} ppb, H2: {h2}, ethanol: {ethanol}");
        self.readings.record(co2eq_ppm, tvoc_ppb, h2, ethanol);
        Ok(())
    }

    fn calibrate(&mut self, temp_c: f32, humidity: f32) -> anyhow::Result<()> {
        self.set_humidity(temp_c, humidity)?;
        self.compensation = Some((temp_c, humidity));
        Ok(())
    }

    fn publish_data(&self) -> PublishData {
        if self.init_measurements < INIT_MEASUREMENTS {
            return Vec::new();
        }
        self.readings.publish_data(self.compensation)
    }
}

// === impl Readings ===

impl Readings {
    fn new() -> Self {
        Self {
            eco2: 0,
            tvoc: 0,
            h2: 0,
            ethanol: 0,
            eco2_filt: SensorFilter::new(FILTER_ALPHA),
            tvoc_filt: SensorFilter::new(FILTER_ALPHA),
        }
    }

    fn record(&mut self, eco2: u16, tvoc: u16, h2: u16, ethanol: u16) {
        self.h2 = h2;
        self.ethanol = ethanol;
        // zero means no reading for that channel
        if eco2 > 0 {
            self.eco2 = eco2;
            self.eco2_filt.update(f32::from(eco2));
        }
        if tvoc > 0 {
            self.tvoc = tvoc;
            self.tvoc_filt.update(f32::from(tvoc));
        }
    }

    fn publish_data(&self, compensation: Option<(f32, f32)>) -> PublishData {
        let (temp, humidity) = compensation.unzip();
        let eco2 = self.eco2_filt.value();
        let tvoc = self.tvoc_filt.value();
        vec![
            (
                "sensors/sgp30",
                json!({
                    "eCO2": eco2,
                    "TVOC": tvoc,
                    "Eth": self.ethanol,
                    "H2": self.h2,
                    "temp": temp,
                    "humidity": humidity,
                }),
            ),
            (
                "sensors/sgp30_raw",
                json!({ "eCO2": self.eco2, "TVOC": self.tvoc }),
            ),
            ("sensors/sgp30_filt", json!({ "eCO2": eco2, "TVOC": tvoc })),
        ]
    }
}
