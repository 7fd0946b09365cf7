//! Sensirion SPS30 particulate matter sensor, in its 16-bit integer output
//! mode.
use super::{Options, PublishData, Sensor};
use crate::sensirion::Sensirion;
use embedded_hal::blocking::i2c;
use serde::Serialize;
use std::fmt;

pub const ADDRESS: u8 = 0x69;

const NAME: &str = "SPS30";

const CMD_START_MEASUREMENT: u16 = 0x0010;
const CMD_STOP_MEASUREMENT: u16 = 0x0104;
const CMD_DATA_READY: u16 = 0x0202;
const CMD_READ_MEASUREMENT: u16 = 0x0300;
const CMD_WAKEUP: u16 = 0x1103;
const CMD_AUTO_CLEANING_INTERVAL: u16 = 0x8004;

const FORMAT_INTEGER: u16 = 0x0500;

const COMMAND_DELAY_MS: u64 = 20;
const WAKEUP_DELAY_MS: u64 = 5;

/// Mass concentrations in ug/m^3, number concentrations in #/cm^3 and the
/// typical particle size in nm.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Measurement {
    pub pm10: u16,
    pub pm25: u16,
    pub pm40: u16,
    pub pm100: u16,
    pub pc05um: u16,
    pub pc10um: u16,
    pub pc25um: u16,
    pub pc40um: u16,
    pub pc100um: u16,
    pub tps: u16,
}

pub struct Sps30<I> {
    dev: Sensirion<I>,
    /// Seconds between automatic fan cleanings. `None` leaves the device's
    /// own setting alone; zero disables it.
    auto_clean_interval: Option<u32>,
    last: Option<Measurement>,
}

impl Measurement {
    pub fn from_words(words: [u16; 10]) -> Self {
        let [pm10, pm25, pm40, pm100, pc05um, pc10um, pc25um, pc40um, pc100um, tps] = words;
        Self {
            pm10,
            pm25,
            pm40,
            pm100,
            pc05um,
            pc10um,
            pc25um,
            pc40um,
            pc100um,
            tps,
        }
    }
}

impl<I, E> Sps30<I>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: fmt::Debug,
{
    pub fn new(i2c: I) -> Self {
        Self {
            dev: Sensirion::new(i2c, ADDRESS, NAME),
            auto_clean_interval: None,
            last: None,
        }
    }

    /// Wakes the device from sleep mode. The first command only wakes up the
    /// interface and may be NACKed.
    pub fn wakeup(&mut self) -> anyhow::Result<()> {
        if let Err(error) = self.dev.command(CMD_WAKEUP, &[], 0) {
            log::trace!(target: NAME, "first wakeup: {error}");
        }
        self.dev.command(CMD_WAKEUP, &[], WAKEUP_DELAY_MS)
    }

    pub fn set_auto_cleaning_interval(&mut self, seconds: u32) -> anyhow::Result<()> {
        let args = [(seconds >> 16) as u16, seconds as u16];
        self.dev
            .command(CMD_AUTO_CLEANING_INTERVAL, &args, COMMAND_DELAY_MS)
    }

    pub fn data_ready(&mut self) -> anyhow::Result<bool> {
        let [flag] = self.dev.read_words::<1>(CMD_DATA_READY, &[], 0)?;
        Ok(flag & 0x00FF == 0x01)
    }
}

impl<I, E> Sensor for Sps30<I>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: fmt::Debug,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn load_config(&mut self, options: &Options) -> anyhow::Result<()> {
        if let Some(value) = options.get("autoCleaningInterval") {
            let seconds = value
                .as_u64()
                .and_then(|seconds| u32::try_from(seconds).ok())
                .ok_or_else(|| anyhow::anyhow!("invalid auto cleaning interval {value}"))?;
            self.auto_clean_interval = Some(seconds);
        }
        Ok(())
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        self.wakeup()?;
        // switching output formats requires a stop first
        self.dev.command(CMD_STOP_MEASUREMENT, &[], COMMAND_DELAY_MS)?;
        self.dev
            .command(CMD_START_MEASUREMENT, &[FORMAT_INTEGER], COMMAND_DELAY_MS)?;

        if let Some(seconds) = self.auto_clean_interval {
            self.set_auto_cleaning_interval(seconds)?;
            log::info!(target: NAME, "{NAME} auto cleaning interval set to {seconds}s");
        }
        Ok(())
    }

    fn poll(&mut self) -> anyhow::Result<()> {
        if !self.data_ready()? {
            return Ok(());
        }

        let words = self.dev.read_words(CMD_READ_MEASUREMENT, &[], 0)?;
        let measurement = Measurement::from_words(words);
        log::debug!(
            target: NAME,
            "PM1.0: {}, PM2.5: {}, PM10: {} ug/m^3",
            measurement.pm10,
            measurement.pm25,
            measurement.pm100,
        );
        self.last = Some(measurement);
        Ok(())
    }

    fn publish_data(&self) -> PublishData {
        let data = self
            .last
            .and_then(|measurement| serde_json::to_value(measurement).ok())
            .unwrap_or(serde_json::Value::Null);
        vec![("sensors/sps30", data)]
    }
}
