//! Sensirion SGP41 VOC and NOx sensor.
//!
//! The device only reports raw signals; they are turned into VOC and NOx
//! indices by one [`GasIndex`] per channel.
use super::{Options, PublishData, Sensor};
use crate::{gas_index::GasIndex, sensirion::Sensirion, units};
use embedded_hal::blocking::i2c;
use serde_json::json;
use std::{fmt, thread, time::Duration};

pub const ADDRESS: u8 = 0x59;

const NAME: &str = "SGP41";

const CMD_CONDITIONING: u16 = 0x2612;
const CMD_MEASURE_RAW: u16 = 0x2619;
const CMD_SELF_TEST: u16 = 0x280E;
const CMD_SERIAL_NUMBER: u16 = 0x3682;

const CONDITIONING_DELAY_MS: u64 = 50;
const MEASURE_DELAY_MS: u64 = 50;
const SELF_TEST_DELAY_MS: u64 = 320;
const SERIAL_DELAY_MS: u64 = 10;

const SELF_TEST_PASS: u16 = 0xD400;

/// Compensation ticks for 50 %RH and 25°C, which the device treats as
/// "uncompensated".
const DEFAULT_COMPENSATION: [u16; 2] = [0x8000, 0x6666];

/// Longer conditioning may damage the NOx pixel.
const MAX_CONDITIONING: Duration = Duration::from_secs(10);

pub struct Sgp41<I> {
    dev: Sensirion<I>,
    voc: GasIndex,
    nox: GasIndex,
    conditioning: Duration,
    compensation: Option<(f32, f32)>,
    sraw: Option<(u16, u16)>,
    index: Option<(i32, i32)>,
}

impl<I, E> Sgp41<I>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: fmt::Debug,
{
    /// `sampling_interval` is the time between polls, in seconds.
    pub fn new(i2c: I, sampling_interval: f32) -> Self {
        Self {
            dev: Sensirion::new(i2c, ADDRESS, NAME),
            voc: GasIndex::voc(sampling_interval),
            nox: GasIndex::nox(sampling_interval),
            conditioning: MAX_CONDITIONING,
            compensation: None,
            sraw: None,
            index: None,
        }
    }

    pub fn with_conditioning(self, conditioning: Duration) -> Self {
        Self {
            conditioning: conditioning.min(MAX_CONDITIONING),
            ..self
        }
    }

    fn compensation_ticks(&self) -> [u16; 2] {
        match self.compensation {
            Some((temp_c, humidity)) => [
                units::humidity_ticks(humidity),
                units::temperature_ticks(temp_c),
            ],
            None => DEFAULT_COMPENSATION,
        }
    }

    pub fn serial_number(&mut self) -> anyhow::Result<u64> {
        let words: [u16; 3] = self.dev.read_words(CMD_SERIAL_NUMBER, &[], SERIAL_DELAY_MS)?;
        Ok(words
            .iter()
            .fold(0u64, |serial, &word| (serial << 16) | u64::from(word)))
    }

    /// Runs the built-in self test, returning the raw result word.
    pub fn self_test(&mut self) -> anyhow::Result<u16> {
        let [result] = self.dev.read_words::<1>(CMD_SELF_TEST, &[], SELF_TEST_DELAY_MS)?;
        Ok(result)
    }

    /// Heats the NOx pixel for start-up; returns the VOC raw signal.
    pub fn execute_conditioning(&mut self) -> anyhow::Result<u16> {
        let [sraw_voc] =
            self.dev
                .read_words::<1>(CMD_CONDITIONING, &DEFAULT_COMPENSATION, CONDITIONING_DELAY_MS)?;
        Ok(sraw_voc)
    }

    /// Reads the raw VOC and NOx signals, compensated for the last known
    /// temperature and humidity.
    pub fn measure_raw(&mut self) -> anyhow::Result<(u16, u16)> {
        let args = self.compensation_ticks();
        let [voc, nox] = self.dev.read_words::<2>(CMD_MEASURE_RAW, &args, MEASURE_DELAY_MS)?;
        Ok((voc, nox))
    }
}

impl<I, E> Sensor for Sgp41<I>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: fmt::Debug,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn load_config(&mut self, options: &Options) -> anyhow::Result<()> {
        if let Some(value) = options.get("conditioningSecs") {
            let secs = value
                .as_f64()
                .filter(|secs| (0.0..=MAX_CONDITIONING.as_secs_f64()).contains(secs))
                .ok_or_else(|| anyhow::anyhow!("invalid conditioning time {value}, expected 0-10"))?;
            self.conditioning = Duration::from_secs_f64(secs);
        }
        Ok(())
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        let serial = self.serial_number()?;
        log::info!(target: NAME, "{NAME} serial number: {serial:#014x}");

        let result = self.self_test()?;
        if result != SELF_TEST_PASS {
            log::error!(target: NAME, "{NAME} failed its self test: {result:#06x}");
        }

        log::info!(target: NAME, "conditioning {NAME} for {:?}...", self.conditioning);
        self.execute_conditioning()?;
        thread::sleep(self.conditioning);
        // the first raw read ends conditioning
        self.measure_raw()?;
        Ok(())
    }

    fn poll(&mut self) -> anyhow::Result<()> {
        let (sraw_voc, sraw_nox) = self.measure_raw()?;
        let voc = self.voc.process(i32::from(sraw_voc));
        let nox = self.nox.process(i32::from(sraw_nox));
        log::debug!(
            target: NAME,
            "VOC index: {voc} (raw {sraw_voc}), NOx index: {nox} (raw {sraw_nox})"
        );
        self.sraw = Some((sraw_voc, sraw_nox));
        self.index = Some((voc, nox));
        Ok(())
    }

    fn calibrate(&mut self, temp_c: f32, humidity: f32) -> anyhow::Result<()> {
        self.compensation = Some((temp_c, humidity));
        Ok(())
    }

    fn publish_data(&self) -> PublishData {
        let (Some((voc, nox)), Some((sraw_voc, sraw_nox))) = (self.index, self.sraw) else {
            return Vec::new();
        };
        let (temp, humidity) = self.compensation.unzip();
        vec![(
            "sensors/sgp41",
            json!({
                "NOX": nox,
                "TVOC": voc,
                "sraw_voc": sraw_voc,
                "sraw_nox": sraw_nox,
                "temp": temp,
                "humidity": humidity,
            }),
        )]
    }
}
