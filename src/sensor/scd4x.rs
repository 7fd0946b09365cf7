//! Sensirion SCD40/SCD41 photoacoustic CO2 sensor.
use super::{PublishData, Sensor};
use crate::{sensirion::Sensirion, units};
use embedded_hal::blocking::i2c;
use serde_json::json;
use std::fmt;

pub const ADDRESS: u8 = 0x62;

const NAME: &str = "SCD4x";

/// Published on its own interval, apart from the other readings.
pub const PUBLISH_GROUP: &str = "co2";

const CMD_START_PERIODIC: u16 = 0x21B1;
const CMD_STOP_PERIODIC: u16 = 0x3F86;
const CMD_DATA_READY: u16 = 0xE4B8;
const CMD_READ_MEASUREMENT: u16 = 0xEC05;
const CMD_SERIAL_NUMBER: u16 = 0x3682;

const STOP_DELAY_MS: u64 = 500;
const COMMAND_DELAY_MS: u64 = 1;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Measurement {
    pub co2_ppm: u16,
    pub temp_c: f32,
    pub humidity: f32,
}

pub struct Scd4x<I> {
    dev: Sensirion<I>,
    last: Option<Measurement>,
}

impl Measurement {
    pub fn from_words([co2_ppm, temp, humidity]: [u16; 3]) -> Self {
        Self {
            co2_ppm,
            temp_c: units::ticks_to_celsius(temp),
            humidity: units::ticks_to_humidity(humidity),
        }
    }
}

impl<I, E> Scd4x<I>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: fmt::Debug,
{
    pub fn new(i2c: I) -> Self {
        Self {
            dev: Sensirion::new(i2c, ADDRESS, NAME),
            last: None,
        }
    }

    pub fn serial_number(&mut self) -> anyhow::Result<u64> {
        let words: [u16; 3] = self.dev.read_words(CMD_SERIAL_NUMBER, &[], COMMAND_DELAY_MS)?;
        Ok(words
            .iter()
            .fold(0u64, |serial, &word| (serial << 16) | u64::from(word)))
    }

    pub fn data_ready(&mut self) -> anyhow::Result<bool> {
        let [status] = self.dev.read_words::<1>(CMD_DATA_READY, &[], COMMAND_DELAY_MS)?;
        Ok(status & 0x07FF != 0)
    }
}

impl<I, E> Sensor for Scd4x<I>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: fmt::Debug,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        // a previous run may have left it measuring, and it ignores most
        // commands in that state
        self.dev.command(CMD_STOP_PERIODIC, &[], STOP_DELAY_MS)?;
        let serial = self.serial_number()?;
        log::info!(target: NAME, "{NAME} serial number: {serial:#014x}");
        self.dev.command(CMD_START_PERIODIC, &[], 0)
    }

    fn poll(&mut self) -> anyhow::Result<()> {
        if !self.data_ready()? {
            return Ok(());
        }

        let words = self.dev.read_words(CMD_READ_MEASUREMENT, &[], COMMAND_DELAY_MS)?;
        let measurement = Measurement::from_words(words);
        log::debug!(
            target: NAME,
            "CO2: {} ppm, {:.2}°C, {:.2}% RH",
            measurement.co2_ppm,
            measurement.temp_c,
            measurement.humidity,
        );
        self.last = Some(measurement);
        Ok(())
    }

    fn temp_humidity(&self) -> Option<(f32, f32)> {
        self.last.map(|m| (m.temp_c, m.humidity))
    }

    // preferred over the dedicated temperature/humidity sensors
    fn calibration_priority(&self) -> u8 {
        2
    }

    fn publish_group(&self) -> &'static str {
        PUBLISH_GROUP
    }

    fn publish_data(&self) -> PublishData {
        match self.last {
            // the first sample after start-up reads zero
            Some(m) if m.co2_ppm > 0 => vec![(
                "sensors/scd40",
                json!({ "eCO2": m.co2_ppm, "temp": m.temp_c, "humidity": m.humidity }),
            )],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBus;

    #[test]
    fn decodes_measurement() {
        let m = Measurement::from_words([812, 0x6666, 0x8000]);
        assert_eq!(m.co2_ppm, 812);
        assert!((m.temp_c - 25.0).abs() < 0.01, "{}", m.temp_c);
        assert!((m.humidity - 50.0).abs() < 0.01, "{}", m.humidity);
    }

    #[test]
    fn waits_for_data_ready() {
        let mut bus = ScriptedBus::default();
        bus.push_words(&[0x8000]);
        let mut sensor = Scd4x::new(bus);
        sensor.poll().unwrap();
        assert!(sensor.publish_data().is_empty());
        assert_eq!(sensor.temp_humidity(), None);
        assert_eq!(sensor.dev_writes(), vec![vec![0xE4, 0xB8]]);
    }

    #[test]
    fn publishes_nonzero_co2_only() {
        let mut bus = ScriptedBus::default();
        bus.push_words(&[0x0006]);
        bus.push_words(&[0, 0x6666, 0x8000]);
        bus.push_words(&[0x0006]);
        bus.push_words(&[640, 0x6666, 0x8000]);
        let mut sensor = Scd4x::new(bus);

        sensor.poll().unwrap();
        assert!(sensor.publish_data().is_empty());
        // still a usable calibration source
        let (temp_c, humidity) = sensor.temp_humidity().unwrap();
        assert!((temp_c - 25.0).abs() < 0.01, "{temp_c}");
        assert!((humidity - 50.0).abs() < 0.01, "{humidity}");

        sensor.poll().unwrap();
        let data = sensor.publish_data();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].0, "sensors/scd40");
        assert_eq!(data[0].1["eCO2"], json!(640));
        assert_eq!(sensor.publish_group(), PUBLISH_GROUP);
    }

    #[test]
    fn connect_restarts_periodic_measurement() {
        let mut bus = ScriptedBus::default();
        bus.push_words(&[0x1234, 0x5678, 0x9ABC]);
        let mut sensor = Scd4x::new(bus);
        sensor.connect().unwrap();
        assert_eq!(
            sensor.dev_writes(),
            vec![vec![0x3F, 0x86], vec![0x36, 0x82], vec![0x21, 0xB1]]
        );
    }

    impl Scd4x<ScriptedBus> {
        fn dev_writes(&self) -> Vec<Vec<u8>> {
            self.dev.i2c().writes.clone()
        }
    }
}
