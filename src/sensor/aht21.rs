//! ASAIR AHT21 (and the older AHT10/AHT20) temperature and humidity sensor.
//!
//! The hub does not publish its readings; it is only used as the temperature
//! and humidity source that every other sensor is compensated with.
use super::{BusError, PublishData, Sensor};
use embedded_hal::blocking::i2c;
use std::{fmt, thread, time::Duration};

pub const ADDRESS: u8 = 0x38;

const NAME: &str = "AHT21";

const CMD_RESET: [u8; 1] = [0xBA];
const CMD_CALIBRATE: [u8; 3] = [0xE1, 0x08, 0x00];
const CMD_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];

const STATUS_BUSY: u8 = 0x80;
const STATUS_CALIBRATED: u8 = 0x08;

const RESET_DELAY: Duration = Duration::from_millis(20);
const CALIBRATION_POLL: Duration = Duration::from_millis(50);
const CALIBRATION_POLLS: usize = 50;
const MEASUREMENT_POLL: Duration = Duration::from_millis(12);
const MEASUREMENT_POLLS: usize = 10;

pub struct Aht21<I> {
    i2c: I,
    reading: Option<(f32, f32)>,
}

/// Decodes a measurement frame (status byte followed by 20 bits of humidity
/// and 20 bits of temperature) into degrees Celsius and relative humidity.
pub fn decode(frame: &[u8; 6]) -> (f32, f32) {
    const SCALE: f32 = (1 << 20) as f32;

    let raw_humidity =
        (u32::from(frame[1]) << 12) | (u32::from(frame[2]) << 4) | (u32::from(frame[3]) >> 4);
    let raw_temp =
        (u32::from(frame[3] & 0x0F) << 16) | (u32::from(frame[4]) << 8) | u32::from(frame[5]);

    let humidity = raw_humidity as f32 * 100.0 / SCALE;
    let temp_c = raw_temp as f32 * 200.0 / SCALE - 50.0;
    (temp_c, humidity)
}

impl<I, E> Aht21<I>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: fmt::Debug,
{
    pub fn new(i2c: I) -> Self {
        Self { i2c, reading: None }
    }

    fn write(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.i2c
            .write(ADDRESS, bytes)
            .map_err(|error| BusError::new(NAME, error))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> anyhow::Result<()> {
        self.i2c
            .read(ADDRESS, buf)
            .map_err(|error| BusError::new(NAME, error))?;
        Ok(())
    }

    fn status(&mut self) -> anyhow::Result<u8> {
        let mut buf = [0u8; 1];
        self.read(&mut buf)?;
        Ok(buf[0])
    }
}

impl<I, E> Sensor for Aht21<I>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: fmt::Debug,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        self.write(&CMD_RESET)?;
        thread::sleep(RESET_DELAY);

        self.write(&CMD_CALIBRATE)?;
        let mut status = self.status()?;
        for _ in 0..CALIBRATION_POLLS {
            if status & STATUS_BUSY == 0 {
                break;
            }
            thread::sleep(CALIBRATION_POLL);
            status = self.status()?;
        }

        anyhow::ensure!(status & STATUS_BUSY == 0, "{NAME} stayed busy during calibration");
        anyhow::ensure!(
            status & STATUS_CALIBRATED != 0,
            "{NAME} did not calibrate (status {status:#04x})"
        );
        log::info!(target: NAME, "{NAME} calibrated (status {status:#04x})");
        Ok(())
    }

    fn poll(&mut self) -> anyhow::Result<()> {
        self.write(&CMD_TRIGGER)?;

        let mut frame = [0u8; 6];
        for _ in 0..MEASUREMENT_POLLS {
            thread::sleep(MEASUREMENT_POLL);
            self.read(&mut frame)?;
            if frame[0] & STATUS_BUSY == 0 {
                let (temp_c, humidity) = decode(&frame);
                log::debug!(target: NAME, "{temp_c:.2}°C, {humidity:.2}% RH");
                self.reading = Some((temp_c, humidity));
                return Ok(());
            }
        }

        anyhow::bail!("{NAME} measurement did not complete")
    }

    fn temp_humidity(&self) -> Option<(f32, f32)> {
        self.reading
    }

    fn calibration_priority(&self) -> u8 {
        1
    }

    fn publish_data(&self) -> PublishData {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBus;

    #[test]
    fn decodes_frame() {
        // 0x80000 humidity ticks is exactly half scale
        let (temp_c, humidity) = decode(&[0x1C, 0x80, 0x00, 0x05, 0x99, 0x9A]);
        assert!((humidity - 50.0).abs() < 0.01, "{humidity}");
        assert!((temp_c - 20.0).abs() < 0.01, "{temp_c}");

        let (temp_c, humidity) = decode(&[0x1C, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(humidity, 0.0);
        assert_eq!(temp_c, -50.0);
    }

    #[test]
    fn connect_calibrates() {
        let mut bus = ScriptedBus::default();
        bus.push_read(vec![STATUS_BUSY | STATUS_CALIBRATED]);
        bus.push_read(vec![STATUS_CALIBRATED | 0x10]);
        let mut sensor = Aht21::new(bus);
        sensor.connect().unwrap();
        assert_eq!(
            sensor.i2c.writes,
            vec![CMD_RESET.to_vec(), CMD_CALIBRATE.to_vec()]
        );
    }

    #[test]
    fn connect_requires_calibration_bit() {
        let mut bus = ScriptedBus::default();
        bus.push_read(vec![0x10]);
        let mut sensor = Aht21::new(bus);
        let error = sensor.connect().unwrap_err();
        assert!(!error.is::<BusError>(), "{error:?}");
    }

    #[test]
    fn poll_waits_while_busy() {
        let mut bus = ScriptedBus::default();
        bus.push_read(vec![STATUS_BUSY, 0, 0, 0, 0, 0]);
        bus.push_read(vec![0x1C, 0x80, 0x00, 0x05, 0x99, 0x9A]);
        let mut sensor = Aht21::new(bus);
        assert_eq!(sensor.temp_humidity(), None);

        sensor.poll().unwrap();
        let (temp_c, humidity) = sensor.temp_humidity().unwrap();
        assert!((temp_c - 20.0).abs() < 0.01);
        assert!((humidity - 50.0).abs() < 0.01);
        assert!(sensor.publish_data().is_empty());
    }

    #[test]
    fn bus_errors_are_tagged() {
        let bus = ScriptedBus {
            fail: true,
            ..Default::default()
        };
        let mut sensor = Aht21::new(bus);
        assert!(sensor.poll().unwrap_err().is::<BusError>());
    }
}
