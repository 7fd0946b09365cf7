//! TI HDC1080 temperature and humidity sensor.
//!
//! Like the AHT21, it is only used as a calibration source and publishes
//! nothing of its own.
use super::{BusError, PublishData, Sensor};
use embedded_hal::blocking::i2c;
use std::{fmt, thread, time::Duration};

pub const ADDRESS: u8 = 0x40;

const NAME: &str = "HDC1080";

const REG_TEMPERATURE: u8 = 0x00;
const REG_CONFIG: u8 = 0x02;
const REG_DEVICE_ID: u8 = 0xFF;

const DEVICE_ID: u16 = 0x1050;

/// Soft reset bit of the configuration register.
const CONFIG_RESET: u16 = 1 << 15;
/// Temperature and humidity are both acquired, in that order, on one trigger.
const CONFIG_SEQUENTIAL: u16 = 1 << 12;

const RESET_DELAY: Duration = Duration::from_millis(15);
const CONVERSION_DELAY: Duration = Duration::from_millis(30);

pub struct Hdc1080<I> {
    i2c: I,
    reading: Option<(f32, f32)>,
}

/// Decodes the temperature and humidity registers into degrees Celsius and
/// relative humidity.
pub fn decode(frame: &[u8; 4]) -> (f32, f32) {
    const SCALE: f32 = 65536.0;
    let raw_temp = u16::from_be_bytes([frame[0], frame[1]]);
    let raw_humidity = u16::from_be_bytes([frame[2], frame[3]]);
    let temp_c = f32::from(raw_temp) / SCALE * 165.0 - 40.0;
    let humidity = f32::from(raw_humidity) / SCALE * 100.0;
    (temp_c, humidity)
}

impl<I, E> Hdc1080<I>
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

    fn write_config(&mut self, config: u16) -> anyhow::Result<()> {
        let [hi, lo] = config.to_be_bytes();
        self.write(&[REG_CONFIG, hi, lo])
    }

    pub fn device_id(&mut self) -> anyhow::Result<u16> {
        self.write(&[REG_DEVICE_ID])?;
        let mut buf = [0u8; 2];
        self.read(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl<I, E> Sensor for Hdc1080<I>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: fmt::Debug,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        self.write_config(CONFIG_RESET)?;
        thread::sleep(RESET_DELAY);

        let id = self.device_id()?;
        anyhow::ensure!(id == DEVICE_ID, "{NAME}: unexpected device id {id:#06x}");

        // 14-bit resolution for both channels
        self.write_config(CONFIG_SEQUENTIAL)?;
        log::info!(target: NAME, "{NAME} found");
        Ok(())
    }

    fn poll(&mut self) -> anyhow::Result<()> {
        self.write(&[REG_TEMPERATURE])?;
        thread::sleep(CONVERSION_DELAY);

        let mut frame = [0u8; 4];
        self.read(&mut frame)?;
        let (temp_c, humidity) = decode(&frame);
        log::debug!(target: NAME, "{temp_c:.2}°C, {humidity:.2}% RH");
        self.reading = Some((temp_c, humidity));
        Ok(())
    }

    fn temp_humidity(&self) -> Option<(f32, f32)> {
        self.reading
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
        let (temp_c, humidity) = decode(&[0x80, 0x00, 0x40, 0x00]);
        assert!((temp_c - 42.5).abs() < 0.01, "{temp_c}");
        assert!((humidity - 25.0).abs() < 0.01, "{humidity}");
    }

    #[test]
    fn connect_checks_device_id() {
        let mut bus = ScriptedBus::default();
        bus.push_read(vec![0x10, 0x50]);
        let mut sensor = Hdc1080::new(bus);
        sensor.connect().unwrap();
        assert_eq!(
            sensor.i2c.writes,
            vec![vec![0x02, 0x80, 0x00], vec![0xFF], vec![0x02, 0x10, 0x00]]
        );

        let mut bus = ScriptedBus::default();
        bus.push_read(vec![0x12, 0x34]);
        let error = Hdc1080::new(bus).connect().unwrap_err();
        assert!(!error.is::<BusError>(), "{error:?}");
    }

    #[test]
    fn serves_as_calibration_source() {
        let mut bus = ScriptedBus::default();
        bus.push_read(vec![0x66, 0x66, 0x80, 0x00]);
        let mut sensor = Hdc1080::new(bus);
        assert_eq!(sensor.temp_humidity(), None);

        sensor.poll().unwrap();
        let (temp_c, humidity) = sensor.temp_humidity().unwrap();
        assert!((temp_c - 26.0).abs() < 0.01, "{temp_c}");
        assert!((humidity - 50.0).abs() < 0.01, "{humidity}");
        assert!(sensor.publish_data().is_empty());
    }
}
