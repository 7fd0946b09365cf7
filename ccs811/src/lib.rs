//! A blocking driver for the AMS CCS811 gas sensor.
//!
//! The device powers up in boot mode and has to be explicitly started into its
//! application firmware before it produces any data; see
//! [`Ccs811::reboot_to_mode`]. Once running, [`Ccs811::read_data`] returns
//! `Ok(None)` while no new sample is available, and an [`Error::Device`] when
//! the device flags a fault for the current sample.
//!
//! Datasheet:
//! <https://cdn.sparkfun.com/assets/2/c/c/6/5/CN04-2019_attachment_CCS811_Datasheet_v1-06.pdf>
use core::fmt;
use embedded_hal::blocking::{delay::DelayMs, i2c};

pub mod register;
use self::register::{Device, Field, Register};

#[cfg(test)]
mod fake;

/// I2C address with the ADDR pin pulled low.
pub const DEFAULT_ADDRESS: u8 = 0x5A;
/// I2C address with the ADDR pin pulled high.
pub const ALTERNATE_ADDRESS: u8 = 0x5B;

/// Value of the `HW_ID` register on every genuine CCS811.
pub const HW_ID_CODE: u8 = 0x81;

/// Largest eCO2 value the firmware reports without setting its overflow bit.
pub const MAX_ECO2: u16 = 29_206;
/// Largest TVOC value the firmware reports without wrapping.
pub const MAX_TVOC: u16 = 32_768;

const APP_START: u8 = 0xF4;
const SW_RESET: [u8; 5] = [0xFF, 0x11, 0xE5, 0x72, 0x8A];
const ENV_DATA: u8 = 0x05;

const RESET_SETTLE_MS: u16 = 12;
const APP_START_SETTLE_MS: u16 = 150;
const RESULT_SETTLE_MS: u16 = 20;

// STATUS register bits
const STATUS_ERROR: Field = Field::bit(0).read_only();
const STATUS_DATA_READY: Field = Field::bit(3).read_only();
const STATUS_APP_VALID: Field = Field::bit(4).read_only();
const STATUS_FW_MODE: Field = Field::bit(7).read_only();

// MEAS_MODE register bits
const MEAS_INTERRUPT: Field = Field::bit(3);
const MEAS_DRIVE_MODE: Field = Field::bits(3, 4);

pub struct Ccs811<I, D> {
    dev: Device<I, D>,
    status: Register<1>,
    meas_mode: Register<1>,
    result: Register<8>,
    baseline: Register<2>,
    hw_id: Register<1>,
    hw_version: Register<1>,
    fw_boot_version: Register<2>,
    fw_app_version: Register<2>,
    error_id: Register<1>,
}

/// Sampling cadence of the sensor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum DriveMode {
    Idle = 0,
    EverySecond = 1,
    Every10Seconds = 2,
    Every60Seconds = 3,
    Every250Millis = 4,
}

/// One decoded `ALG_RESULT_DATA` frame.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Reading {
    /// Equivalent CO2, in ppm, after overflow correction.
    pub eco2: u16,
    /// Total VOC, in ppb, after overflow correction.
    pub tvoc: u16,
    /// eCO2 exactly as it came off the wire.
    pub eco2_orig: u16,
    /// TVOC exactly as it came off the wire.
    pub tvoc_orig: u16,
    pub status: Status,
    pub error_id: ErrorId,
    /// Sensor current, in uA.
    pub raw_current: u8,
    /// Voltage across the sensor, in volts.
    pub raw_voltage: f32,
    /// Set if either value had to be corrected for the firmware's overflow
    /// encoding.
    pub overflow: bool,
}

/// The `STATUS` register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Status(pub u8);

/// The `ERROR_ID` register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ErrorId(pub u8);

/// A sample the device itself flagged as invalid.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Fault {
    pub reading: Reading,
    /// The error register, as read back (and cleared) after the fault.
    pub error_code: ErrorId,
}

#[derive(Debug, PartialEq)]
pub enum Error<E> {
    I2c(E),
    ReadOnly,
    WrongHardwareId { found: u8 },
    NotInAppMode,
    DriveModeMismatch { expected: DriveMode, found: u8 },
    Device(Fault),
}

impl<I, D, E> Ccs811<I, D>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    D: DelayMs<u16>,
{
    /// Wraps the bus without talking to the device.
    pub fn new(i2c: I, address: u8, delay: D) -> Self {
        Self {
            dev: Device::new(i2c, address, delay),
            status: Register::new(0x00),
            meas_mode: Register::new(0x01),
            result: Register::new(0x02).with_settle_ms(RESULT_SETTLE_MS),
            baseline: Register::new(0x11).with_settle_ms(RESULT_SETTLE_MS),
            hw_id: Register::new(0x20),
            hw_version: Register::new(0x21),
            fw_boot_version: Register::new(0x23),
            fw_app_version: Register::new(0x24),
            error_id: Register::new(0xE0),
        }
    }

    pub fn release(self) -> I {
        self.dev.release()
    }

    /// Software reset. The device comes back in boot mode.
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        self.dev.write(&SW_RESET).map_err(Error::I2c)
    }

    /// Reset the device, start its application firmware and configure the
    /// given drive mode with interrupts disabled.
    pub fn reboot_to_mode(&mut self, mode: DriveMode) -> Result<(), Error<E>> {
        self.reset()?;
        self.dev.settle(RESET_SETTLE_MS);

        let found = self.hardware_id()?;
        if found != HW_ID_CODE {
            return Err(Error::WrongHardwareId { found });
        }

        let hw = self.hw_version.read(&mut self.dev).map_err(Error::I2c)?[0];
        let boot = *self.fw_boot_version.read(&mut self.dev).map_err(Error::I2c)?;
        let app = *self.fw_app_version.read(&mut self.dev).map_err(Error::I2c)?;
        log::info!(
            target: "ccs811",
            "hw version: {hw:#04x}, boot fw: {:x}.{:x}, app fw: {:x}.{:x}",
            boot[0], boot[1], app[0], app[1],
        );

        self.dev.write(&[APP_START]).map_err(Error::I2c)?;
        self.dev.settle(APP_START_SETTLE_MS);

        if self.error()? {
            // reading the error register clears the flag
            let code = self.error_code()?;
            log::warn!(target: "ccs811", "error after app start: {:#04x} [{code}]", code.0);
        }

        if !self.fw_mode()? {
            return Err(Error::NotInAppMode);
        }

        MEAS_INTERRUPT.set(&mut self.meas_mode, &mut self.dev, 0)?;
        MEAS_DRIVE_MODE.set(&mut self.meas_mode, &mut self.dev, mode as i64)?;

        let found = self.drive_mode()?;
        if found != mode as u8 {
            return Err(Error::DriveModeMismatch {
                expected: mode,
                found,
            });
        }

        if self.error()? {
            let code = self.error_code()?;
            log::warn!(target: "ccs811", "error after setting drive mode: {:#04x} [{code}]", code.0);
        }

        log::info!(target: "ccs811", "started in drive mode {mode:?}");
        Ok(())
    }

    /// Reads the next sample, if one is ready.
    pub fn read_data(&mut self) -> Result<Option<Reading>, Error<E>> {
        if !(self.data_ready()? && self.app_valid()?) {
            return Ok(None);
        }

        let frame = *self.result.read(&mut self.dev).map_err(Error::I2c)?;
        let reading = Reading::decode(&frame);
        if reading.is_fault() {
            let error_code = self.error_code()?;
            return Err(Error::Device(Fault {
                reading,
                error_code,
            }));
        }

        // the error bit may have been raised after the frame was latched
        if self.error()? {
            let error_code = self.error_code()?;
            return Err(Error::Device(Fault {
                reading,
                error_code,
            }));
        }

        Ok(Some(reading))
    }

    /// Compensate the algorithm for ambient conditions.
    pub fn set_environmental_data(&mut self, humidity: f32, temp_c: f32) -> Result<(), Error<E>> {
        // both are unsigned 1/512ths; temperature is offset by 25 degrees
        let humidity = ((humidity * 512.0) as u16).to_be_bytes();
        let temp = (((temp_c + 25.0) * 512.0) as u16).to_be_bytes();
        self.dev
            .write(&[ENV_DATA, humidity[0], humidity[1], temp[0], temp[1]])
            .map_err(Error::I2c)
    }

    /// The opaque baseline value the algorithm is currently using.
    pub fn baseline(&mut self) -> Result<u16, Error<E>> {
        let buf = self.baseline.read(&mut self.dev).map_err(Error::I2c)?;
        Ok(u16::from_le_bytes(*buf))
    }

    pub fn set_baseline(&mut self, baseline: u16) -> Result<(), Error<E>> {
        self.baseline
            .write(&mut self.dev, &baseline.to_le_bytes())
            .map_err(Error::I2c)
    }

    pub fn hardware_id(&mut self) -> Result<u8, Error<E>> {
        Ok(self.hw_id.read(&mut self.dev).map_err(Error::I2c)?[0])
    }

    /// Reads (and thereby clears) the error register.
    pub fn error_code(&mut self) -> Result<ErrorId, Error<E>> {
        Ok(ErrorId(self.error_id.read(&mut self.dev).map_err(Error::I2c)?[0]))
    }

    pub fn error(&mut self) -> Result<bool, Error<E>> {
        STATUS_ERROR.is_set(&mut self.status, &mut self.dev)
    }

    pub fn data_ready(&mut self) -> Result<bool, Error<E>> {
        STATUS_DATA_READY.is_set(&mut self.status, &mut self.dev)
    }

    pub fn app_valid(&mut self) -> Result<bool, Error<E>> {
        STATUS_APP_VALID.is_set(&mut self.status, &mut self.dev)
    }

    /// Whether the device is running its application firmware.
    pub fn fw_mode(&mut self) -> Result<bool, Error<E>> {
        STATUS_FW_MODE.is_set(&mut self.status, &mut self.dev)
    }

    pub fn drive_mode(&mut self) -> Result<u8, Error<E>> {
        Ok(MEAS_DRIVE_MODE.get(&mut self.meas_mode, &mut self.dev)? as u8)
    }
}

// === impl Reading ===

impl Reading {
    /// Decode a raw result frame. Status and error id are decoded before the
    /// measurement bytes, which are meaningless if the device reports a fault.
    pub fn decode(frame: &[u8; 8]) -> Self {
        let status = Status(frame[4]);
        let error_id = ErrorId(frame[5]);

        let eco2_orig = u16::from_be_bytes([frame[0], frame[1]]);
        let tvoc_orig = u16::from_be_bytes([frame[2], frame[3]]);
        let raw_current = (frame[6] & !0x3) >> 2;
        let raw_adc = (u16::from(frame[6] & 0x3) << 8) | u16::from(frame[7]);
        let raw_voltage = (1.65 / 1023.0) * raw_adc as f32;

        let mut overflow = false;
        let mut eco2 = eco2_orig;
        if eco2 > MAX_ECO2 {
            eco2 &= !0x8000;
            overflow = true;
        }
        let mut tvoc = tvoc_orig;
        if tvoc > MAX_TVOC {
            tvoc -= MAX_TVOC;
            overflow = true;
        }

        Self {
            eco2,
            tvoc,
            eco2_orig,
            tvoc_orig,
            status,
            error_id,
            raw_current,
            raw_voltage,
            overflow,
        }
    }

    /// Whether the device flagged this sample as invalid.
    pub fn is_fault(&self) -> bool {
        self.error_id.0 & 0x3F != 0 || self.status.has_error()
    }
}

// === impl Status ===

impl Status {
    pub fn has_error(&self) -> bool {
        self.0 & 0x01 != 0
    }

    pub fn data_ready(&self) -> bool {
        self.0 & 0x08 != 0
    }

    pub fn app_valid(&self) -> bool {
        self.0 & 0x10 != 0
    }

    pub fn fw_mode(&self) -> bool {
        self.0 & 0x80 != 0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_error() {
            f.write_str("Er ")?;
        }
        if self.data_ready() {
            f.write_str("Dr ")?;
        }
        f.write_str(if self.app_valid() { "F+ " } else { "F- " })?;
        f.write_str(if self.fw_mode() { "R+" } else { "R-" })
    }
}

// === impl ErrorId ===

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 6] = ["Wi", "Ri", "Mi", "Mr", "Hf", "Hs"];
        let mut first = true;
        for (bit, name) in NAMES.iter().enumerate() {
            if self.0 & (1 << bit) != 0 {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

// === impl Error ===

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I2c(error) => write!(f, "I2C error: {error:?}"),
            Self::ReadOnly => f.write_str("attempted to write a read-only field"),
            Self::WrongHardwareId { found } => write!(
                f,
                "hardware id {found:#04x} is not {HW_ID_CODE:#04x}; check the wiring"
            ),
            Self::NotInAppMode => f.write_str("device did not leave boot mode"),
            Self::DriveModeMismatch { expected, found } => {
                write!(f, "drive mode reads back as {found}, expected {expected:?}")
            }
            Self::Device(Fault {
                reading,
                error_code,
            }) => write!(
                f,
                "device fault: err_id {:#04x}={:#04x}; err: [{}], st: [{}]",
                reading.error_id.0, error_code.0, reading.error_id, reading.status,
            ),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for Error<E> {}
