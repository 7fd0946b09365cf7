//! Winsen ZH03B laser particulate matter sensor, on a UART in its
//! question-and-answer mode.
//!
//! Every frame is 9 bytes: a `0xFF` start byte, 7 payload bytes and a
//! checksum.
use super::{BusError, PublishData, Sensor};
use embedded_hal::serial;
use serde::Serialize;
use std::{
    fmt, thread,
    time::{Duration, Instant},
};

const NAME: &str = "ZH03B";

const FRAME_LEN: usize = 9;
const START: u8 = 0xFF;

const CMD_SET_MODE: u8 = 0x78;
const CMD_READ: u8 = 0x86;
const CMD_DORMANT: u8 = 0xA7;

const MODE_QA: u8 = 0x41;

const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
const READ_POLL: Duration = Duration::from_millis(5);
/// Upper bound on stale bytes discarded before a request.
const MAX_DRAIN: usize = 256;

/// Mass concentrations in ug/m^3.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Measurement {
    pub pm10: u16,
    pub pm25: u16,
    pub pm100: u16,
}

pub struct Zh03b<S> {
    port: S,
    timeout: Duration,
    last: Option<Measurement>,
}

/// Two's complement of the sum of the payload bytes.
pub fn checksum(frame: &[u8; FRAME_LEN]) -> u8 {
    let sum = frame[1..FRAME_LEN - 1]
        .iter()
        .fold(0u8, |sum, &byte| sum.wrapping_add(byte));
    (!sum).wrapping_add(1)
}

fn command(cmd: u8, arg: u8) -> [u8; FRAME_LEN] {
    let mut frame = [START, 0x01, cmd, arg, 0, 0, 0, 0, 0];
    frame[FRAME_LEN - 1] = checksum(&frame);
    frame
}

impl Measurement {
    /// Decodes the answer to a read request: PM2.5, PM10, then PM1.0.
    pub fn from_frame(frame: &[u8; FRAME_LEN]) -> Self {
        Self {
            pm25: u16::from_be_bytes([frame[2], frame[3]]),
            pm100: u16::from_be_bytes([frame[4], frame[5]]),
            pm10: u16::from_be_bytes([frame[6], frame[7]]),
        }
    }
}

impl<S, E> Zh03b<S>
where
    S: serial::Read<u8, Error = E> + serial::Write<u8, Error = E>,
    E: fmt::Debug,
{
    pub fn new(port: S) -> Self {
        Self {
            port,
            timeout: DEFAULT_TIMEOUT,
            last: None,
        }
    }

    /// How long to wait for a response.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    fn send(&mut self, frame: &[u8; FRAME_LEN]) -> anyhow::Result<()> {
        for &byte in frame {
            nb::block!(self.port.write(byte)).map_err(|error| BusError::new(NAME, error))?;
        }
        nb::block!(self.port.flush()).map_err(|error| BusError::new(NAME, error))?;
        Ok(())
    }

    fn read_byte(&mut self, deadline: Instant) -> anyhow::Result<u8> {
        loop {
            match self.port.read() {
                Ok(byte) => return Ok(byte),
                Err(nb::Error::WouldBlock) if Instant::now() < deadline => thread::sleep(READ_POLL),
                Err(nb::Error::WouldBlock) => {
                    return Err(BusError::new(NAME, "timed out waiting for a response").into())
                }
                Err(nb::Error::Other(error)) => return Err(BusError::new(NAME, error).into()),
            }
        }
    }

    /// Throws away whatever the sensor sent since the last request, such as
    /// frames it streamed before being switched to question-and-answer mode.
    fn drain(&mut self) {
        for _ in 0..MAX_DRAIN {
            if self.port.read().is_err() {
                return;
            }
        }
    }

    /// Reads the response to `cmd`, skipping anything before its start byte.
    fn response(&mut self, cmd: u8) -> anyhow::Result<[u8; FRAME_LEN]> {
        let deadline = Instant::now() + self.timeout;
        while self.read_byte(deadline)? != START {}

        let mut frame = [START; FRAME_LEN];
        for byte in &mut frame[1..] {
            *byte = self.read_byte(deadline)?;
        }

        let expected = checksum(&frame);
        let found = frame[FRAME_LEN - 1];
        if expected != found {
            return Err(BusError::new(
                NAME,
                format!("checksum mismatch (expected {expected:#04x}, found {found:#04x})"),
            )
            .into());
        }
        anyhow::ensure!(
            frame[1] == cmd,
            "{NAME}: expected a response to {cmd:#04x}, got {:#04x}",
            frame[1]
        );
        Ok(frame)
    }

    pub fn set_qa_mode(&mut self) -> anyhow::Result<()> {
        self.send(&command(CMD_SET_MODE, MODE_QA))
    }

    /// Turns the fan and laser off (`true`) or back on (`false`).
    pub fn set_dormant(&mut self, dormant: bool) -> anyhow::Result<()> {
        self.drain();
        self.send(&command(CMD_DORMANT, u8::from(dormant)))?;
        let frame = self.response(CMD_DORMANT)?;
        anyhow::ensure!(
            frame[2] == 0x01,
            "{NAME} refused to {} (status {:#04x})",
            if dormant { "sleep" } else { "wake up" },
            frame[2]
        );
        Ok(())
    }

    pub fn read_sample(&mut self) -> anyhow::Result<Measurement> {
        self.drain();
        self.send(&command(CMD_READ, 0))?;
        let frame = self.response(CMD_READ)?;
        Ok(Measurement::from_frame(&frame))
    }
}

impl<S, E> Sensor for Zh03b<S>
where
    S: serial::Read<u8, Error = E> + serial::Write<u8, Error = E>,
    E: fmt::Debug,
{
    fn name(&self) -> &'static str {
        NAME
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        self.set_dormant(false)?;
        self.set_qa_mode()?;
        log::info!(target: NAME, "{NAME} running in question-and-answer mode");
        Ok(())
    }

    fn poll(&mut self) -> anyhow::Result<()> {
        let measurement = self.read_sample()?;
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
        self.last
            .and_then(|measurement| serde_json::to_value(measurement).ok())
            .map(|data| vec![("sensors/zh03b", data)])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSerial;
    use serde_json::json;

    fn answer(cmd: u8, payload: [u8; 6]) -> Vec<u8> {
        let mut frame = [START, cmd, 0, 0, 0, 0, 0, 0, 0];
        frame[2..8].copy_from_slice(&payload);
        frame[8] = checksum(&frame);
        frame.to_vec()
    }

    #[test]
    fn command_checksums() {
        assert_eq!(command(CMD_READ, 0)[8], 0x79);
        assert_eq!(command(CMD_SET_MODE, MODE_QA)[8], 0x46);
        assert_eq!(command(CMD_DORMANT, 0)[8], 0x58);
        assert_eq!(command(CMD_DORMANT, 1)[8], 0x57);
    }

    #[test]
    fn connect_wakes_and_switches_to_qa() {
        let mut port = ScriptedSerial::default();
        port.respond(answer(CMD_DORMANT, [0x01, 0, 0, 0, 0, 0]));
        let mut sensor = Zh03b::new(port).with_timeout(Duration::ZERO);
        sensor.connect().unwrap();

        let mut expected = command(CMD_DORMANT, 0).to_vec();
        expected.extend_from_slice(&command(CMD_SET_MODE, MODE_QA));
        assert_eq!(sensor.port.tx, expected);
    }

    #[test]
    fn reads_sample_after_stale_bytes() {
        let mut port = ScriptedSerial::default();
        // the tail of a frame streamed before switching modes
        port.rx.extend([0x42, 0x4D, 0xFF, 0x14]);
        port.respond(answer(CMD_READ, [0x00, 0x0C, 0x00, 0x11, 0x00, 0x08]));
        let mut sensor = Zh03b::new(port).with_timeout(Duration::ZERO);
        assert!(sensor.publish_data().is_empty());

        sensor.poll().unwrap();
        assert_eq!(sensor.port.tx, command(CMD_READ, 0).to_vec());
        assert_eq!(
            sensor.publish_data(),
            vec![("sensors/zh03b", json!({ "pm10": 8, "pm25": 12, "pm100": 17 }))]
        );
    }

    #[test]
    fn corrupt_or_missing_answers_are_bus_errors() {
        let mut port = ScriptedSerial::default();
        let mut frame = answer(CMD_READ, [0x00, 0x0C, 0x00, 0x11, 0x00, 0x08]);
        frame[8] ^= 0xFF;
        port.respond(frame);
        let mut sensor = Zh03b::new(port).with_timeout(Duration::ZERO);
        let error = sensor.poll().unwrap_err();
        assert!(error.is::<BusError>(), "{error:?}");

        // nothing answers at all
        let error = sensor.poll().unwrap_err();
        assert!(error.is::<BusError>(), "{error:?}");
        assert!(sensor.publish_data().is_empty());
    }

    #[test]
    fn refused_wakeup_is_a_fault() {
        let mut port = ScriptedSerial::default();
        port.respond(answer(CMD_DORMANT, [0x00, 0, 0, 0, 0, 0]));
        let error = Zh03b::new(port)
            .with_timeout(Duration::ZERO)
            .connect()
            .unwrap_err();
        assert!(!error.is::<BusError>(), "{error:?}");
    }
}
