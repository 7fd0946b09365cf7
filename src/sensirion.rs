//! Command framing shared by Sensirion's I2C sensors (SGP41, SCD4x, SPS30):
//! 16-bit big-endian commands and data words, each word followed by a CRC-8.
use crate::sensor::BusError;
use embedded_hal::blocking::i2c;
use std::{fmt, thread, time::Duration};

const CRC8_POLYNOMIAL: u8 = 0x31;
const CRC8_INIT: u8 = 0xFF;

const MAX_ARGS: usize = 4;
const MAX_WORDS: usize = 16;

/// CRC-8 as used by every Sensirion sensor: polynomial 0x31, init 0xFF, no
/// final XOR.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = CRC8_INIT;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC8_POLYNOMIAL
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// A Sensirion device at a fixed address.
#[derive(Debug)]
pub struct Sensirion<I> {
    i2c: I,
    address: u8,
    name: &'static str,
}

impl<I> Sensirion<I> {
    #[cfg(test)]
    pub(crate) fn i2c(&self) -> &I {
        &self.i2c
    }
}

impl<I, E> Sensirion<I>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: fmt::Debug,
{
    pub fn new(i2c: I, address: u8, name: &'static str) -> Self {
        Self { i2c, address, name }
    }

    /// Sends a command with optional argument words, then waits `delay_ms`
    /// for the device to execute it.
    pub fn command(&mut self, command: u16, args: &[u16], delay_ms: u64) -> anyhow::Result<()> {
        anyhow::ensure!(
            args.len() <= MAX_ARGS,
            "{}: too many arguments for command {command:#06x}",
            self.name
        );

        let mut frame = [0u8; 2 + 3 * MAX_ARGS];
        frame[..2].copy_from_slice(&command.to_be_bytes());
        let mut len = 2;
        for arg in args {
            let bytes = arg.to_be_bytes();
            frame[len..len + 2].copy_from_slice(&bytes);
            frame[len + 2] = crc8(&bytes);
            len += 3;
        }

        self.i2c
            .write(self.address, &frame[..len])
            .map_err(|error| BusError::new(self.name, error))?;
        if delay_ms > 0 {
            thread::sleep(Duration::from_millis(delay_ms));
        }
        Ok(())
    }

    /// Sends a command and reads back `N` CRC-checked words.
    pub fn read_words<const N: usize>(
        &mut self,
        command: u16,
        args: &[u16],
        delay_ms: u64,
    ) -> anyhow::Result<[u16; N]> {
        anyhow::ensure!(N <= MAX_WORDS, "{}: cannot read {N} words at once", self.name);
        self.command(command, args, delay_ms)?;

        let mut buf = [0u8; 3 * MAX_WORDS];
        let buf = &mut buf[..3 * N];
        self.i2c
            .read(self.address, buf)
            .map_err(|error| BusError::new(self.name, error))?;

        let mut words = [0u16; N];
        for (word, chunk) in words.iter_mut().zip(buf.chunks_exact(3)) {
            let expected = crc8(&chunk[..2]);
            if chunk[2] != expected {
                return Err(BusError::crc(self.name, expected, chunk[2]).into());
            }
            *word = u16::from_be_bytes([chunk[0], chunk[1]]);
        }
        Ok(words)
    }
}
