//! Register-level access for I2C devices that have no persistent read cursor.
//!
//! Every read re-issues the register address, waits for the device to settle,
//! and only then clocks the response bytes out. Bus errors are returned to the
//! caller as-is; nothing in this module retries.
use crate::Error;
use embedded_hal::blocking::{delay::DelayMs, i2c};

/// Widest register this module can address, in bytes.
pub const MAX_WIDTH: usize = 8;

/// Delay between the address write and the data read, unless a register
/// overrides it.
pub const DEFAULT_SETTLE_MS: u16 = 12;

/// A device on the bus: the bus handle, its address, and a delay source for
/// the mandatory settle waits.
#[derive(Debug)]
pub struct Device<I, D> {
    i2c: I,
    address: u8,
    delay: D,
}

/// A single addressable register of `W` bytes, with its own read buffer.
#[derive(Debug)]
pub struct Register<const W: usize> {
    address: u8,
    settle_ms: u16,
    buf: [u8; W],
}

/// A bit or bit range within a register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Field {
    lowest: u8,
    count: u8,
    lsb_first: bool,
    signed: bool,
    read_only: bool,
}

// === impl Device ===

impl<I, D> Device<I, D> {
    pub const fn new(i2c: I, address: u8, delay: D) -> Self {
        Self {
            i2c,
            address,
            delay,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn release(self) -> I {
        self.i2c
    }
}

impl<I, D, E> Device<I, D>
where
    I: i2c::Write<Error = E> + i2c::Read<Error = E>,
    D: DelayMs<u16>,
{
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), E> {
        self.i2c.write(self.address, bytes)
    }

    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<(), E> {
        self.i2c.read(self.address, buf)
    }

    pub fn settle(&mut self, ms: u16) {
        self.delay.delay_ms(ms);
    }
}

// === impl Register ===

impl<const W: usize> Register<W> {
    pub const fn new(address: u8) -> Self {
        assert!(W >= 1 && W <= MAX_WIDTH, "register width must be 1..=MAX_WIDTH");
        Self {
            address,
            settle_ms: DEFAULT_SETTLE_MS,
            buf: [0; W],
        }
    }

    pub const fn with_settle_ms(self, settle_ms: u16) -> Self {
        Self { settle_ms, ..self }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// The bytes returned by the most recent read (or written by the most
    /// recent write).
    pub fn last(&self) -> &[u8; W] {
        &self.buf
    }

    pub fn read<I, D, E>(&mut self, dev: &mut Device<I, D>) -> Result<&[u8; W], E>
    where
        I: i2c::Write<Error = E> + i2c::Read<Error = E>,
        D: DelayMs<u16>,
    {
        dev.write(&[self.address])?;
        dev.settle(self.settle_ms);
        dev.read_into(&mut self.buf)?;
        Ok(&self.buf)
    }

    pub fn write<I, D, E>(&mut self, dev: &mut Device<I, D>, payload: &[u8; W]) -> Result<(), E>
    where
        I: i2c::Write<Error = E> + i2c::Read<Error = E>,
        D: DelayMs<u16>,
    {
        let mut frame = [0u8; MAX_WIDTH + 1];
        frame[0] = self.address;
        frame[1..=W].copy_from_slice(payload);
        dev.write(&frame[..=W])?;
        self.buf = *payload;
        Ok(())
    }
}

// === impl Field ===

impl Field {
    pub const fn bit(bit: u8) -> Self {
        Self::bits(1, bit)
    }

    pub const fn bits(count: u8, lowest: u8) -> Self {
        assert!(count >= 1 && (count as usize + lowest as usize) <= 64);
        Self {
            lowest,
            count,
            lsb_first: true,
            signed: false,
            read_only: false,
        }
    }

    pub const fn read_only(self) -> Self {
        Self {
            read_only: true,
            ..self
        }
    }

    /// Interpret the field as a two's-complement integer.
    pub const fn signed(self) -> Self {
        Self {
            signed: true,
            ..self
        }
    }

    /// Treat the first byte on the wire as the most significant one.
    pub const fn msb_first(self) -> Self {
        Self {
            lsb_first: false,
            ..self
        }
    }

    pub const fn mask(&self) -> u64 {
        (u64::MAX >> (64 - self.count as u32)) << self.lowest
    }

    pub fn decode(&self, bytes: &[u8]) -> i64 {
        let raw = self.combine(bytes);
        let mut value = ((raw & self.mask()) >> self.lowest) as i64;
        if self.signed && self.count < 64 && value & (1 << (self.count - 1)) != 0 {
            value -= 1 << self.count;
        }
        value
    }

    pub fn encode(&self, bytes: &mut [u8], value: i64) {
        let raw = self.combine(bytes);
        let field = ((value as u64) << self.lowest) & self.mask();
        self.split((raw & !self.mask()) | field, bytes);
    }

    pub fn get<I, D, E, const W: usize>(
        &self,
        reg: &mut Register<W>,
        dev: &mut Device<I, D>,
    ) -> Result<i64, Error<E>>
    where
        I: i2c::Write<Error = E> + i2c::Read<Error = E>,
        D: DelayMs<u16>,
    {
        let bytes = reg.read(dev).map_err(Error::I2c)?;
        Ok(self.decode(bytes))
    }

    pub fn is_set<I, D, E, const W: usize>(
        &self,
        reg: &mut Register<W>,
        dev: &mut Device<I, D>,
    ) -> Result<bool, Error<E>>
    where
        I: i2c::Write<Error = E> + i2c::Read<Error = E>,
        D: DelayMs<u16>,
    {
        Ok(self.get(reg, dev)? != 0)
    }

    /// Read-modify-write the field. Read-only fields are rejected before any
    /// bus traffic happens.
    pub fn set<I, D, E, const W: usize>(
        &self,
        reg: &mut Register<W>,
        dev: &mut Device<I, D>,
        value: i64,
    ) -> Result<(), Error<E>>
    where
        I: i2c::Write<Error = E> + i2c::Read<Error = E>,
        D: DelayMs<u16>,
    {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut bytes = *reg.read(dev).map_err(Error::I2c)?;
        self.encode(&mut bytes, value);
        reg.write(dev, &bytes).map_err(Error::I2c)
    }

    fn combine(&self, bytes: &[u8]) -> u64 {
        let push = |acc: u64, &byte: &u8| (acc << 8) | byte as u64;
        if self.lsb_first {
            bytes.iter().rev().fold(0, push)
        } else {
            bytes.iter().fold(0, push)
        }
    }

    fn split(&self, mut raw: u64, bytes: &mut [u8]) {
        let len = bytes.len();
        for i in 0..len {
            let idx = if self.lsb_first { i } else { len - 1 - i };
            bytes[idx] = raw as u8;
            raw >>= 8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{BusFault, FakeBus, NoDelay};

    fn device(bus: FakeBus) -> Device<FakeBus, NoDelay> {
        Device::new(bus, 0x5A, NoDelay::default())
    }

    #[test]
    fn read_reissues_address_every_time() {
        let mut bus = FakeBus::default();
        bus.regs.insert(0x20, vec![0x81]);
        let mut dev = device(bus);
        let mut reg = Register::<1>::new(0x20);

        assert_eq!(reg.read(&mut dev), Ok(&[0x81]));
        assert_eq!(reg.read(&mut dev), Ok(&[0x81]));
        assert_eq!(dev.release().writes, vec![vec![0x20], vec![0x20]]);
    }

    #[test]
    fn read_waits_for_settle_delay() {
        let delay = NoDelay::default();
        let mut dev = Device::new(FakeBus::default(), 0x5A, delay.clone());
        let mut fast = Register::<1>::new(0x00);
        let mut slow = Register::<8>::new(0x02).with_settle_ms(20);
        fast.read(&mut dev).unwrap();
        slow.read(&mut dev).unwrap();
        assert_eq!(delay.total_ms(), 32);
    }

    #[test]
    fn write_sends_address_then_payload() {
        let mut dev = device(FakeBus::default());
        let mut reg = Register::<2>::new(0x11);
        reg.write(&mut dev, &[0xAB, 0xCD]).unwrap();
        assert_eq!(reg.last(), &[0xAB, 0xCD]);
        assert_eq!(dev.release().writes, vec![vec![0x11, 0xAB, 0xCD]]);
    }

    #[test]
    fn bus_errors_propagate_unchanged() {
        let mut dev = device(FakeBus {
            fail: true,
            ..Default::default()
        });
        let mut reg = Register::<1>::new(0x00);
        assert_eq!(reg.read(&mut dev), Err(BusFault));
        assert_eq!(Field::bit(3).get(&mut reg, &mut dev), Err(Error::I2c(BusFault)));
    }

    #[test]
    fn single_bits() {
        let field = Field::bit(3);
        assert_eq!(field.decode(&[0b0000_1000]), 1);
        assert_eq!(field.decode(&[0b1111_0111]), 0);

        let mut bytes = [0b1000_0001];
        field.encode(&mut bytes, 1);
        assert_eq!(bytes, [0b1000_1001]);
        field.encode(&mut bytes, 0);
        assert_eq!(bytes, [0b1000_0001]);
    }

    #[test]
    fn multi_bit_fields() {
        let drive_mode = Field::bits(3, 4);
        assert_eq!(drive_mode.mask(), 0b0111_0000);
        assert_eq!(drive_mode.decode(&[0b1011_1000]), 0b011);

        let mut bytes = [0b1000_1000];
        drive_mode.encode(&mut bytes, 0b100);
        assert_eq!(bytes, [0b1100_1000]);
    }

    #[test]
    fn byte_order() {
        let lsb = Field::bits(16, 0);
        let msb = Field::bits(16, 0).msb_first();
        assert_eq!(lsb.decode(&[0x34, 0x12]), 0x1234);
        assert_eq!(msb.decode(&[0x12, 0x34]), 0x1234);

        let mut bytes = [0, 0];
        msb.encode(&mut bytes, 0xBEEF);
        assert_eq!(bytes, [0xBE, 0xEF]);
    }

    #[test]
    fn sign_extension() {
        let field = Field::bits(4, 0).signed();
        assert_eq!(field.decode(&[0b0000_0111]), 7);
        assert_eq!(field.decode(&[0b0000_1000]), -8);
        assert_eq!(field.decode(&[0b0000_1111]), -1);

        let mut bytes = [0xF0];
        field.encode(&mut bytes, -2);
        assert_eq!(bytes, [0xFE]);
    }

    #[test]
    fn read_only_fields_reject_writes() {
        let mut bus = FakeBus::default();
        bus.regs.insert(0x00, vec![0x90]);
        let mut dev = device(bus);
        let mut status = Register::<1>::new(0x00);
        let fw_mode = Field::bit(7).read_only();

        assert_eq!(fw_mode.is_set(&mut status, &mut dev), Ok(true));
        assert_eq!(fw_mode.set(&mut status, &mut dev, 0), Err(Error::ReadOnly));
        // only the address write from the read above hit the bus
        assert_eq!(dev.release().writes, vec![vec![0x00]]);
    }

    #[test]
    fn set_is_read_modify_write() {
        let mut bus = FakeBus::default();
        bus.regs.insert(0x01, vec![0b0000_1100]);
        let mut dev = device(bus);
        let mut meas_mode = Register::<1>::new(0x01);

        Field::bit(3).set(&mut meas_mode, &mut dev, 0).unwrap();
        assert_eq!(dev.release().regs[&0x01], vec![0b0000_0100]);
    }
}
