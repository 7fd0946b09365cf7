//! An in-memory CCS811 register map for tests.
use embedded_hal::blocking::{delay::DelayMs, i2c};
use std::{cell::Cell, collections::HashMap, rc::Rc};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusFault;

#[derive(Debug, Default)]
pub struct FakeBus {
    pub regs: HashMap<u8, Vec<u8>>,
    pub writes: Vec<Vec<u8>>,
    pub fail: bool,
    /// When set, `APP_START` moves the device into application mode.
    pub app_start_works: bool,
    pub pointer: u8,
}

#[derive(Clone, Debug, Default)]
pub struct NoDelay(Rc<Cell<u32>>);

impl FakeBus {
    fn status(&mut self) -> &mut u8 {
        let reg = self.regs.entry(0x00).or_insert_with(|| vec![0]);
        &mut reg[0]
    }
}

impl i2c::Write for FakeBus {
    type Error = BusFault;

    fn write(&mut self, _address: u8, bytes: &[u8]) -> Result<(), BusFault> {
        if self.fail {
            return Err(BusFault);
        }
        self.writes.push(bytes.to_vec());
        let (&reg, payload) = bytes.split_first().ok_or(BusFault)?;
        self.pointer = reg;
        match reg {
            // SW_RESET drops back into boot mode
            0xFF => *self.status() &= !0x80,
            0xF4 if self.app_start_works => *self.status() |= 0x80,
            _ if !payload.is_empty() => {
                self.regs.insert(reg, payload.to_vec());
            }
            _ => {}
        }
        Ok(())
    }
}

impl i2c::Read for FakeBus {
    type Error = BusFault;

    fn read(&mut self, _address: u8, buf: &mut [u8]) -> Result<(), BusFault> {
        if self.fail {
            return Err(BusFault);
        }
        let data = self.regs.get(&self.pointer).cloned().unwrap_or_default();
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = data.get(i).copied().unwrap_or(0);
        }
        // reading ERROR_ID clears the status error bit
        if self.pointer == 0xE0 {
            *self.status() &= !0x01;
        }
        Ok(())
    }
}

impl NoDelay {
    pub fn total_ms(&self) -> u32 {
        self.0.get()
    }
}

impl DelayMs<u16> for NoDelay {
    fn delay_ms(&mut self, ms: u16) {
        self.0.set(self.0.get() + ms as u32);
    }
}
