//! Test doubles shared by unit tests.
use crate::{
    net::Broker,
    sensirion::crc8,
    sensor::{BusError, PublishData, Sensor, READINGS_GROUP},
};
use embedded_hal::{
    blocking::{delay, i2c},
    serial,
};
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
    time::Duration,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusFault;

/// An I2C bus that records every write and answers reads from a queue.
#[derive(Debug, Default)]
pub struct ScriptedBus {
    pub writes: Vec<Vec<u8>>,
    pub reads: VecDeque<Vec<u8>>,
    pub fail: bool,
}

impl ScriptedBus {
    pub fn push_read(&mut self, bytes: Vec<u8>) {
        self.reads.push_back(bytes);
    }

    /// Queues a Sensirion-style response: each word followed by its CRC.
    pub fn push_words(&mut self, words: &[u16]) {
        let mut bytes = Vec::with_capacity(words.len() * 3);
        for word in words {
            let be = word.to_be_bytes();
            bytes.extend_from_slice(&be);
            bytes.push(crc8(&be));
        }
        self.push_read(bytes);
    }
}

impl i2c::Write for ScriptedBus {
    type Error = BusFault;

    fn write(&mut self, _address: u8, bytes: &[u8]) -> Result<(), BusFault> {
        if self.fail {
            return Err(BusFault);
        }
        self.writes.push(bytes.to_vec());
        Ok(())
    }
}

impl i2c::Read for ScriptedBus {
    type Error = BusFault;

    fn read(&mut self, _address: u8, buf: &mut [u8]) -> Result<(), BusFault> {
        if self.fail {
            return Err(BusFault);
        }
        let bytes = self.reads.pop_front().ok_or(BusFault)?;
        for (dst, src) in buf.iter_mut().zip(bytes.iter().chain(std::iter::repeat(&0))) {
            *dst = *src;
        }
        Ok(())
    }
}

/// A serial port that records everything written and answers each flushed
/// request with the next scripted response.
#[derive(Debug, Default)]
pub struct ScriptedSerial {
    pub tx: Vec<u8>,
    pub rx: VecDeque<u8>,
    responses: VecDeque<Vec<u8>>,
}

impl ScriptedSerial {
    pub fn respond(&mut self, bytes: Vec<u8>) {
        self.responses.push_back(bytes);
    }
}

impl serial::Read<u8> for ScriptedSerial {
    type Error = BusFault;

    fn read(&mut self) -> nb::Result<u8, BusFault> {
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl serial::Write<u8> for ScriptedSerial {
    type Error = BusFault;

    fn write(&mut self, byte: u8) -> nb::Result<(), BusFault> {
        self.tx.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), BusFault> {
        if let Some(response) = self.responses.pop_front() {
            self.rx.extend(response);
        }
        Ok(())
    }
}

/// A delay that returns immediately.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoDelay;

impl delay::DelayMs<u16> for NoDelay {
    fn delay_ms(&mut self, _ms: u16) {}
}

impl delay::DelayUs<u16> for NoDelay {
    fn delay_us(&mut self, _us: u16) {}
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PollBehavior {
    Ok,
    BusError,
    Fault,
}

/// Shared call counters, so tests can observe a sensor after handing it to a
/// module.
#[derive(Clone, Debug, Default)]
pub struct Counters {
    pub connects: Rc<Cell<usize>>,
    pub polls: Rc<Cell<usize>>,
    pub calibrations: Rc<RefCell<Vec<(f32, f32)>>>,
}

#[derive(Debug)]
pub struct FakeSensor {
    pub counters: Counters,
    name: &'static str,
    group: &'static str,
    connect_failures: usize,
    poll: PollBehavior,
    fail_calibration: bool,
    temp_humidity: Option<(f32, f32)>,
    calibration_priority: u8,
}

impl FakeSensor {
    pub fn new(name: &'static str) -> Self {
        Self {
            counters: Counters::default(),
            name,
            group: READINGS_GROUP,
            connect_failures: 0,
            poll: PollBehavior::Ok,
            fail_calibration: false,
            temp_humidity: None,
            calibration_priority: 0,
        }
    }

    /// Fail the first `n` connection attempts with a bus error.
    pub fn fail_connects(self, n: usize) -> Self {
        Self {
            connect_failures: n,
            ..self
        }
    }

    pub fn on_poll(self, poll: PollBehavior) -> Self {
        Self { poll, ..self }
    }

    pub fn fail_calibration(self) -> Self {
        Self {
            fail_calibration: true,
            ..self
        }
    }

    pub fn in_group(self, group: &'static str) -> Self {
        Self { group, ..self }
    }

    pub fn with_temp_humidity(self, temp_c: f32, humidity: f32) -> Self {
        Self {
            temp_humidity: Some((temp_c, humidity)),
            ..self
        }
    }

    pub fn with_calibration_priority(self, calibration_priority: u8) -> Self {
        Self {
            calibration_priority,
            ..self
        }
    }
}

impl Sensor for FakeSensor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn connect(&mut self) -> anyhow::Result<()> {
        let attempt = self.counters.connects.get();
        self.counters.connects.set(attempt + 1);
        if attempt < self.connect_failures {
            return Err(BusError::new(self.name, "NACK").into());
        }
        Ok(())
    }

    fn poll(&mut self) -> anyhow::Result<()> {
        self.counters.polls.set(self.counters.polls.get() + 1);
        match self.poll {
            PollBehavior::Ok => Ok(()),
            PollBehavior::BusError => Err(BusError::new(self.name, "timeout").into()),
            PollBehavior::Fault => Err(anyhow::anyhow!("{} reported a fault", self.name)),
        }
    }

    fn calibrate(&mut self, temp_c: f32, humidity: f32) -> anyhow::Result<()> {
        self.counters.calibrations.borrow_mut().push((temp_c, humidity));
        if self.fail_calibration {
            anyhow::bail!("calibration is not supported");
        }
        Ok(())
    }

    fn temp_humidity(&self) -> Option<(f32, f32)> {
        self.temp_humidity
    }

    fn calibration_priority(&self) -> u8 {
        self.calibration_priority
    }

    fn publish_group(&self) -> &'static str {
        self.group
    }

    fn publish_data(&self) -> PublishData {
        vec![(
            self.name,
            serde_json::json!({ "polls": self.counters.polls.get() }),
        )]
    }
}

/// Everything a [`FakeBroker`] was asked to do.
#[derive(Debug, Default)]
pub struct BrokerLog {
    pub connects: usize,
    pub disconnects: usize,
    pub published: Vec<(String, Vec<u8>)>,
    /// Delivered on the next poll.
    pub inbound: Vec<(String, Vec<u8>)>,
    pub poll_fails: bool,
}

#[derive(Debug, Default)]
pub struct FakeBroker {
    pub log: Rc<RefCell<BrokerLog>>,
    connect_failures: usize,
}

impl FakeBroker {
    pub fn failing(self) -> Self {
        self.fail_connects(usize::MAX)
    }

    /// Refuse the first `n` connection attempts.
    pub fn fail_connects(self, n: usize) -> Self {
        Self {
            connect_failures: n,
            ..self
        }
    }

    /// Published messages as (topic, JSON payload).
    pub fn messages(log: &RefCell<BrokerLog>) -> Vec<(String, serde_json::Value)> {
        log.borrow()
            .published
            .iter()
            .map(|(topic, payload)| {
                let json = serde_json::from_slice(payload).expect("payload must be JSON");
                (topic.clone(), json)
            })
            .collect()
    }
}

impl Broker for FakeBroker {
    fn connect(&mut self) -> anyhow::Result<()> {
        let attempt = self.log.borrow().connects;
        self.log.borrow_mut().connects += 1;
        if attempt < self.connect_failures {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        self.log.borrow_mut().disconnects += 1;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        self.log
            .borrow_mut()
            .published
            .push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn poll(
        &mut self,
        _timeout: Duration,
        on_message: &mut dyn FnMut(&str, &[u8]),
    ) -> anyhow::Result<()> {
        if self.log.borrow().poll_fails {
            anyhow::bail!("connection reset");
        }
        let inbound = std::mem::take(&mut self.log.borrow_mut().inbound);
        for (topic, payload) in inbound {
            on_message(&topic, &payload);
        }
        Ok(())
    }
}
