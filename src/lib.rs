//! A multi-sensor environmental monitoring hub.
//!
//! Reads gas, particulate, temperature and humidity sensors over one shared
//! I2C bus, conditions the raw readings and publishes them to an MQTT broker.
//! A [`hub::Hub`] owns one [`sensor::Module`] per attached sensor and a
//! [`net::NetworkLink`] to the broker, and drives both from a single thread.
pub mod config;
pub mod filter;
pub mod gas_index;
pub mod hub;
pub mod logger;
pub mod mqtt;
pub mod net;
pub mod retry;
pub mod sensirion;
pub mod sensor;
pub mod units;

#[cfg(test)]
mod testing;

pub use retry::Retry;

/// The I2C bus every sensor shares. It is not `Sync`, so the hub and all of
/// its sensors stay on one thread.
pub type I2cBus = shared_bus::BusManagerSimple<linux_embedded_hal::I2cdev>;
