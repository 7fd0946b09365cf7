use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a sensor module.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The sensor has never been attached. Either it is not on the bus, or
    /// every connection attempt failed.
    #[default]
    Missing,

    /// The sensor is attached and healthy.
    Up,

    /// The sensor was attached, but has failed too many consecutive
    /// measurements and is no longer polled.
    Down,
}

impl Status {
    pub fn is_up(self) -> bool {
        self == Status::Up
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Missing => "missing",
            Status::Up => "up",
            Status::Down => "down",
        })
    }
}
