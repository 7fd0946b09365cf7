//! The JSON configuration file.
use crate::sensor::Options;
use anyhow::Context;
use serde::Deserialize;
use std::{collections::BTreeMap, fmt, path::Path, time::Duration};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Distinguishes this hub's topics from other hubs on the same broker.
    pub sensor_id: Option<String>,
    /// Without a broker, readings are only logged.
    pub mqtt: Option<MqttConfig>,
    /// `host:port` to mirror log lines to.
    pub udp_logger: Option<String>,
    pub sensors: SensorList,
    pub hub: HubConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "MqttConfig::default_port")]
    pub port: u16,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "MqttConfig::default_keep_alive")]
    pub keep_alive_secs: u64,
}

/// Either a plain list of sensor names, or a map from name to `true`/`false`
/// or to an object of sensor options (with an optional `enabled` flag).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SensorList {
    Names(Vec<String>),
    Entries(BTreeMap<String, SensorEntry>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SensorEntry {
    Enabled(bool),
    Options {
        #[serde(default = "enabled")]
        enabled: bool,
        #[serde(flatten)]
        options: Options,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SensorKind {
    Aht21,
    Ccs811,
    Hdc1080,
    Scd4x,
    Sgp30,
    Sgp41,
    Sps30,
    Zh03b,
}

/// Timing and retry policy of the hub.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    pub connect_attempts: usize,
    pub connect_delay_ms: u64,
    pub measure_attempts: usize,
    pub measure_delay_ms: u64,
    pub loop_ms: u64,
    pub temp_sync_secs: u64,
    pub publish_interval_secs: u64,
    pub mqtt_reconnect_secs: u64,
    pub mqtt_settle_ms: u64,
    pub mqtt_poll_ms: u64,
    /// Consecutive failed measurements before a sensor is given up on. Zero
    /// keeps polling forever.
    pub max_consecutive_failures: usize,
    /// Abort start-up if any enabled sensor fails to connect.
    pub require_all_sensors: bool,
}

fn enabled() -> bool {
    true
}

// === impl Config ===

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).map_err(Into::into)
    }

    /// Appended to every sensor topic.
    pub fn topic_suffix(&self) -> String {
        match self.sensor_id.as_deref() {
            Some(id) if !id.is_empty() => format!("_{id}"),
            _ => String::new(),
        }
    }

    /// Topic for hub-level messages, such as the boot announcement.
    pub fn base_topic(&self) -> String {
        format!("sensors/hub{}", self.topic_suffix())
    }

    /// Topic the hub listens on.
    pub fn sub_topic(&self) -> String {
        format!("{}_sub", self.base_topic())
    }

    /// The enabled sensors with their options, one entry per model no matter
    /// how many aliases name it. Unknown names are logged and skipped.
    pub fn enabled_sensors(&self) -> BTreeMap<SensorKind, Options> {
        let mut sensors = BTreeMap::new();
        let mut enable = |name: &str, options: Options| match SensorKind::from_name(name) {
            Some(kind) => {
                sensors.insert(kind, options);
            }
            None => log::warn!(target: "config", "ignoring unknown sensor {name:?}"),
        };

        match self.sensors {
            SensorList::Names(ref names) => {
                for name in names {
                    enable(name, Options::new());
                }
            }
            SensorList::Entries(ref entries) => {
                for (name, entry) in entries {
                    match entry {
                        SensorEntry::Enabled(true) => enable(name, Options::new()),
                        SensorEntry::Options {
                            enabled: true,
                            options,
                        } => enable(name, options.clone()),
                        _ => {}
                    }
                }
            }
        }
        sensors
    }
}

// === impl MqttConfig ===

impl MqttConfig {
    fn default_port() -> u16 {
        1883
    }

    fn default_keep_alive() -> u64 {
        30
    }
}

impl Default for SensorList {
    fn default() -> Self {
        Self::Entries(BTreeMap::new())
    }
}

// === impl SensorKind ===

impl SensorKind {
    /// Case-insensitive, accepting the aliases the models are sold under (and
    /// a few common misspellings).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aht" | "ahtx0" | "aht20" | "aht21" => Some(Self::Aht21),
            "ccs811" | "ccs" => Some(Self::Ccs811),
            "hdc1080" | "hdc" => Some(Self::Hdc1080),
            "scd4x" | "scd40" | "scd41" => Some(Self::Scd4x),
            "sgp30" | "spg30" => Some(Self::Sgp30),
            "sgp41" | "spg41" => Some(Self::Sgp41),
            "sps30" => Some(Self::Sps30),
            "zh03b" | "zh03" => Some(Self::Zh03b),
            _ => None,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Aht21 => "AHT21",
            Self::Ccs811 => "CCS811",
            Self::Hdc1080 => "HDC1080",
            Self::Scd4x => "SCD4x",
            Self::Sgp30 => "SGP30",
            Self::Sgp41 => "SGP41",
            Self::Sps30 => "SPS30",
            Self::Zh03b => "ZH03B",
        })
    }
}

// === impl HubConfig ===

impl HubConfig {
    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub fn measure_delay(&self) -> Duration {
        Duration::from_millis(self.measure_delay_ms)
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_ms)
    }

    pub fn temp_sync_interval(&self) -> Duration {
        Duration::from_secs(self.temp_sync_secs)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }

    pub fn mqtt_reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.mqtt_reconnect_secs)
    }

    pub fn mqtt_settle(&self) -> Duration {
        Duration::from_millis(self.mqtt_settle_ms)
    }

    pub fn mqtt_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.mqtt_poll_ms)
    }

    /// Seconds between two measurements of the same sensor, as the gas index
    /// algorithm expects it.
    pub fn sampling_interval(&self) -> f32 {
        self.loop_ms as f32 / 1000.0
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 40,
            connect_delay_ms: 500,
            measure_attempts: 5,
            measure_delay_ms: 150,
            loop_ms: 2_000,
            temp_sync_secs: 180,
            publish_interval_secs: 60,
            mqtt_reconnect_secs: 180,
            mqtt_settle_ms: 1_000,
            mqtt_poll_ms: 100,
            max_consecutive_failures: 0,
            require_all_sensors: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_has_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert!(config.mqtt.is_none());
        assert!(config.enabled_sensors().is_empty());
        assert_eq!(config.hub.connect_attempts, 40);
        assert_eq!(config.hub.publish_interval(), Duration::from_secs(60));
        assert_eq!(config.hub.sampling_interval(), 2.0);
        assert_eq!(config.base_topic(), "sensors/hub");
    }

    #[test]
    fn sensor_names_are_case_insensitive_aliases() {
        let config =
            Config::from_json(r#"{ "sensors": ["SCD41", "scd40", "AHTx0", "ccs", "lidar"] }"#)
                .unwrap();
        let kinds: Vec<_> = config.enabled_sensors().into_keys().collect();
        assert_eq!(
            kinds,
            vec![SensorKind::Aht21, SensorKind::Ccs811, SensorKind::Scd4x]
        );
    }

    #[test]
    fn sensor_entries_with_options() {
        let config = Config::from_json(
            r#"{
                "sensorId": "bed",
                "mqtt": { "host": "broker.local" },
                "sensors": {
                    "sgp30": false,
                    "sgp41": true,
                    "sps30": { "autoCleaningInterval": 86400 },
                    "ccs811": { "enabled": false, "driveMode": 2 }
                },
                "hub": { "loopMs": 1000, "requireAllSensors": true }
            }"#,
        )
        .unwrap();

        let sensors = config.enabled_sensors();
        assert_eq!(sensors.len(), 2);
        assert!(sensors[&SensorKind::Sgp41].is_empty());
        assert_eq!(
            sensors[&SensorKind::Sps30]["autoCleaningInterval"],
            serde_json::json!(86400)
        );

        let mqtt = config.mqtt.as_ref().unwrap();
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 1883);

        assert_eq!(config.hub.loop_ms, 1000);
        assert_eq!(config.hub.connect_attempts, 40);
        assert!(config.hub.require_all_sensors);

        assert_eq!(config.topic_suffix(), "_bed");
        assert_eq!(config.base_topic(), "sensors/hub_bed");
        assert_eq!(config.sub_topic(), "sensors/hub_bed_sub");
    }

    #[test]
    fn uart_sensor_takes_its_port_as_an_option() {
        let config = Config::from_json(
            r#"{ "sensors": { "HDC": true, "zh03b": { "uart": "/dev/ttyS0" } } }"#,
        )
        .unwrap();
        let sensors = config.enabled_sensors();
        assert!(sensors[&SensorKind::Hdc1080].is_empty());
        assert_eq!(
            sensors[&SensorKind::Zh03b]["uart"],
            serde_json::json!("/dev/ttyS0")
        );
    }

    #[test]
    fn rejects_malformed_config() {
        assert!(Config::from_json(r#"{ "mqtt": { "port": 1883 } }"#).is_err());
        assert!(Config::from_json(r#"{ "sensors": 3 }"#).is_err());
    }
}
