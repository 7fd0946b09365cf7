//! The measurement loop: keeps the broker connected, polls every sensor,
//! spreads temperature/humidity compensation and publishes readings.
use crate::{
    config::{Config, HubConfig},
    net::{Broker, NetworkLink},
    sensor::{Module, Options, Sensor},
};
use serde_json::{json, Value};
use std::{collections::HashMap, thread, time::Instant};

const NAME: &str = "hub";

pub struct Hub<'bus, B> {
    config: HubConfig,
    topic_suffix: String,
    base_topic: String,
    link: Option<NetworkLink<B>>,
    modules: Vec<Module<'bus>>,
    started_at: Instant,
    last_temp_sync: Option<Instant>,
    last_publish: HashMap<&'static str, Instant>,
}

impl<'bus, B: Broker> Hub<'bus, B> {
    /// Without a `link`, readings are logged instead of published.
    pub fn new(config: &Config, link: Option<NetworkLink<B>>) -> Self {
        Self {
            config: config.hub.clone(),
            topic_suffix: config.topic_suffix(),
            base_topic: config.base_topic(),
            link,
            modules: Vec::new(),
            started_at: Instant::now(),
            last_temp_sync: None,
            last_publish: HashMap::new(),
        }
    }

    /// Adds a sensor, configured with its options from the config file. Bad
    /// options are an error; nothing touches the bus until [`Hub::start`].
    pub fn add_sensor(
        &mut self,
        sensor: impl Sensor + 'bus,
        options: &Options,
    ) -> anyhow::Result<()> {
        let mut module = Module::new(sensor)
            .with_measure_retry(self.config.measure_attempts, self.config.measure_delay())
            .with_max_failures(self.config.max_consecutive_failures);
        module.load_config(options)?;
        self.modules.push(module);
        Ok(())
    }

    pub fn modules(&self) -> &[Module<'bus>] {
        &self.modules
    }

    /// Brings up the network link and connects every sensor.
    ///
    /// A sensor that cannot be connected is left out of the measurement loop,
    /// unless every sensor is required, in which case this fails.
    pub fn start(&mut self) -> anyhow::Result<()> {
        log::info!(target: NAME, "starting with {} sensors", self.modules.len());
        if let Some(ref mut link) = self.link {
            link.maybe_reconnect(false);
        }

        let attempts = self.config.connect_attempts;
        let delay = self.config.connect_delay();
        for module in &mut self.modules {
            if let Err(error) = module.connect(attempts, delay) {
                if self.config.require_all_sensors {
                    return Err(error);
                }
                log::error!(target: NAME, "{error:#}; continuing without it");
            }
        }

        let mut booted = serde_json::Map::new();
        booted.insert("booted".into(), Value::Bool(true));
        for module in &self.modules {
            booted.insert(module.name().into(), json!(module.status()));
        }
        let topic = self.base_topic.clone();
        self.send(&topic, &Value::Object(booted));

        self.started_at = Instant::now();
        Ok(())
    }

    /// One iteration of the measurement loop. Never fails: every error is
    /// logged and handled by the component it happened in.
    pub fn tick(&mut self) {
        if let Some(ref mut link) = self.link {
            link.maybe_reconnect(false);
            link.poll(self.config.mqtt_poll_timeout(), &mut |topic, payload| {
                log::info!(
                    target: NAME,
                    "received message on {topic}: {}",
                    String::from_utf8_lossy(payload)
                );
            });
        }

        for module in &mut self.modules {
            module.measure();
        }

        self.maybe_sync_temperatures();
        self.maybe_publish();
    }

    /// Ticks forever.
    pub fn run(&mut self) -> ! {
        let delay = self.config.loop_delay();
        loop {
            self.tick();
            thread::sleep(delay);
        }
    }

    /// Compensates every sensor for the temperature and humidity measured by
    /// the highest priority source that has them. Ties go to the sensor added
    /// first.
    fn maybe_sync_temperatures(&mut self) {
        let due = self
            .last_temp_sync
            .map_or(true, |last| last.elapsed() >= self.config.temp_sync_interval());
        if !due {
            return;
        }

        let source = self
            .modules
            .iter()
            .rev()
            .filter_map(|module| Some((module, module.temp_humidity()?)))
            .max_by_key(|(module, _)| module.calibration_priority());
        let Some((source, (temp_c, humidity))) = source else {
            log::debug!(target: NAME, "no temperature/humidity source yet");
            return;
        };

        log::info!(
            target: NAME,
            "compensating sensors for {temp_c:.2}°C, {humidity:.2}% RH from {}",
            source.name()
        );
        for module in &mut self.modules {
            module.calibrate_temps(temp_c, humidity);
        }
        self.last_temp_sync = Some(Instant::now());
    }

    fn maybe_publish(&mut self) {
        let interval = self.config.publish_interval();
        let now = Instant::now();

        let mut groups: Vec<&'static str> = Vec::new();
        for module in &self.modules {
            let group = module.publish_group();
            if !groups.contains(&group) {
                groups.push(group);
            }
        }

        for group in groups {
            let last = self.last_publish.get(group).copied().unwrap_or(self.started_at);
            if now.saturating_duration_since(last) < interval {
                continue;
            }

            let messages: Vec<_> = self
                .modules
                .iter()
                .filter(|module| module.publish_group() == group)
                .filter_map(Module::publish_data)
                .flatten()
                .collect();
            log::debug!(target: NAME, "publishing {} messages for {group}", messages.len());
            for (topic, payload) in messages {
                let topic = format!("{topic}{}", self.topic_suffix);
                self.send(&topic, &payload);
            }
            self.last_publish.insert(group, now);
        }
    }

    fn send(&mut self, topic: &str, payload: &Value) {
        let payload = match serde_json::to_vec(payload) {
            Ok(payload) => payload,
            Err(error) => {
                log::warn!(target: NAME, "failed to encode payload for {topic}: {error}");
                return;
            }
        };

        match self.link {
            Some(ref mut link) => link.publish(topic, &payload),
            None => log::info!(target: NAME, "{topic}: {}", String::from_utf8_lossy(&payload)),
        }
    }
}
