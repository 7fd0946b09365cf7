use anyhow::{anyhow, Context};
use clap::Parser;
#[cfg(any(feature = "sensor-ccs811", feature = "sensor-sgp30"))]
use linux_embedded_hal::Delay;
use linux_embedded_hal::{I2cdev, Serial};
use sensehub::{
    config::{Config, SensorKind},
    hub::Hub,
    logger,
    mqtt::MqttBroker,
    net::NetworkLink,
    sensor::{self, Options},
    I2cBus, Retry,
};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

const NAME: &str = "sensehub";

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// The I2C bus the sensors are attached to.
    #[arg(short, long, default_value = "/dev/i2c-1")]
    bus: PathBuf,

    /// Log more. Repeat for even more.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    logger::init(
        logger::level_filter(args.verbose, args.quiet),
        config.udp_logger.as_deref(),
    )?;
    log::info!(target: NAME, "sensehub is go!");

    let i2c = Retry::<anyhow::Error>::new(5)
        .with_delay(Duration::from_millis(500))
        .with_target(NAME)
        .run(|| I2cdev::new(&args.bus).map_err(|error| anyhow!("{error:?}")))
        .with_context(|| format!("failed to open I2C bus {}", args.bus.display()))?;
    let bus: I2cBus = shared_bus::BusManagerSimple::new(i2c);
    log::info!(target: NAME, "opened I2C bus {}", args.bus.display());

    let link = config.mqtt.as_ref().map(|mqtt| {
        let client_id = format!("sensehub{}", config.topic_suffix());
        NetworkLink::new(MqttBroker::new(mqtt, &client_id, config.sub_topic()))
            .with_reconnect_interval(config.hub.mqtt_reconnect_interval())
            .with_settle(config.hub.mqtt_settle())
    });
    if link.is_none() {
        log::warn!(target: NAME, "no MQTT broker configured; readings will only be logged");
    }

    let mut hub = Hub::new(&config, link);
    for (kind, options) in config.enabled_sensors() {
        let i2c = bus.acquire_i2c();
        match kind {
            SensorKind::Aht21 => hub.add_sensor(sensor::aht21::Aht21::new(i2c), &options),
            #[cfg(feature = "sensor-ccs811")]
            SensorKind::Ccs811 => {
                let address = address(&options, sensor::ccs811::DEFAULT_ADDRESS)?;
                hub.add_sensor(sensor::ccs811::Ccs811::new(i2c, address, Delay), &options)
            }
            SensorKind::Hdc1080 => hub.add_sensor(sensor::hdc1080::Hdc1080::new(i2c), &options),
            SensorKind::Scd4x => hub.add_sensor(sensor::scd4x::Scd4x::new(i2c), &options),
            #[cfg(feature = "sensor-sgp30")]
            SensorKind::Sgp30 => {
                let address = address(&options, sensor::sgp30::ADDRESS)?;
                hub.add_sensor(sensor::sgp30::Sgp30::new(i2c, address, Delay), &options)
            }
            SensorKind::Sgp41 => hub.add_sensor(
                sensor::sgp41::Sgp41::new(i2c, config.hub.sampling_interval()),
                &options,
            ),
            SensorKind::Sps30 => hub.add_sensor(sensor::sps30::Sps30::new(i2c), &options),
            SensorKind::Zh03b => match open_uart(&options) {
                Ok(port) => hub.add_sensor(sensor::zh03b::Zh03b::new(port), &options),
                Err(error) if !config.hub.require_all_sensors => {
                    log::error!(target: NAME, "{error:#}; continuing without {kind}");
                    Ok(())
                }
                Err(error) => Err(error),
            },
            #[allow(unreachable_patterns)]
            kind => {
                log::warn!(target: NAME, "{kind} support is not compiled in; skipping it");
                Ok(())
            }
        }
        .with_context(|| format!("failed to set up {kind}"))?;
    }

    hub.start().context("failed to start the hub")?;
    hub.run()
}

/// The `address` option, for sensors that can be strapped to more than one.
fn address(options: &Options, default: u8) -> anyhow::Result<u8> {
    let Some(value) = options.get("address") else {
        return Ok(default);
    };
    value
        .as_u64()
        .and_then(|address| u8::try_from(address).ok())
        .ok_or_else(|| anyhow!("invalid I2C address {value}"))
}

/// Opens the serial port named by the `uart` option of a UART sensor.
fn open_uart(options: &Options) -> anyhow::Result<Serial> {
    let path = options
        .get("uart")
        .and_then(|value| value.as_str())
        .ok_or_else(|| anyhow!("a serial port path is required as the \"uart\" option"))?;
    let port = Serial::open(Path::new(path))
        .map_err(|error| anyhow!("{error:?}"))
        .with_context(|| format!("failed to open serial port {path}"))?;
    log::info!(target: NAME, "opened serial port {path}");
    Ok(port)
}
