//! [`Broker`] implementation on top of `rumqttc`'s blocking client.
use crate::{config::MqttConfig, net::Broker};
use anyhow::anyhow;
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet, QoS, RecvTimeoutError,
};
use std::time::{Duration, Instant};

const NAME: &str = "mqtt";

/// Outgoing requests buffered between two polls of the connection.
const REQUEST_CAPACITY: usize = 64;

pub struct MqttBroker {
    options: MqttOptions,
    sub_topic: String,
    connect_timeout: Duration,
    session: Option<Session>,
}

struct Session {
    client: Client,
    connection: Connection,
}

impl MqttBroker {
    /// `client_id` is used when the config does not name one. Once connected,
    /// the broker subscribes to `sub_topic`.
    pub fn new(config: &MqttConfig, client_id: &str, sub_topic: String) -> Self {
        let client_id = config.client_id.as_deref().unwrap_or(client_id);
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        Self {
            options,
            sub_topic,
            connect_timeout: Duration::from_secs(5),
            session: None,
        }
    }

    pub fn with_connect_timeout(self, connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            ..self
        }
    }
}

impl Broker for MqttBroker {
    fn connect(&mut self) -> anyhow::Result<()> {
        self.session = None;
        let (client, mut connection) = Client::new(self.options.clone(), REQUEST_CAPACITY);
        let (host, port) = self.options.broker_address();
        log::debug!(target: NAME, "connecting to {host}:{port}...");

        let deadline = Instant::now() + self.connect_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(anyhow!("{host}:{port} refused the connection: {:?}", ack.code));
                    }
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(error)) => return Err(anyhow!("failed to connect to {host}:{port}: {error}")),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(anyhow!("timed out connecting to {host}:{port}"))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("connection to {host}:{port} closed"))
                }
            }
        }

        client
            .try_subscribe(self.sub_topic.as_str(), QoS::AtMostOnce)
            .map_err(|error| anyhow!("failed to subscribe to {}: {error}", self.sub_topic))?;
        log::info!(target: NAME, "connected to {host}:{port}, listening on {}", self.sub_topic);

        self.session = Some(Session { client, connection });
        Ok(())
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        session
            .client
            .try_disconnect()
            .map_err(|error| anyhow!("failed to disconnect: {error}"))
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| anyhow!("not connected"))?;
        log::trace!(target: NAME, "publishing {} bytes to {topic}", payload.len());
        session
            .client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|error| anyhow!("failed to queue message for {topic}: {error}"))
    }

    fn poll(
        &mut self,
        timeout: Duration,
        on_message: &mut dyn FnMut(&str, &[u8]),
    ) -> anyhow::Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("not connected"))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }

            match session.connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    on_message(&publish.topic, &publish.payload);
                }
                Ok(Ok(_)) => {}
                Ok(Err(error)) => {
                    self.session = None;
                    return Err(anyhow!("connection error: {error}"));
                }
                Err(RecvTimeoutError::Timeout) => return Ok(()),
                Err(RecvTimeoutError::Disconnected) => {
                    self.session = None;
                    return Err(anyhow!("connection closed"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> MqttConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn options_from_config() {
        let broker = MqttBroker::new(
            &config(r#"{ "host": "broker.local", "port": 1884 }"#),
            "sensehub_bed",
            "sensors/hub_bed_sub".to_string(),
        );
        assert_eq!(broker.options.client_id(), "sensehub_bed");
        assert_eq!(
            broker.options.broker_address(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(broker.options.keep_alive(), Duration::from_secs(30));

        let broker = MqttBroker::new(
            &config(r#"{ "host": "broker.local", "clientId": "kitchen" }"#),
            "sensehub",
            String::new(),
        );
        assert_eq!(broker.options.client_id(), "kitchen");
    }

    #[test]
    fn not_connected_errors() {
        let mut broker = MqttBroker::new(
            &config(r#"{ "host": "127.0.0.1" }"#),
            "sensehub",
            String::new(),
        );
        assert!(broker.publish("sensors/test", b"{}").is_err());
        assert!(broker.poll(Duration::ZERO, &mut |_, _| {}).is_err());
        broker.disconnect().unwrap();
    }

    #[test]
    fn refused_connection_fails_fast() {
        // nothing listens on the discard port
        let mut broker = MqttBroker::new(
            &config(r#"{ "host": "127.0.0.1", "port": 9 }"#),
            "sensehub",
            String::new(),
        )
        .with_connect_timeout(Duration::from_secs(2));
        assert!(broker.connect().is_err());
        assert!(broker.session.is_none());
    }
}
