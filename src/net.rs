use std::{
    thread,
    time::{Duration, Instant},
};

const NAME: &str = "net";

/// A message broker client.
pub trait Broker {
    /// Opens a fresh session, replacing any previous one.
    fn connect(&mut self) -> anyhow::Result<()>;

    fn disconnect(&mut self) -> anyhow::Result<()>;

    /// Queues a message without waiting for it to be delivered.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()>;

    /// Processes inbound traffic for at most `timeout`, handing every
    /// received message to `on_message`.
    fn poll(
        &mut self,
        timeout: Duration,
        on_message: &mut dyn FnMut(&str, &[u8]),
    ) -> anyhow::Result<()>;
}

/// Keeps a [`Broker`] connected by periodically replacing its session.
///
/// Nothing in here ever fails: errors are logged, and a link that is down is
/// retried on every [`NetworkLink::maybe_reconnect`]. The reconnect interval
/// only limits how often a live session is replaced.
#[derive(Debug)]
pub struct NetworkLink<B> {
    broker: B,
    connected: bool,
    last_connect: Option<Instant>,
    reconnect_interval: Duration,
    settle: Duration,
}

impl<B: Broker> NetworkLink<B> {
    pub fn new(broker: B) -> Self {
        Self {
            broker,
            connected: false,
            last_connect: None,
            reconnect_interval: Duration::from_secs(180),
            settle: Duration::from_secs(1),
        }
    }

    pub fn with_reconnect_interval(self, reconnect_interval: Duration) -> Self {
        Self {
            reconnect_interval,
            ..self
        }
    }

    /// Time to wait between dropping the old session and opening a new one.
    pub fn with_settle(self, settle: Duration) -> Self {
        Self { settle, ..self }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Reconnects if the link is down, if the last successful connection is
    /// older than the reconnect interval, or if `force` is set. Returns
    /// whether the link is up afterwards.
    pub fn maybe_reconnect(&mut self, force: bool) -> bool {
        let due = match self.last_connect {
            Some(last) if self.connected => last.elapsed() >= self.reconnect_interval,
            _ => true,
        };
        if !(due || force) {
            return true;
        }

        if self.connected {
            if let Err(error) = self.broker.disconnect() {
                log::debug!(target: NAME, "ignoring error while disconnecting: {error:#}");
            }
            self.connected = false;
            if !self.settle.is_zero() {
                thread::sleep(self.settle);
            }
        }

        match self.broker.connect() {
            Ok(()) => {
                log::info!(target: NAME, "connected to broker");
                self.connected = true;
                self.last_connect = Some(Instant::now());
            }
            Err(error) => {
                log::warn!(target: NAME, "failed to connect to broker: {error:#}");
            }
        }
        self.connected
    }

    /// Publishes if the link is up. Failures are logged.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) {
        if !self.connected {
            log::debug!(target: NAME, "not connected; dropping message for {topic}");
            return;
        }

        if let Err(error) = self.broker.publish(topic, payload) {
            log::warn!(target: NAME, "failed to publish to {topic}: {error:#}");
        }
    }

    /// Pumps inbound messages for at most `timeout`. A broken connection marks
    /// the link down, so the next reconnect replaces it.
    pub fn poll(&mut self, timeout: Duration, on_message: &mut dyn FnMut(&str, &[u8])) {
        if !self.connected {
            return;
        }

        if let Err(error) = self.broker.poll(timeout, on_message) {
            log::warn!(target: NAME, "broker connection lost: {error:#}");
            self.connected = false;
        }
    }
}
