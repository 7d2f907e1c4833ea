//! Broker frame source.
//!
//! Subscribes to the camera gateway topic (`CameraGateway.{camera}.Frame` by
//! default) and decodes each published payload (JPEG or PNG) into a `Frame`.
//!
//! - An undecodable payload is logged and skipped (`Ok(None)`).
//! - A broker connection error ends the source; there is no reconnect loop here.
//! - `mqtts://` / `ssl://` brokers are reached over TLS with the platform roots.

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS, RecvTimeoutError, Transport};
use std::time::{Duration, Instant};
use url::Url;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

pub const DEFAULT_TOPIC_TEMPLATE: &str = "CameraGateway.{camera}.Frame";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTTS_PORT: u16 = 8883;

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const REQUEST_QUEUE: usize = 10;

/// Configuration for a broker source.
#[derive(Clone, Debug)]
pub struct MqttConfig {
    /// Broker URL, `mqtt://host[:port]`, `tcp://host[:port]`, or `mqtts://` / `ssl://` for TLS.
    pub broker_url: String,
    pub topic: String,
    pub client_id: String,
    /// How long one `next_frame` call waits for broker traffic.
    pub poll_interval: Duration,
    pub keep_alive: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: format!("mqtt://localhost:{}", DEFAULT_MQTT_PORT),
            topic: frame_topic(DEFAULT_TOPIC_TEMPLATE, 1),
            client_id: "overlayd".to_string(),
            poll_interval: Duration::from_millis(50),
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// Substitute the camera id into a topic template.
pub fn frame_topic(template: &str, camera_id: u32) -> String {
    template.replace("{camera}", &camera_id.to_string())
}

/// Where and how to reach a broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl BrokerEndpoint {
    /// Client options for this endpoint, with the transport already selected.
    pub fn options(&self, client_id: &str) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        if self.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

/// Parse a broker URL (`mqtt`, `tcp`, `mqtts`, `ssl`).
pub fn broker_endpoint(broker_url: &str) -> Result<BrokerEndpoint> {
    let url = Url::parse(broker_url).with_context(|| format!("parse broker url {}", broker_url))?;
    let (use_tls, default_port) = match url.scheme() {
        "mqtt" | "tcp" => (false, DEFAULT_MQTT_PORT),
        "mqtts" | "ssl" => (true, DEFAULT_MQTTS_PORT),
        other => bail!(
            "unsupported broker scheme '{}'; expected mqtt, tcp, mqtts or ssl",
            other
        ),
    };
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| anyhow!("broker url {} has no host", broker_url))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok(BrokerEndpoint {
        host: host.to_string(),
        port: url.port().unwrap_or(default_port),
        use_tls,
    })
}

pub struct MqttFrameSource {
    config: MqttConfig,
    endpoint: BrokerEndpoint,
    client: Option<Client>,
    connection: Option<Connection>,
    frame_count: u64,
    rejected: u64,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl MqttFrameSource {
    pub fn new(config: MqttConfig) -> Result<Self> {
        let endpoint = broker_endpoint(&config.broker_url)?;
        if config.topic.trim().is_empty() {
            bail!("frame topic must not be empty");
        }
        Ok(Self {
            config,
            endpoint,
            client: None,
            connection: None,
            frame_count: 0,
            rejected: 0,
            connected_at: None,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn decode(&mut self, payload: &[u8]) -> Option<Frame> {
        if payload.len() > MAX_FRAME_BYTES {
            self.rejected += 1;
            log::warn!(
                "MqttFrameSource: dropping {} byte payload (limit {})",
                payload.len(),
                MAX_FRAME_BYTES
            );
            return None;
        }
        match image::load_from_memory(payload) {
            Ok(decoded) => {
                self.frame_count += 1;
                self.last_frame_at = Some(Instant::now());
                Some(Frame::from_rgb_image(decoded.to_rgb8(), self.frame_count))
            }
            Err(e) => {
                self.rejected += 1;
                log::warn!("MqttFrameSource: undecodable frame payload: {}", e);
                None
            }
        }
    }
}

impl FrameSource for MqttFrameSource {
    fn connect(&mut self) -> Result<()> {
        let mut options = self.endpoint.options(&self.config.client_id);
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_FRAME_BYTES + 1024, MAX_FRAME_BYTES + 1024);

        let (client, connection) = Client::new(options, REQUEST_QUEUE);
        client
            .subscribe(&self.config.topic, QoS::AtMostOnce)
            .context("subscribe to frame topic")?;
        self.client = Some(client);
        self.connection = Some(connection);
        self.connected_at = Some(Instant::now());
        log::info!(
            "MqttFrameSource: subscribed to {} on {}:{} (tls={})",
            self.config.topic,
            self.endpoint.host,
            self.endpoint.port,
            self.endpoint.use_tls
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let poll = self.config.poll_interval;
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| anyhow!("MqttFrameSource: next_frame before connect"))?;

        let event = match connection.recv_timeout(poll) {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                self.last_error = Some(e.to_string());
                return Err(anyhow!("broker connection lost: {}", e));
            }
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.last_error = Some("event loop disconnected".to_string());
                bail!("broker event loop disconnected");
            }
        };

        match event {
            Event::Incoming(Packet::Publish(publish)) if publish.topic == self.config.topic => {
                Ok(self.decode(&publish.payload))
            }
            Event::Incoming(Packet::ConnAck(_)) => {
                log::debug!("MqttFrameSource: broker acknowledged connection");
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        match self.last_frame_at {
            Some(last) => last.elapsed() <= Duration::from_secs(5),
            None => connected_at.elapsed() <= Duration::from_secs(5),
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_rejected: self.rejected,
            source: format!("{} [{}]", self.config.broker_url, self.config.topic),
        }
    }
}

impl Drop for MqttFrameSource {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            let _ = client.disconnect();
        }
    }
}
