//! Broker connection settings for the sidecar transport
//!
//! Pure configuration: turning [`SidecarOptions`] into rumqttc options and
//! computing reconnection delays. Nothing here touches the network.

use crate::protocol::ValidationError;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// State of the broker link (not the chat session)
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    /// Waiting for the first ConnAck
    Connecting,
    /// ConnAck received, subscriptions in place
    Connected,
    /// Link dropped, with reason
    Disconnected(String),
    /// Waiting before reconnection attempt N
    Reconnecting(u32),
    /// Supervisor stopped; the client must be bootstrapped again
    Closed,
}

/// Reconnection backoff
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delays in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Delay before `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let millis = self
            .backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay);
        Duration::from_millis(millis)
    }
}

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid sidecar session id: {0}")]
    InvalidSessionId(#[from] ValidationError),
    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Sidecar client has not been bootstrapped")]
    NotStarted,
    #[error("Broker link not connected - current state: {state:?}")]
    NotConnected { state: LinkState },
    #[error("Publishing to {topic} failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: rumqttc::v5::ClientError,
    },
    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),
}

/// Everything needed to reach the sidecar for one session
#[derive(Debug, Clone)]
pub struct SidecarOptions {
    /// `mqtt://host:port` or `mqtts://host:port`
    pub broker_url: String,
    /// Client id prefix; a timestamp is appended per connection
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic prefix shared with the sidecar
    pub topic_prefix: String,
    /// Sidecar session this bridge drives
    pub session_id: String,
    pub keep_alive: Duration,
    /// How long bootstrap waits for the broker ConnAck
    pub connect_timeout: Duration,
    /// How long bootstrap waits for the retained device record
    pub device_wait: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for SidecarOptions {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: "wabridge".to_string(),
            username: None,
            password: None,
            topic_prefix: "wabridge".to_string(),
            session_id: "main".to_string(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            device_wait: Duration::from_secs(2),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Split a broker URL into host, port and TLS flag
pub fn parse_broker_url(broker_url: &str) -> Result<(String, u16, bool), MqttError> {
    let url =
        Url::parse(broker_url).map_err(|_| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(broker_url.to_string())),
    };
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| MqttError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}

/// Build rumqttc options for one connection
pub fn configure_mqtt_options(options: &SidecarOptions) -> Result<MqttOptions, MqttError> {
    let (host, port, tls) = parse_broker_url(&options.broker_url)?;

    // Unique per connection so a stale session on the broker never collides
    let client_id = format!(
        "{}-{}-{}",
        options.client_id,
        options.session_id,
        chrono::Utc::now().timestamp_millis()
    );
    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &options.username {
        let password = options.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_pattern_then_sustained() {
        let config = ReconnectConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_millis(25));
        assert_eq!(config.backoff_delay(2), Duration::from_millis(50));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(100));
        assert_eq!(config.backoff_delay(4), Duration::from_millis(250));
        assert_eq!(config.backoff_delay(5), Duration::from_millis(250));
        assert_eq!(config.backoff_delay(500), Duration::from_millis(250));
    }

    #[test]
    fn test_empty_pattern_uses_sustained_delay() {
        let config = ReconnectConfig {
            backoff_pattern: vec![],
            sustained_delay: 40,
        };
        assert_eq!(config.backoff_delay(1), Duration::from_millis(40));
    }

    #[test]
    fn test_parse_broker_url() {
        assert_eq!(
            parse_broker_url("mqtt://broker.local").unwrap(),
            ("broker.local".to_string(), 1883, false)
        );
        assert_eq!(
            parse_broker_url("mqtts://broker.local").unwrap(),
            ("broker.local".to_string(), 8883, true)
        );
        assert_eq!(
            parse_broker_url("tcp://10.0.0.5:1884").unwrap(),
            ("10.0.0.5".to_string(), 1884, false)
        );
    }

    #[test]
    fn test_invalid_broker_urls() {
        for url in ["not a url", "http://broker.local", "mqtt://"] {
            assert!(
                matches!(parse_broker_url(url), Err(MqttError::InvalidBrokerUrl(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = SidecarOptions {
            username: Some("bridge".into()),
            password: Some("secret".into()),
            ..SidecarOptions::default()
        };
        let mqtt_options = configure_mqtt_options(&options).unwrap();
        assert!(mqtt_options.client_id().starts_with("wabridge-main-"));
        assert_eq!(mqtt_options.keep_alive(), Duration::from_secs(30));
    }
}
