//! Pure connection state management for MQTT client
//!
//! This module contains the connection state machine values, reconnect
//! backoff, TLS material loading and construction of the MQTT options.

use crate::config::{BridgeConfig, BrokerSection};
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Shadow documents are small; this leaves ample headroom for responses
const MAX_PACKET_SIZE: u32 = 128 * 1024;

/// Connection state for MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// ConnAck received, subscriptions requested
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Waiting to retry after a failed poll (consecutive failure count)
    Reconnecting(u32),
}

/// Reconnection backoff configuration
///
/// The transport retries indefinitely; this only shapes the delay between
/// attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![500, 1000, 2000, 5000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given consecutive failure (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Cannot read TLS material {path}: {source}")]
    TlsMaterial {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid TLS material {path}: {reason}")]
    InvalidTlsMaterial { path: PathBuf, reason: String },
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// PEM material for mutual TLS; all three parts are mandatory
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

impl TlsMaterial {
    pub fn load(broker: &BrokerSection) -> Result<Self, MqttError> {
        Ok(Self {
            ca: read_pem(&broker.ca_cert_path)?,
            client_cert: read_pem(&broker.client_cert_path)?,
            client_key: read_pem(&broker.client_key_path)?,
        })
    }

    fn into_transport(self, alpn: &[String]) -> RumqttcTransport {
        let alpn = if alpn.is_empty() {
            None
        } else {
            Some(alpn.iter().map(|p| p.as_bytes().to_vec()).collect())
        };
        RumqttcTransport::tls(self.ca, Some((self.client_cert, self.client_key)), alpn)
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, MqttError> {
    let bytes = std::fs::read(path).map_err(|source| MqttError::TlsMaterial {
        path: path.to_path_buf(),
        source,
    })?;

    if bytes.is_empty() {
        return Err(MqttError::InvalidTlsMaterial {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    if !String::from_utf8_lossy(&bytes).contains("-----BEGIN ") {
        return Err(MqttError::InvalidTlsMaterial {
            path: path.to_path_buf(),
            reason: "no PEM block found".to_string(),
        });
    }

    Ok(bytes)
}

/// Build MQTT v5 options for a session: TLS with client certificate,
/// configured keep alive, clean start.
pub fn configure_mqtt_options(config: &BridgeConfig) -> Result<MqttOptions, MqttError> {
    let tls = TlsMaterial::load(&config.broker)?;

    let mut mqtt_options = MqttOptions::new(
        config.client_id(),
        config.broker.host.clone(),
        config.broker.port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(config.broker.keepalive_secs));
    // Subscriptions are re-requested on every ConnAck, so no session state is needed
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));
    mqtt_options.set_transport(tls.into_transport(&config.broker.alpn));

    Ok(mqtt_options)
}
