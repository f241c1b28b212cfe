//! MQTT v5 client for the shadow service
//!
//! Pure functions are kept apart from I/O so most behaviour can be tested
//! without a broker:
//!
//! - [`connection`] - connection state values, backoff, TLS material and options
//! - [`message_handler`] - pure routing of rumqttc events
//! - [`client`] - the transport worker and session lifecycle
//!
//! # Usage
//!
//! ```rust,no_run
//! use shadowlink::config::BridgeConfig;
//! use shadowlink::observability::BridgeMetrics;
//! use shadowlink::transport::mqtt::MqttClient;
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = Arc::new(BridgeConfig::load_from_file(Path::new("shadowlink.toml"))?);
//! let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! let mut client = MqttClient::new(config, Arc::new(BridgeMetrics::new()));
//! let _handle = client.connect(inbound_tx)?;
//! client.wait_for_connection(Duration::from_secs(10)).await?;
//!
//! if let Some(message) = inbound_rx.recv().await {
//!     println!("{}: {}", message.topic, message.payload_lossy());
//! }
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttClient, MqttHandle};
pub use connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
pub use message_handler::{EventRoute, MessageHandler};
