//! Transport layer for shadow communication
//!
//! This module provides the publish/subscribe abstraction the shadow
//! components are written against, plus the MQTT implementation.

use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;

pub mod mqtt;

/// Publish/subscribe operations needed by the shadow components
///
/// Implemented by [`mqtt::MqttHandle`] for the live broker and by
/// `testing::MockTransport` so the reconciliation logic can be exercised
/// without a network.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Request a subscription; may wait for the local request queue but
    /// never for the broker's SubAck
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error>;

    /// Enqueue a publish; success means the local client accepted it
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error>;
}

/// An inbound publish as delivered to the single consumer
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new<T: Into<String>, P: Into<Bytes>>(topic: T, payload: P) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload as text for logging; invalid UTF-8 is replaced
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}
