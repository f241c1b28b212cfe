//! Reported-state publisher
//!
//! Serializes a [`ShadowUpdate`] and hands it to the transport at QoS 1.
//! Failures are returned for the caller to log; nothing is retried.

use super::document::ShadowUpdate;
use crate::error::ShadowError;
use crate::transport::Transport;
use rumqttc::v5::mqttbytes::QoS;
use std::sync::Arc;
use tracing::{debug, error};

pub type PublishResult = Result<(), ShadowError>;

pub struct StatePublisher<T: Transport> {
    transport: Arc<T>,
    topic: String,
}

impl<T: Transport> StatePublisher<T> {
    pub fn new<S: Into<String>>(transport: Arc<T>, topic: S) -> Self {
        Self {
            transport,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish to the shadow update topic
    pub async fn publish(&self, update: &ShadowUpdate) -> PublishResult {
        self.publish_to(&self.topic, update, QoS::AtLeastOnce).await
    }

    pub async fn publish_to(&self, topic: &str, update: &ShadowUpdate, qos: QoS) -> PublishResult {
        let payload = update
            .to_payload()
            .map_err(|e| ShadowError::publish(topic, e))?;
        let size = payload.len();

        match self.transport.publish(topic, payload, qos).await {
            Ok(()) => {
                debug!(topic = %topic, bytes = size, "Reported state enqueued");
                Ok(())
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "Failed to publish reported state");
                Err(ShadowError::publish(topic, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::{json, Map, Value};

    fn update() -> ShadowUpdate {
        let mut state = Map::new();
        state.insert("method".to_string(), json!("Player.Stop"));
        ShadowUpdate::report(state, json!({"result": "OK"}))
    }

    #[tokio::test]
    async fn test_publish_uses_update_topic_and_qos1() {
        let transport = Arc::new(MockTransport::new());
        let publisher = StatePublisher::new(transport.clone(), "things/kodi/shadow/update");

        publisher.publish(&update()).await.unwrap();

        let published = transport.get_published_messages().await;
        assert_eq!(published.len(), 1);
        let (topic, payload, qos) = &published[0];
        assert_eq!(topic, "things/kodi/shadow/update");
        assert_eq!(*qos, QoS::AtLeastOnce);

        let body: Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(body["state"]["reported"]["response"], json!({"result": "OK"}));
        assert!(body["state"]["desired"].is_null());
    }

    #[tokio::test]
    async fn test_publish_failure_is_returned() {
        let transport = Arc::new(MockTransport::with_publish_failure());
        let publisher = StatePublisher::new(transport.clone(), "things/kodi/shadow/update");

        let err = publisher.publish(&update()).await.unwrap_err();
        assert!(matches!(err, ShadowError::Publish { .. }));
        assert!(transport.get_published_messages().await.is_empty());
    }
}
