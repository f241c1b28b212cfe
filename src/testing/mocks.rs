//! Mock implementations for testing
//!
//! [`MockTransport`] records subscriptions and publishes in memory and
//! [`MockExecutor`] plays back scripted device replies, so the shadow logic
//! can be exercised without a broker or a media player.

use crate::jsonrpc::{CommandError, CommandExecutor};
use crate::transport::mqtt::MqttError;
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub type PublishedMessage = (String, Vec<u8>, QoS);

/// Mock transport for testing; clones share their history
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    pub subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub fail_publish: bool,
    pub fail_subscribe: bool,
    /// Simulates waiting for room in a full request queue
    pub subscribe_delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_publish_failure() -> Self {
        Self {
            fail_publish: true,
            ..Default::default()
        }
    }

    pub fn with_subscribe_failure() -> Self {
        Self {
            fail_subscribe: true,
            ..Default::default()
        }
    }

    pub fn with_subscribe_delay(mut self, delay: Duration) -> Self {
        self.subscribe_delay = Some(delay);
        self
    }

    pub async fn get_subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().await.clone()
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    /// Published payloads parsed as JSON, in publish order
    pub async fn get_published_json(&self) -> Vec<(String, Value)> {
        self.published_messages
            .lock()
            .await
            .iter()
            .map(|(topic, payload, _)| {
                let value = serde_json::from_slice(payload).unwrap_or(Value::Null);
                (topic.clone(), value)
            })
            .collect()
    }

}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        if self.fail_subscribe {
            return Err(MqttError::SubscriptionFailed("Mock subscribe failure".into()));
        }
        if let Some(delay) = self.subscribe_delay {
            tokio::time::sleep(delay).await;
        }
        self.subscriptions.lock().await.push((topic.to_string(), qos));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error> {
        if self.fail_publish {
            return Err(MqttError::PublishFailed("Mock publish failure".into()));
        }
        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload, qos));
        Ok(())
    }
}

/// A scripted executor reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Serialized and returned as the response
    Json(Value),
    /// Returned verbatim, for malformed-response cases
    Raw(String),
    /// Fails the call with [`CommandError::Http`]
    Fail(String),
    /// Never answers
    Hang,
}

/// Mock command executor
///
/// Replies are consumed in order; once the queue is empty every call gets a
/// `{"result": "OK"}` response echoing the request id.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    requests: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn push_reply(&self, reply: MockReply) {
        self.replies.lock().await.push_back(reply);
    }

    /// Raw request strings in call order
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }

    pub async fn request_values(&self) -> Vec<Value> {
        self.requests
            .lock()
            .await
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap_or(Value::Null))
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(&self, request: &str) -> Result<String, CommandError> {
        self.requests.lock().await.push(request.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.replies.lock().await.pop_front();
        match reply {
            Some(MockReply::Json(value)) => Ok(value.to_string()),
            Some(MockReply::Raw(raw)) => Ok(raw),
            Some(MockReply::Fail(message)) => Err(CommandError::Http(message)),
            Some(MockReply::Hang) => std::future::pending().await,
            None => {
                let id = serde_json::from_str::<Value>(request)
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or(Value::Null);
                Ok(json!({"jsonrpc": "2.0", "id": id, "result": "OK"}).to_string())
            }
        }
    }
}
