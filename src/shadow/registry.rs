//! Subscription registry
//!
//! Runs on every ConnAck, not just the first: a clean-start session keeps no
//! subscriptions across reconnects.

use super::topics::ShadowTopics;
use crate::transport::Transport;
use rumqttc::v5::mqttbytes::QoS;
use tracing::{debug, error};

pub struct SubscriptionRegistry {
    topics: ShadowTopics,
}

impl SubscriptionRegistry {
    pub fn new(topics: ShadowTopics) -> Self {
        Self { topics }
    }

    pub fn topics(&self) -> &ShadowTopics {
        &self.topics
    }

    /// Request the delta and rejected subscriptions at QoS 1.
    ///
    /// Failures are logged and not retried; the next reconnect resubscribes.
    /// Returns how many requests were accepted by the transport.
    pub async fn subscribe_all<T: Transport>(&self, transport: &T) -> usize {
        let mut accepted = 0;
        for topic in self.topics.subscriptions() {
            match transport.subscribe(topic, QoS::AtLeastOnce).await {
                Ok(()) => {
                    debug!(target: "mqtt_transport", "Subscription requested: {}", topic);
                    accepted += 1;
                }
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", topic, e);
                }
            }
        }
        accepted
    }
}
