//! Shadow delta reconciliation
//!
//! One inbound message in, at most one control call and one report out.
//! Called by a single consumer, so deltas are handled strictly in delivery
//! order and each one finishes (call, response, publish) before the next.

use super::document::{DeltaEvent, RejectedUpdate, ShadowUpdate};
use super::publisher::StatePublisher;
use super::topics::{ShadowTopics, TopicKind};
use crate::error::ShadowError;
use crate::jsonrpc::{CommandError, CommandExecutor, ControlRequest, ControlResponse};
use crate::observability::BridgeMetrics;
use crate::transport::{InboundMessage, Transport};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};

/// What happened to a single inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Command executed and reported state enqueued
    Reported,
    /// Command executed but the report could not be published
    PublishFailed,
    /// No usable response from the device; nothing published
    CommandFailed,
    /// Delta payload could not be parsed; nothing executed
    Malformed,
    /// Shadow service rejected an earlier update
    Rejected,
    /// Topic is not one we act on
    Ignored,
}

pub struct ShadowDeltaHandler<E: CommandExecutor, T: Transport> {
    topics: ShadowTopics,
    executor: Arc<E>,
    publisher: StatePublisher<T>,
    command_timeout: Duration,
    metrics: Arc<BridgeMetrics>,
}

impl<E: CommandExecutor, T: Transport> ShadowDeltaHandler<E, T> {
    pub fn new(
        topics: ShadowTopics,
        executor: Arc<E>,
        transport: Arc<T>,
        command_timeout: Duration,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        let publisher = StatePublisher::new(transport, topics.update());
        Self {
            topics,
            executor,
            publisher,
            command_timeout,
            metrics,
        }
    }

    pub fn topics(&self) -> &ShadowTopics {
        &self.topics
    }

    /// Handle one inbound message. Never fails: every error is logged and
    /// reported through the returned outcome.
    pub async fn handle(&self, message: &InboundMessage) -> HandleOutcome {
        match self.topics.classify(&message.topic) {
            TopicKind::Delta => {
                let span = crate::delta_span!(topic = %message.topic, bytes = message.payload.len());
                self.handle_delta(message).instrument(span).await
            }
            TopicKind::Rejected => self.handle_rejected(message),
            TopicKind::Other => {
                debug!(topic = %message.topic, "Ignoring message on unhandled topic");
                HandleOutcome::Ignored
            }
        }
    }

    async fn handle_delta(&self, message: &InboundMessage) -> HandleOutcome {
        self.metrics.delta_received();

        let delta = match DeltaEvent::parse(&message.topic, &message.payload) {
            Ok(delta) => delta,
            Err(e) => {
                self.metrics.delta_malformed();
                warn!(error = %e, payload = %message.payload_lossy(), "Dropping malformed delta");
                return HandleOutcome::Malformed;
            }
        };

        info!(method = delta.method().unwrap_or("<none>"), "Received shadow delta");

        let response = match self.execute(&delta).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Control command failed, no report published");
                return HandleOutcome::CommandFailed;
            }
        };

        let update = ShadowUpdate::report(delta.state, response);
        match self.publisher.publish(&update).await {
            Ok(()) => {
                self.metrics.report_published();
                info!(topic = %self.publisher.topic(), "Reported state published");
                HandleOutcome::Reported
            }
            Err(_) => {
                // Already logged by the publisher
                self.metrics.publish_failed();
                HandleOutcome::PublishFailed
            }
        }
    }

    /// Run the control request under the command timeout and return the
    /// response with its envelope fields removed
    async fn execute(&self, delta: &DeltaEvent) -> Result<Value, ShadowError> {
        let request = ControlRequest::from_state(&delta.state);
        let request_json = request.to_json()?;
        debug!(request = %request_json, "Executing control request");

        let started = Instant::now();
        let raw = match tokio::time::timeout(
            self.command_timeout,
            self.executor.execute(&request_json),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                self.metrics.command_failed();
                return Err(e.into());
            }
            Err(_) => {
                self.metrics.command_timed_out();
                return Err(CommandError::Timeout {
                    timeout_ms: self.command_timeout.as_millis() as u64,
                }
                .into());
            }
        };

        let response = match ControlResponse::parse(&raw) {
            Ok(response) => response,
            Err(e) => {
                self.metrics.command_failed();
                return Err(e.into());
            }
        };
        self.metrics.command_completed(started.elapsed());

        if response.is_error() {
            // Device errors are still reported so the shadow converges
            warn!(response = %raw, "Device returned a JSON-RPC error");
        }

        Ok(response.into_device_state())
    }

    fn handle_rejected(&self, message: &InboundMessage) -> HandleOutcome {
        self.metrics.update_rejected();

        let error = match RejectedUpdate::parse(&message.payload) {
            Some(rejected) => ShadowError::Rejected {
                code: rejected.code,
                message: rejected
                    .message
                    .unwrap_or_else(|| "no message".to_string()),
            },
            None => ShadowError::Rejected {
                code: None,
                message: message.payload_lossy().into_owned(),
            },
        };

        error!(topic = %message.topic, "{}", error);
        HandleOutcome::Rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockExecutor, MockReply, MockTransport};
    use serde_json::json;

    const DELTA: &str = "things/kodi/shadow/update/delta";
    const REJECTED: &str = "things/kodi/shadow/update/rejected";

    fn handler(
        executor: MockExecutor,
        transport: Arc<MockTransport>,
    ) -> (ShadowDeltaHandler<MockExecutor, MockTransport>, Arc<BridgeMetrics>) {
        let metrics = Arc::new(BridgeMetrics::new());
        let handler = ShadowDeltaHandler::new(
            ShadowTopics::new("", "kodi"),
            Arc::new(executor),
            transport,
            Duration::from_millis(200),
            metrics.clone(),
        );
        (handler, metrics)
    }

    #[tokio::test]
    async fn test_delta_is_executed_and_reported() {
        let executor = MockExecutor::new();
        executor
            .push_reply(MockReply::Json(json!({"jsonrpc": "2.0", "id": 1, "result": "OK"})))
            .await;
        let transport = Arc::new(MockTransport::new());
        let (handler, metrics) = handler(executor.clone(), transport.clone());

        let outcome = handler
            .handle(&InboundMessage::new(
                DELTA,
                r#"{"state":{"method":"Player.Stop","params":{"playerid":1}}}"#,
            ))
            .await;

        assert_eq!(outcome, HandleOutcome::Reported);
        assert_eq!(
            executor.request_values().await,
            vec![json!({"jsonrpc": "2.0", "id": 1, "method": "Player.Stop", "params": {"playerid": 1}})]
        );
        let published = transport.get_published_messages().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "things/kodi/shadow/update");
        assert_eq!(metrics.snapshot().deltas.reports_published, 1);
    }

    #[tokio::test]
    async fn test_malformed_delta_executes_nothing() {
        let executor = MockExecutor::new();
        let transport = Arc::new(MockTransport::new());
        let (handler, metrics) = handler(executor.clone(), transport.clone());

        let outcome = handler.handle(&InboundMessage::new(DELTA, "not json")).await;

        assert_eq!(outcome, HandleOutcome::Malformed);
        assert!(executor.requests().await.is_empty());
        assert!(transport.get_published_messages().await.is_empty());
        assert_eq!(metrics.snapshot().deltas.malformed, 1);
    }

    #[tokio::test]
    async fn test_rejected_is_logged_only() {
        let executor = MockExecutor::new();
        let transport = Arc::new(MockTransport::new());
        let (handler, metrics) = handler(executor.clone(), transport.clone());

        let outcome = handler
            .handle(&InboundMessage::new(
                REJECTED,
                r#"{"code":400,"message":"Payload contains invalid json"}"#,
            ))
            .await;

        assert_eq!(outcome, HandleOutcome::Rejected);
        assert!(executor.requests().await.is_empty());
        assert!(transport.get_published_messages().await.is_empty());
        assert_eq!(metrics.snapshot().deltas.updates_rejected, 1);
    }

    #[tokio::test]
    async fn test_rejected_with_unparseable_body() {
        let transport = Arc::new(MockTransport::new());
        let (handler, _) = handler(MockExecutor::new(), transport.clone());

        let outcome = handler.handle(&InboundMessage::new(REJECTED, "<html>")).await;
        assert_eq!(outcome, HandleOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_other_topic_ignored() {
        let executor = MockExecutor::new();
        let transport = Arc::new(MockTransport::new());
        let (handler, _) = handler(executor.clone(), transport.clone());

        let outcome = handler
            .handle(&InboundMessage::new(
                "things/kodi/shadow/update",
                r#"{"state":{"method":"Player.Stop"}}"#,
            ))
            .await;

        assert_eq!(outcome, HandleOutcome::Ignored);
        assert!(executor.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_executor_failure_publishes_nothing() {
        let executor = MockExecutor::new();
        executor
            .push_reply(MockReply::Fail("connection refused".to_string()))
            .await;
        let transport = Arc::new(MockTransport::new());
        let (handler, metrics) = handler(executor, transport.clone());

        let outcome = handler
            .handle(&InboundMessage::new(DELTA, r#"{"state":{"method":"Player.Stop"}}"#))
            .await;

        assert_eq!(outcome, HandleOutcome::CommandFailed);
        assert!(transport.get_published_messages().await.is_empty());
        assert_eq!(metrics.snapshot().deltas.commands_failed, 1);
    }

    #[tokio::test]
    async fn test_non_object_response_publishes_nothing() {
        let executor = MockExecutor::new();
        executor.push_reply(MockReply::Raw("[1,2]".to_string())).await;
        let transport = Arc::new(MockTransport::new());
        let (handler, _) = handler(executor, transport.clone());

        let outcome = handler
            .handle(&InboundMessage::new(DELTA, r#"{"state":{"method":"Player.Stop"}}"#))
            .await;

        assert_eq!(outcome, HandleOutcome::CommandFailed);
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout() {
        let executor = MockExecutor::new().with_delay(Duration::from_secs(5));
        let transport = Arc::new(MockTransport::new());
        let (handler, metrics) = handler(executor, transport.clone());

        let outcome = handler
            .handle(&InboundMessage::new(DELTA, r#"{"state":{"method":"Player.Stop"}}"#))
            .await;

        assert_eq!(outcome, HandleOutcome::CommandFailed);
        assert!(transport.get_published_messages().await.is_empty());
        assert_eq!(metrics.snapshot().deltas.commands_timed_out, 1);
    }

    #[tokio::test]
    async fn test_publish_failure_outcome() {
        let transport = Arc::new(MockTransport::with_publish_failure());
        let (handler, metrics) = handler(MockExecutor::new(), transport);

        let outcome = handler
            .handle(&InboundMessage::new(DELTA, r#"{"state":{"method":"Player.Stop"}}"#))
            .await;

        assert_eq!(outcome, HandleOutcome::PublishFailed);
        assert_eq!(metrics.snapshot().deltas.publish_failures, 1);
    }
}
