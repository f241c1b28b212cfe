//! Impure I/O operations for the MQTT client
//!
//! Owns the rumqttc event loop. A single transport worker polls it, routes
//! every event through [`MessageHandler`] and forwards inbound publishes to
//! the delta consumer over an unbounded channel, so polling never waits on
//! command execution. Subscriptions are requested from a task spawned on
//! each ConnAck, since the request queue only drains while the worker polls.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::BridgeConfig;
use crate::observability::BridgeMetrics;
use crate::shadow::{ShadowTopics, SubscriptionRegistry};
use crate::transport::{InboundMessage, Transport};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::ConnectReturnCode;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of the rumqttc request queue
const REQUEST_CAPACITY: usize = 10;

/// Time given to the event loop to flush DISCONNECT (and any queued
/// publish) before the worker is told to stop
const DISCONNECT_FLUSH: Duration = Duration::from_millis(200);

const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Cloneable request handle onto a running session
#[derive(Clone, Debug)]
pub struct MqttHandle {
    client: AsyncClient,
}

impl MqttHandle {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for MqttHandle {
    type Error = MqttError;

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Self::Error> {
        // Waits for room in the request queue, never for the SubAck
        self.client
            .subscribe(topic, qos)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> Result<(), Self::Error> {
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }
}

/// MQTT session for one configuration
pub struct MqttClient {
    config: Arc<BridgeConfig>,
    metrics: Arc<BridgeMetrics>,
    reconnect_config: ReconnectConfig,
    client: Option<AsyncClient>,
    worker_handle: Option<JoinHandle<()>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl MqttClient {
    pub fn new(config: Arc<BridgeConfig>, metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            config,
            metrics,
            reconnect_config: ReconnectConfig::default(),
            client: None,
            worker_handle: None,
            state_tx: None,
            state_rx: None,
            shutdown_tx: None,
        }
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    /// Start the transport worker.
    ///
    /// Fails only if the options cannot be built (for example unreadable TLS
    /// material). Broker reachability is not awaited here: the worker keeps
    /// retrying with backoff and subscribes once a ConnAck arrives. Use
    /// [`MqttClient::wait_for_connection`] to block until then.
    pub fn connect(
        &mut self,
        inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<MqttHandle, MqttError> {
        if self.client.is_some() {
            return Err(MqttError::ConnectionFailedStr(
                "Client already connected".to_string(),
            ));
        }

        let mqtt_options = configure_mqtt_options(&self.config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let handle = MqttHandle::new(client.clone());

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = TransportWorker {
            transport: handle.clone(),
            registry: Arc::new(SubscriptionRegistry::new(ShadowTopics::from_config(
                &self.config,
            ))),
            subscribe_task: None,
            state_tx: state_tx.clone(),
            inbound_tx,
            metrics: self.metrics.clone(),
            reconnect_config: self.reconnect_config.clone(),
            failures: 0,
        };

        let span = crate::mqtt_span!(
            client_id = %self.config.client_id(),
            broker = %self.config.broker.host,
            port = self.config.broker.port
        );
        self.metrics.mqtt_connection_attempt();
        self.worker_handle = Some(tokio::spawn(
            worker.run(event_loop, shutdown_rx).instrument(span),
        ));

        self.client = Some(client);
        self.state_tx = Some(state_tx);
        self.state_rx = Some(state_rx);
        self.shutdown_tx = Some(shutdown_tx);

        info!(
            "MQTT session started for {}:{}",
            self.config.broker.host, self.config.broker.port
        );
        Ok(handle)
    }

    /// Wait until the broker has acknowledged the connection.
    ///
    /// Reconnect attempts in between do not fail the wait; only the timeout
    /// or the worker going away does.
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<(), MqttError> {
        let mut state_rx = self.state_rx.clone().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Client not started".to_string())
        })?;

        let result = tokio::time::timeout(timeout, async {
            loop {
                if *state_rx.borrow_and_update() == ConnectionState::Connected {
                    return Ok(());
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(MqttError::NotConnected {
                state: state_rx.borrow().clone(),
            }),
        }
    }

    /// Graceful disconnect: DISCONNECT is queued, given a moment to flush,
    /// then the worker is stopped. Safe to call repeatedly.
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        let Some(client) = self.client.take() else {
            debug!("Disconnect requested on a client that is not connected");
            return Ok(());
        };

        if let Err(e) = client.try_disconnect() {
            warn!("Failed to queue MQTT DISCONNECT: {}", e);
        }
        tokio::time::sleep(DISCONNECT_FLUSH).await;

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
            debug!("Sent shutdown signal to transport worker");
        }

        if let Some(handle) = self.worker_handle.take() {
            let abort_handle = handle.abort_handle();
            match tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {
                    debug!("Transport worker shut down gracefully");
                }
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Transport worker ended with error: {}", e);
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Transport worker didn't shut down gracefully, forcing abort");
                    abort_handle.abort();
                }
            }
        }

        if let Some(state_tx) = self.state_tx.take() {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }
        self.metrics.mqtt_connection_lost();

        info!("MQTT client disconnected");
        Ok(())
    }

    /// Current connection state, `None` before [`MqttClient::connect`]
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(handle) = self.worker_handle.take() {
            handle.abort();
        }
    }
}

/// State owned by the transport worker task
struct TransportWorker<T: Transport + Clone + 'static> {
    transport: T,
    registry: Arc<SubscriptionRegistry>,
    /// Subscription requests for the latest ConnAck
    subscribe_task: Option<JoinHandle<()>>,
    state_tx: watch::Sender<ConnectionState>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    metrics: Arc<BridgeMetrics>,
    reconnect_config: ReconnectConfig,
    /// Consecutive poll failures since the last ConnAck
    failures: u32,
}

impl<T: Transport + Clone + 'static> TransportWorker<T> {
    async fn run(mut self, mut event_loop: EventLoop, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Starting MQTT transport worker");

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping transport worker");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if !self.process_event_route(route).await {
                                break;
                            }
                        }
                        Err(e) => {
                            if !self.handle_poll_error(e, shutdown_rx.clone()).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        if let Some(task) = self.subscribe_task.take() {
            task.abort();
        }
        info!("MQTT transport worker stopped");
    }

    /// Request the shadow subscriptions without blocking the poll loop.
    /// A request still pending from an earlier ConnAck is superseded.
    fn spawn_subscriptions(&mut self) {
        if let Some(previous) = self.subscribe_task.take() {
            previous.abort();
        }

        let registry = self.registry.clone();
        let transport = self.transport.clone();
        let metrics = self.metrics.clone();
        self.subscribe_task = Some(tokio::spawn(
            async move {
                let requested = registry.subscribe_all(&transport).await;
                metrics.subscriptions_requested(requested);
            }
            .in_current_span(),
        ));
    }

    /// Returns false when the worker should stop
    async fn process_event_route(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged {
                session_present,
                code,
            } => {
                if code != ConnectReturnCode::Success {
                    let reason = MessageHandler::describe_connack(code);
                    error!("{}", reason);
                    self.metrics.mqtt_connection_failed();
                    let _ = self.state_tx.send(ConnectionState::Disconnected(reason));
                    return true;
                }

                info!(session_present, "Connected to MQTT broker");
                self.failures = 0;
                self.metrics.mqtt_connection_established();
                let _ = self.state_tx.send(ConnectionState::Connected);
                self.spawn_subscriptions();
                true
            }
            EventRoute::MessageReceived(message) => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", message.topic);
                self.metrics.mqtt_message_received();
                if self.inbound_tx.send(message).is_err() {
                    warn!("Delta consumer has gone away, stopping transport worker");
                    return false;
                }
                true
            }
            EventRoute::Disconnected { reason } => {
                if MessageHandler::is_unexpected_disconnect(reason) {
                    error!("Broker disconnected us: {:?}", reason);
                    self.metrics.mqtt_unexpected_disconnect();
                } else {
                    info!("Broker closed the connection normally");
                    self.metrics.mqtt_connection_lost();
                }
                let _ = self
                    .state_tx
                    .send(ConnectionState::Disconnected(format!("{reason:?}")));
                true
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                reason_codes,
            } => {
                match MessageHandler::validate_subscription_success(&reason_codes) {
                    Ok(granted) => {
                        debug!(target: "mqtt_transport", "Subscription {} confirmed: {:?}", packet_id, granted)
                    }
                    Err(e) => error!("Subscription {} refused: {}", packet_id, e),
                }
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Back off before the next poll, which makes rumqttc reconnect.
    /// Returns false if shutdown was requested while waiting.
    async fn handle_poll_error(
        &mut self,
        error: rumqttc::v5::ConnectionError,
        shutdown_rx: watch::Receiver<bool>,
    ) -> bool {
        let was_connected = *self.state_tx.borrow() == ConnectionState::Connected;
        self.failures = self.failures.saturating_add(1);
        let delay_ms = self.reconnect_config.calculate_backoff_delay(self.failures);

        if was_connected {
            error!(delay_ms, "MQTT connection lost: {}; reconnecting", error);
            self.metrics.mqtt_unexpected_disconnect();
        } else {
            warn!(
                attempt = self.failures,
                delay_ms, "MQTT connection error: {}; retrying", error
            );
            self.metrics.mqtt_connection_failed();
        }
        let _ = self
            .state_tx
            .send(ConnectionState::Reconnecting(self.failures));

        if !interruptible_sleep(shutdown_rx, delay_ms).await {
            return false;
        }
        self.metrics.mqtt_connection_attempt();
        true
    }
}

/// Sleep unless shutdown is signalled first.
/// Returns true if the sleep completed.
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
