//! Bridge service lifecycle
//!
//! A session is one MQTT client plus one delta worker built from a single
//! configuration. Settings changes tear the session down and build a new
//! one; there is no in-place reconfiguration.

use super::worker::DeltaWorker;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::jsonrpc::{CommandError, CommandExecutor};
use crate::observability::BridgeMetrics;
use crate::shadow::{ShadowDeltaHandler, ShadowTopics};
use crate::transport::mqtt::{ConnectionState, MqttClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Period of the liveness check
pub const LIVENESS_TICK: Duration = Duration::from_secs(1);

/// Added to the command timeout when joining the delta worker, so an
/// in-flight message always ends through its own timeout first
const WORKER_SHUTDOWN_MARGIN: Duration = Duration::from_secs(2);

struct Session {
    client: MqttClient,
    worker_shutdown: watch::Sender<bool>,
    worker_handle: JoinHandle<u64>,
}

/// Owns the running session and reacts to settings and shutdown signals.
///
/// The executor is rebuilt from configuration on every start through
/// `executor_factory`, so device settings follow reloads too.
pub struct BridgeService<E, F>
where
    E: CommandExecutor + 'static,
    F: Fn(&BridgeConfig) -> Result<E, CommandError>,
{
    config: Arc<BridgeConfig>,
    metrics: Arc<BridgeMetrics>,
    executor_factory: F,
    session: Option<Session>,
}

impl<E, F> BridgeService<E, F>
where
    E: CommandExecutor + 'static,
    F: Fn(&BridgeConfig) -> Result<E, CommandError>,
{
    pub fn new(config: BridgeConfig, metrics: Arc<BridgeMetrics>, executor_factory: F) -> Self {
        Self {
            config: Arc::new(config),
            metrics,
            executor_factory,
            session: None,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.session
            .as_ref()
            .and_then(|session| session.client.connection_state())
    }

    /// Build a session from the current configuration. A no-op if one is
    /// already running.
    pub async fn start(&mut self) -> BridgeResult<()> {
        if self.session.is_some() {
            debug!("Start requested while already running");
            return Ok(());
        }

        let span = crate::lifecycle_span!(event = "start", thing = %self.config.thing.name);
        async move {
            // Build the executor before connecting so a bad device section
            // never leaves a half-started session behind
            let executor = Arc::new((self.executor_factory)(&self.config)?);

            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let mut client = MqttClient::new(self.config.clone(), self.metrics.clone());
            let transport = Arc::new(client.connect(inbound_tx)?);

            let handler = ShadowDeltaHandler::new(
                ShadowTopics::from_config(&self.config),
                executor,
                transport,
                self.config.device.command_timeout(),
                self.metrics.clone(),
            );

            let (worker_shutdown, shutdown_rx) = watch::channel(false);
            let worker = DeltaWorker::new(handler, inbound_rx, shutdown_rx);
            let worker_handle = tokio::spawn(worker.run().in_current_span());

            self.session = Some(Session {
                client,
                worker_shutdown,
                worker_handle,
            });
            info!("Bridge service started");
            Ok::<(), BridgeError>(())
        }
        .instrument(span)
        .await
    }

    /// Stop the delta worker, then disconnect. Idempotent.
    pub async fn stop(&mut self) -> BridgeResult<()> {
        let Some(mut session) = self.session.take() else {
            debug!("Stop requested while not running");
            return Ok(());
        };

        let span = crate::lifecycle_span!(event = "stop", thing = %self.config.thing.name);
        let grace = worker_grace(&self.config);
        async move {
            stop_worker(&session.worker_shutdown, session.worker_handle, grace).await;
            session.client.disconnect().await?;
            info!("Bridge service stopped");
            Ok::<(), BridgeError>(())
        }
        .instrument(span)
        .await
    }

    /// Replace the configuration and restart. Invalid or unchanged settings
    /// leave the running session alone.
    pub async fn restart(&mut self, config: BridgeConfig) -> BridgeResult<()> {
        if config == *self.config && self.session.is_some() {
            debug!("Settings unchanged, not restarting");
            return Ok(());
        }
        config.validate()?;

        info!(thing = %config.thing.name, "Settings changed, restarting bridge");
        self.stop().await?;
        self.config = Arc::new(config);
        self.metrics.service_restarted();
        self.start().await
    }

    /// Main loop: start, then follow settings changes until shutdown.
    ///
    /// A failed start is logged and the service waits for the next settings
    /// change instead of exiting.
    pub async fn run(
        &mut self,
        mut settings_rx: watch::Receiver<BridgeConfig>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> BridgeResult<()> {
        if let Err(e) = self.start().await {
            error!("Failed to start bridge, waiting for new settings: {}", e);
        }

        let mut settings_open = true;
        let mut last_state = self.connection_state();
        let mut liveness = tokio::time::interval(LIVENESS_TICK);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown requested");
                        break;
                    }
                }

                changed = settings_rx.changed(), if settings_open => {
                    if changed.is_err() {
                        debug!("Settings source closed");
                        settings_open = false;
                        continue;
                    }
                    let config = settings_rx.borrow_and_update().clone();
                    if let Err(e) = self.restart(config).await {
                        error!("Failed to apply new settings: {}", e);
                    }
                }

                _ = liveness.tick() => {
                    self.check_liveness(&mut last_state).await;
                }
            }
        }

        self.stop().await
    }

    /// Log connection transitions and rebuild the session if its worker died
    async fn check_liveness(&mut self, last_state: &mut Option<ConnectionState>) {
        let state = self.connection_state();
        if state != *last_state {
            match &state {
                Some(ConnectionState::Connected) => info!("Bridge connected"),
                Some(ConnectionState::Reconnecting(attempt)) => {
                    warn!(attempt, "Bridge reconnecting")
                }
                Some(ConnectionState::Disconnected(reason)) => {
                    warn!(reason = %reason, "Bridge disconnected")
                }
                Some(ConnectionState::Connecting) => debug!("Bridge connecting"),
                None => debug!("Bridge not running"),
            }
            *last_state = state;
        }

        let worker_finished = self
            .session
            .as_ref()
            .is_some_and(|session| session.worker_handle.is_finished());
        if worker_finished {
            error!("Delta worker exited unexpectedly, restarting session");
            if let Err(e) = self.stop().await {
                error!("Failed to stop dead session: {}", e);
            }
            self.metrics.service_restarted();
            if let Err(e) = self.start().await {
                error!("Failed to restart bridge: {}", e);
            }
        }
    }
}

/// How long `stop` waits for the delta worker before aborting it
fn worker_grace(config: &BridgeConfig) -> Duration {
    config.device.command_timeout() + WORKER_SHUTDOWN_MARGIN
}

/// Signal the delta worker and join it. The worker finishes the message it
/// is on before observing the signal; it is aborted only past `grace`.
async fn stop_worker(
    worker_shutdown: &watch::Sender<bool>,
    worker_handle: JoinHandle<u64>,
    grace: Duration,
) -> Option<u64> {
    let _ = worker_shutdown.send(true);
    let abort_handle = worker_handle.abort_handle();
    match tokio::time::timeout(grace, worker_handle).await {
        Ok(Ok(handled)) => {
            debug!(handled, "Delta worker joined");
            Some(handled)
        }
        Ok(Err(e)) => {
            if !e.is_cancelled() {
                error!("Delta worker ended with error: {}", e);
            }
            None
        }
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "Delta worker didn't stop in time, aborting");
            abort_handle.abort();
            None
        }
    }
}
