//! The single delta consumer
//!
//! Drains the inbound channel one message at a time. A message is fully
//! handled before the next is received, so deltas are applied and reported
//! in broker delivery order.

use crate::jsonrpc::CommandExecutor;
use crate::shadow::{HandleOutcome, ShadowDeltaHandler};
use crate::transport::{InboundMessage, Transport};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub struct DeltaWorker<E: CommandExecutor, T: Transport> {
    handler: ShadowDeltaHandler<E, T>,
    inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<E: CommandExecutor, T: Transport> DeltaWorker<E, T> {
    pub fn new(
        handler: ShadowDeltaHandler<E, T>,
        inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handler,
            inbound_rx,
            shutdown_rx,
        }
    }

    /// Run until shutdown is signalled or the transport side closes.
    /// Returns the number of messages handled.
    pub async fn run(mut self) -> u64 {
        info!(
            delta_topic = %self.handler.topics().delta(),
            "Delta worker started"
        );
        let mut handled = 0u64;

        loop {
            tokio::select! {
                // Shutdown wins over queued messages
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping delta worker");
                        break;
                    }
                }

                message = self.inbound_rx.recv() => {
                    let Some(message) = message else {
                        info!("Inbound channel closed, stopping delta worker");
                        break;
                    };
                    let outcome = self.handler.handle(&message).await;
                    handled += 1;
                    if outcome != HandleOutcome::Reported {
                        debug!(?outcome, topic = %message.topic, "Message handled without report");
                    }
                }
            }
        }

        info!(handled, "Delta worker stopped");
        handled
    }
}
