//! Thread-safe bridge counters
//!
//! Atomic counters shared by the transport worker and the delta consumer.
//! A single [`BridgeMetrics`] is created per process and handed to each
//! component through an `Arc`, so counters survive settings restarts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct BridgeMetrics {
    // Delta reconciliation
    deltas_received: AtomicU64,
    deltas_malformed: AtomicU64,
    commands_failed: AtomicU64,
    commands_timed_out: AtomicU64,
    command_time_total_ms: AtomicU64,
    commands_completed: AtomicU64,
    reports_published: AtomicU64,
    publish_failures: AtomicU64,
    updates_rejected: AtomicU64,

    // MQTT
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    unexpected_disconnects: AtomicU64,
    subscriptions_requested: AtomicU64,
    messages_received: AtomicU64,

    // Lifecycle
    restarts: AtomicU64,

    last_report_at: Mutex<Option<DateTime<Utc>>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        let metrics = Self::default();
        metrics.set_timestamp(&metrics.started_at);
        metrics
    }

    fn set_timestamp(&self, slot: &Mutex<Option<DateTime<Utc>>>) {
        if let Ok(mut guard) = slot.lock() {
            *guard = Some(Utc::now());
        }
    }

    fn read_timestamp(slot: &Mutex<Option<DateTime<Utc>>>) -> Option<DateTime<Utc>> {
        slot.lock().ok().and_then(|guard| *guard)
    }

    pub fn delta_received(&self) {
        self.deltas_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delta_malformed(&self) {
        self.deltas_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_completed(&self, duration: Duration) {
        self.commands_completed.fetch_add(1, Ordering::Relaxed);
        self.command_time_total_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn command_failed(&self) {
        self.commands_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_timed_out(&self) {
        self.commands_timed_out.fetch_add(1, Ordering::Relaxed);
        self.commands_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_published(&self) {
        self.reports_published.fetch_add(1, Ordering::Relaxed);
        self.set_timestamp(&self.last_report_at);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_rejected(&self) {
        self.updates_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    /// Broker sent DISCONNECT with anything but a normal reason
    pub fn mqtt_unexpected_disconnect(&self) {
        self.unexpected_disconnects.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn subscriptions_requested(&self, count: usize) {
        self.subscriptions_requested
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn service_restarted(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_report_at(&self) -> Option<DateTime<Utc>> {
        Self::read_timestamp(&self.last_report_at)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.commands_completed.load(Ordering::Relaxed);
        let total_ms = self.command_time_total_ms.load(Ordering::Relaxed);
        let avg_command_time_ms = if completed == 0 {
            0.0
        } else {
            total_ms as f64 / completed as f64
        };

        let started_at = Self::read_timestamp(&self.started_at);
        let uptime_seconds = started_at
            .map(|start| (Utc::now() - start).num_seconds().max(0) as u64)
            .unwrap_or_default();

        MetricsSnapshot {
            deltas: DeltaMetrics {
                received: self.deltas_received.load(Ordering::Relaxed),
                malformed: self.deltas_malformed.load(Ordering::Relaxed),
                commands_completed: completed,
                commands_failed: self.commands_failed.load(Ordering::Relaxed),
                commands_timed_out: self.commands_timed_out.load(Ordering::Relaxed),
                avg_command_time_ms,
                reports_published: self.reports_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                updates_rejected: self.updates_rejected.load(Ordering::Relaxed),
                last_report_at: self.last_report_at(),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                unexpected_disconnects: self.unexpected_disconnects.load(Ordering::Relaxed),
                subscriptions_requested: self.subscriptions_requested.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
            },
            restarts: self.restarts.load(Ordering::Relaxed),
            uptime_seconds,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub deltas: DeltaMetrics,
    pub mqtt: MqttMetrics,
    pub restarts: u64,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DeltaMetrics {
    pub received: u64,
    pub malformed: u64,
    pub commands_completed: u64,
    pub commands_failed: u64,
    pub commands_timed_out: u64,
    pub avg_command_time_ms: f64,
    pub reports_published: u64,
    pub publish_failures: u64,
    pub updates_rejected: u64,
    pub last_report_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub unexpected_disconnects: u64,
    pub subscriptions_requested: u64,
    pub messages_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        let metrics = BridgeMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.deltas.received, 0);
        assert_eq!(snapshot.deltas.avg_command_time_ms, 0.0);
        assert!(snapshot.deltas.last_report_at.is_none());
        assert!(!snapshot.mqtt.connected);
    }

    #[test]
    fn test_command_timing_average() {
        let metrics = BridgeMetrics::new();
        metrics.command_completed(Duration::from_millis(100));
        metrics.command_completed(Duration::from_millis(300));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.deltas.commands_completed, 2);
        assert_eq!(snapshot.deltas.avg_command_time_ms, 200.0);
    }

    #[test]
    fn test_timeout_counts_as_failure() {
        let metrics = BridgeMetrics::new();
        metrics.command_timed_out();
        metrics.command_failed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.deltas.commands_timed_out, 1);
        assert_eq!(snapshot.deltas.commands_failed, 2);
    }

    #[test]
    fn test_report_published_records_timestamp() {
        let metrics = BridgeMetrics::new();
        let before = Utc::now();
        metrics.report_published();
        let recorded = metrics.last_report_at().unwrap();
        assert!(recorded >= before);
        assert_eq!(metrics.snapshot().deltas.reports_published, 1);
    }

    #[test]
    fn test_connection_flag_tracks_lifecycle() {
        let metrics = BridgeMetrics::new();
        metrics.mqtt_connection_attempt();
        metrics.mqtt_connection_established();
        assert!(metrics.snapshot().mqtt.connected);

        metrics.mqtt_connection_lost();
        assert!(!metrics.snapshot().mqtt.connected);

        metrics.mqtt_connection_failed();
        metrics.mqtt_unexpected_disconnect();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.mqtt.unexpected_disconnects, 1);
        assert_eq!(snapshot.mqtt.connection_attempts, 1);
        assert_eq!(snapshot.mqtt.connection_failures, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = BridgeMetrics::new();
        metrics.subscriptions_requested(2);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["mqtt"]["subscriptions_requested"], 2);
        assert!(json["deltas"]["last_report_at"].is_null());
    }
}
