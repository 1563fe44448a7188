//! Thread-safe metrics collection
//!
//! Atomic counters for broker connections, inbound dispatch and publishing,
//! plus a bounded window of handler execution times.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of handler execution times kept for percentile calculation
const EXECUTION_TIME_WINDOW: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and a mutex for timings
pub struct MetricsCollector {
    // MQTT
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    messages_received: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    inbound_backpressure: AtomicU64,

    // Dispatch
    messages_dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    dispatch_cancelled: AtomicU64,
    listeners_running: AtomicU64,
    execution_times: Mutex<Vec<u64>>, // milliseconds

    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            inbound_backpressure: AtomicU64::new(0),
            messages_dispatched: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            dispatch_cancelled: AtomicU64::new(0),
            listeners_running: AtomicU64::new(0),
            execution_times: Mutex::new(Vec::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Inbound queue was full and the event loop waited on a slow handler
    pub fn mqtt_inbound_backpressure(&self) {
        self.inbound_backpressure.fetch_add(1, Ordering::Relaxed);
    }

    // Dispatch metrics
    pub fn message_dispatched(&self, duration: Duration) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
        self.record_execution_time(duration);
    }

    pub fn dispatch_failed(&self, duration: Duration) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        self.record_execution_time(duration);
    }

    /// Failure reported after cancellation; suppressed rather than surfaced
    pub fn dispatch_cancelled(&self) {
        self.dispatch_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listener_started(&self) {
        self.listeners_running.fetch_add(1, Ordering::Relaxed);
    }

    pub fn listener_stopped(&self) {
        let _ = self
            .listeners_running
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    fn record_execution_time(&self, duration: Duration) {
        if let Ok(mut times) = self.execution_times.lock() {
            times.push(duration.as_millis() as u64);

            if times.len() > EXECUTION_TIME_WINDOW {
                times.remove(0);
            }
        }
    }

    /// Average, p50, p95, p99 of recorded execution times (pure function)
    fn calculate_execution_time_statistics(&self) -> (f64, f64, f64, f64) {
        let mut sorted = match self.execution_times.lock() {
            Ok(times) => times.clone(),
            Err(_) => return (0.0, 0.0, 0.0, 0.0),
        };
        if sorted.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }
        sorted.sort_unstable();

        let average = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            average,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    pub fn reset(&self) {
        for counter in [
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.messages_received,
            &self.messages_published,
            &self.publish_failures,
            &self.inbound_backpressure,
            &self.messages_dispatched,
            &self.dispatch_failures,
            &self.dispatch_cancelled,
            &self.listeners_running,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.started_at.store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.execution_times.lock() {
            times.clear();
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95, p99) = self.calculate_execution_time_statistics();

        MetricsSnapshot {
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                inbound_backpressure: self.inbound_backpressure.load(Ordering::Relaxed),
            },
            dispatch: DispatchMetrics {
                messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
                dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
                dispatch_cancelled: self.dispatch_cancelled.load(Ordering::Relaxed),
                listeners_running: self.listeners_running.load(Ordering::Relaxed),
                avg_execution_time_ms: avg,
                execution_time_p50_ms: p50,
                execution_time_p95_ms: p95,
                execution_time_p99_ms: p99,
            },
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub mqtt: MqttMetrics,
    pub dispatch: DispatchMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub messages_received: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub inbound_backpressure: u64,
}

#[derive(Debug, Serialize)]
pub struct DispatchMetrics {
    pub messages_dispatched: u64,
    pub dispatch_failures: u64,
    pub dispatch_cancelled: u64,
    pub listeners_running: u64,
    pub avg_execution_time_ms: f64,
    pub execution_time_p50_ms: f64,
    pub execution_time_p95_ms: f64,
    pub execution_time_p99_ms: f64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}
