//! Thread-safe metrics collection system
//!
//! Atomic counters plus a mutex-protected latency window for the message
//! pipeline, workflow routing, outbound sends, the sidecar connection and the
//! session lifecycle. A snapshot is served as JSON on `/metrics`.

use crate::protocol::WorkflowType;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

const MAX_LATENCY_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Inbound message pipeline
    messages_received: AtomicU64,
    messages_self_dropped: AtomicU64,
    messages_textless: AtomicU64,
    messages_ineligible: AtomicU64,
    messages_invalid_sender: AtomicU64,
    messages_routed: AtomicU64,
    messages_failed: AtomicU64,

    // Workflow routing
    routes_n8n: AtomicU64,
    routes_flowise: AtomicU64,
    fallback_config_unavailable: AtomicU64,
    fallback_unknown_type: AtomicU64,
    backend_failures: AtomicU64,
    backend_latencies: Mutex<Vec<u64>>, // in milliseconds

    // Outbound messages
    sends_ok: AtomicU64,
    sends_failed: AtomicU64,
    sends_not_connected: AtomicU64,
    notices_sent: AtomicU64,
    notices_failed: AtomicU64,

    // Sidecar broker connection
    mqtt_connected: AtomicBool,
    mqtt_connection_attempts: AtomicU64,
    mqtt_connection_failures: AtomicU64,
    mqtt_messages_published: AtomicU64,
    mqtt_publish_failures: AtomicU64,
    mqtt_messages_received: AtomicU64,

    // Session lifecycle
    session_state: Mutex<String>,
    state_transitions: AtomicU64,
    qr_codes_issued: AtomicU64,
    logouts: AtomicU64,
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_self_dropped: AtomicU64::new(0),
            messages_textless: AtomicU64::new(0),
            messages_ineligible: AtomicU64::new(0),
            messages_invalid_sender: AtomicU64::new(0),
            messages_routed: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            routes_n8n: AtomicU64::new(0),
            routes_flowise: AtomicU64::new(0),
            fallback_config_unavailable: AtomicU64::new(0),
            fallback_unknown_type: AtomicU64::new(0),
            backend_failures: AtomicU64::new(0),
            backend_latencies: Mutex::new(Vec::new()),
            sends_ok: AtomicU64::new(0),
            sends_failed: AtomicU64::new(0),
            sends_not_connected: AtomicU64::new(0),
            notices_sent: AtomicU64::new(0),
            notices_failed: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            mqtt_connection_attempts: AtomicU64::new(0),
            mqtt_connection_failures: AtomicU64::new(0),
            mqtt_messages_published: AtomicU64::new(0),
            mqtt_publish_failures: AtomicU64::new(0),
            mqtt_messages_received: AtomicU64::new(0),
            session_state: Mutex::new("disconnected".to_string()),
            state_transitions: AtomicU64::new(0),
            qr_codes_issued: AtomicU64::new(0),
            logouts: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Message pipeline
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_self_dropped(&self) {
        self.messages_self_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_textless(&self) {
        self.messages_textless.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_ineligible(&self) {
        self.messages_ineligible.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_invalid_sender(&self) {
        self.messages_invalid_sender.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_routed(&self, backend: WorkflowType, duration: Duration) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
        match backend {
            WorkflowType::N8n => self.routes_n8n.fetch_add(1, Ordering::Relaxed),
            WorkflowType::Flowise => self.routes_flowise.fetch_add(1, Ordering::Relaxed),
        };
        self.record_backend_latency(duration);
    }

    pub fn message_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Routing
    pub fn fallback_config_unavailable(&self) {
        self.fallback_config_unavailable
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_unknown_type(&self) {
        self.fallback_unknown_type.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backend_failed(&self, duration: Duration) {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);
        self.record_backend_latency(duration);
    }

    fn record_backend_latency(&self, duration: Duration) {
        if let Ok(mut times) = self.backend_latencies.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_LATENCY_SAMPLES {
                times.remove(0);
            }
        }
    }

    // Outbound
    pub fn send_succeeded(&self) {
        self.sends_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.sends_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_not_connected(&self) {
        self.sends_not_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notice_sent(&self) {
        self.notices_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notice_failed(&self) {
        self.notices_failed.fetch_add(1, Ordering::Relaxed);
    }

    // MQTT
    pub fn mqtt_connection_attempt(&self) {
        self.mqtt_connection_attempts
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.mqtt_connected.store(true, Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.mqtt_connection_failures
            .fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.mqtt_messages_published
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.mqtt_publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.mqtt_messages_received
            .fetch_add(1, Ordering::Relaxed);
    }

    // Session lifecycle
    pub fn set_session_state(&self, state: &str) {
        if let Ok(mut current) = self.session_state.lock() {
            if *current != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current = state.to_string();
            }
        }
    }

    pub fn qr_code_issued(&self) {
        self.qr_codes_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn logout_performed(&self) {
        self.logouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset everything (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.messages_received,
            &self.messages_self_dropped,
            &self.messages_textless,
            &self.messages_ineligible,
            &self.messages_invalid_sender,
            &self.messages_routed,
            &self.messages_failed,
            &self.routes_n8n,
            &self.routes_flowise,
            &self.fallback_config_unavailable,
            &self.fallback_unknown_type,
            &self.backend_failures,
            &self.sends_ok,
            &self.sends_failed,
            &self.sends_not_connected,
            &self.notices_sent,
            &self.notices_failed,
            &self.mqtt_connection_attempts,
            &self.mqtt_connection_failures,
            &self.mqtt_messages_published,
            &self.mqtt_publish_failures,
            &self.mqtt_messages_received,
            &self.state_transitions,
            &self.qr_codes_issued,
            &self.logouts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.backend_latencies.lock() {
            times.clear();
        }
        if let Ok(mut state) = self.session_state.lock() {
            *state = "disconnected".to_string();
        }
    }

    /// Average and percentile backend latencies (pure function)
    fn latency_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.backend_latencies.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted = times.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_backend_latency_ms, p50, p95, p99) = self.latency_statistics();
        let current_state = self
            .session_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string());

        MetricsSnapshot {
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                self_dropped: self.messages_self_dropped.load(Ordering::Relaxed),
                textless: self.messages_textless.load(Ordering::Relaxed),
                ineligible: self.messages_ineligible.load(Ordering::Relaxed),
                invalid_sender: self.messages_invalid_sender.load(Ordering::Relaxed),
                routed: self.messages_routed.load(Ordering::Relaxed),
                failed: self.messages_failed.load(Ordering::Relaxed),
            },
            routing: RoutingMetrics {
                n8n: self.routes_n8n.load(Ordering::Relaxed),
                flowise: self.routes_flowise.load(Ordering::Relaxed),
                fallback_config_unavailable: self
                    .fallback_config_unavailable
                    .load(Ordering::Relaxed),
                fallback_unknown_type: self.fallback_unknown_type.load(Ordering::Relaxed),
                backend_failures: self.backend_failures.load(Ordering::Relaxed),
                avg_backend_latency_ms,
                backend_latency_p50_ms: p50,
                backend_latency_p95_ms: p95,
                backend_latency_p99_ms: p99,
            },
            outbound: OutboundMetrics {
                sends_ok: self.sends_ok.load(Ordering::Relaxed),
                sends_failed: self.sends_failed.load(Ordering::Relaxed),
                sends_not_connected: self.sends_not_connected.load(Ordering::Relaxed),
                notices_sent: self.notices_sent.load(Ordering::Relaxed),
                notices_failed: self.notices_failed.load(Ordering::Relaxed),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.mqtt_connection_attempts.load(Ordering::Relaxed),
                connection_failures: self.mqtt_connection_failures.load(Ordering::Relaxed),
                messages_published: self.mqtt_messages_published.load(Ordering::Relaxed),
                publish_failures: self.mqtt_publish_failures.load(Ordering::Relaxed),
                messages_received: self.mqtt_messages_received.load(Ordering::Relaxed),
            },
            session: SessionMetrics {
                current_state,
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                qr_codes_issued: self.qr_codes_issued.load(Ordering::Relaxed),
                logouts: self.logouts.load(Ordering::Relaxed),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            },
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
    pub messages: MessageMetrics,
    pub routing: RoutingMetrics,
    pub outbound: OutboundMetrics,
    pub mqtt: MqttMetrics,
    pub session: SessionMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub self_dropped: u64,
    pub textless: u64,
    pub ineligible: u64,
    pub invalid_sender: u64,
    pub routed: u64,
    pub failed: u64,
}

#[derive(Debug, Serialize)]
pub struct RoutingMetrics {
    pub n8n: u64,
    pub flowise: u64,
    pub fallback_config_unavailable: u64,
    pub fallback_unknown_type: u64,
    pub backend_failures: u64,
    pub avg_backend_latency_ms: f64,
    pub backend_latency_p50_ms: f64,
    pub backend_latency_p95_ms: f64,
    pub backend_latency_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct OutboundMetrics {
    pub sends_ok: u64,
    pub sends_failed: u64,
    pub sends_not_connected: u64,
    pub notices_sent: u64,
    pub notices_failed: u64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connection_failures: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionMetrics {
    pub current_state: String,
    pub state_transitions: u64,
    pub qr_codes_issued: u64,
    pub logouts: u64,
    pub uptime_seconds: u64,
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

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
