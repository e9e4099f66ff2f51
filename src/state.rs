//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor.
//!
//! ## What is shared:
//! - **Configuration**: `Arc<AppConfig>`, resolved at startup and never mutated
//! - **Transcriber**: `Arc<dyn Transcriber>`, one pooled HTTP client for all connections
//! - **Transient storage**: just a directory path; every relay gets its own file
//! - **Metrics**: `Arc<RwLock<AppMetrics>>`, the only mutable shared data
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many handlers and actors hold a reference)
//! - **RwLock**: Many concurrent readers OR one writer
//! - Metric updates hold the write lock for a few additions only

use crate::config::AppConfig;
use crate::relay::TransientStorage;
use crate::transcription::Transcriber;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// The main application state that's shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub transcriber: Arc<dyn Transcriber>,
    pub storage: TransientStorage,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Counters collected across HTTP requests and WebSocket relays.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// HTTP requests that ended with a 4xx/5xx status
    pub error_count: u64,

    /// WebSocket connections currently open
    pub active_connections: u32,

    /// Relay outcomes across all connections
    pub relay: RelayMetrics,

    /// Per-route statistics, keyed by e.g. "GET /health"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Outcome counters for relay operations.
#[derive(Debug, Default, Clone)]
pub struct RelayMetrics {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Payloads rejected before any transcription was attempted
    pub rejected: u64,
    pub total_duration_ms: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, transcriber: Arc<dyn Transcriber>, storage: TransientStorage) -> Self {
        Self {
            config: Arc::new(config),
            transcriber,
            storage,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    // A panic while holding the metrics lock leaves plain counters behind,
    // which are still fine to read and update.
    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one finished HTTP request (called by the metrics middleware).
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn connection_opened(&self) {
        self.metrics_write().active_connections += 1;
    }

    pub fn connection_closed(&self) {
        let mut metrics = self.metrics_write();
        metrics.active_connections = metrics.active_connections.saturating_sub(1);
    }

    /// Record one completed relay (success or failure).
    pub fn record_relay(&self, bytes: usize, elapsed: Duration, succeeded: bool) {
        let mut metrics = self.metrics_write();
        let relay = &mut metrics.relay;
        relay.total += 1;
        relay.total_bytes += bytes as u64;
        relay.total_duration_ms += elapsed.as_millis() as u64;
        if succeeded {
            relay.succeeded += 1;
        } else {
            relay.failed += 1;
        }
    }

    /// Record a message answered with a protocol error.
    pub fn record_rejected_message(&self) {
        self.metrics_write().relay.rejected += 1;
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl RelayMetrics {
    pub fn average_duration_ms(&self) -> f64 {
        if self.total > 0 {
            self.total_duration_ms as f64 / self.total as f64
        } else {
            0.0
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total > 0 {
            self.failed as f64 / self.total as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
