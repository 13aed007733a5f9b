//! # Application State Management
//!
//! Shared state accessible from every HTTP handler and call session: the
//! loaded configuration and the gateway-wide metrics counters. Everything
//! mutable sits behind `Arc<RwLock<T>>` so concurrent sessions and the
//! operational endpoints can read without coordination.
//!
//! Call sessions themselves share nothing with each other; the only state
//! they touch here is the counters below, so one call's failure can never
//! leak into another.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Gateway state shared across HTTP handlers and call sessions.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<RwLock<AppConfig>>,

    /// Gateway-wide metrics, updated by middleware and call sessions.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the gateway started (for uptime reporting).
    pub start_time: Instant,
}

/// Counters surfaced on the operational endpoints.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total HTTP requests processed since start.
    pub request_count: u64,

    /// Total HTTP errors since start.
    pub error_count: u64,

    /// Phone calls currently bridged.
    pub active_calls: u32,

    /// Phone calls handled since start.
    pub calls_total: u64,

    /// Tool invocations dispatched on behalf of the AI.
    pub tool_calls_total: u64,

    /// AI audio chunks dropped because they failed transcoding.
    pub chunks_dropped_total: u64,

    /// Caller audio frames discarded before the AI session was ready.
    pub frames_discarded_total: u64,

    /// Per-endpoint request statistics, keyed by "METHOD /path".
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Request statistics for a single endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; cloning releases the lock
    /// immediately so sessions never block each other on it.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A telephony `start` event established a call.
    pub fn call_started(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_calls += 1;
        metrics.calls_total += 1;
    }

    /// A call session tore down. Underflow-guarded so a double teardown
    /// never wraps the gauge.
    pub fn call_ended(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_calls > 0 {
            metrics.active_calls -= 1;
        }
    }

    pub fn record_tool_call(&self) {
        self.metrics.write().unwrap().tool_calls_total += 1;
    }

    pub fn add_dropped_chunks(&self, count: u64) {
        self.metrics.write().unwrap().chunks_dropped_total += count;
    }

    pub fn record_discarded_frame(&self) {
        self.metrics.write().unwrap().frames_discarded_total += 1;
    }

    /// Consistent copy of the metrics for serialization, so no lock is held
    /// while the HTTP response is built.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_calls: metrics.active_calls,
            calls_total: metrics.calls_total,
            tool_calls_total: metrics.tool_calls_total,
            chunks_dropped_total: metrics.chunks_dropped_total,
            frames_discarded_total: metrics.frames_discarded_total,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
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
