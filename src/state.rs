//! # Application State Management
//!
//! Shared state accessed by every HTTP handler and WebSocket session:
//! configuration, streaming metrics, and the server start time.
//!
//! ## Thread Safety Pattern:
//! All mutable data lives behind `Arc<RwLock<T>>` - many readers or one
//! writer at a time. Handlers clone snapshots out instead of holding locks
//! across await points, so a slow response can never block a playback
//! session's metrics update.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime).
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and streaming metrics, updated by middleware and sessions.
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started. Instant is Copy, so no lock is needed.
    pub start_time: Instant,
}

/// Counters collected across all HTTP requests and playback sessions.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start.
    pub request_count: u64,

    /// Total number of request errors since server start.
    pub error_count: u64,

    /// Playback sessions currently holding a connection.
    pub active_stream_sessions: u32,

    /// Playback sessions that have finished, however they ended.
    pub stream_sessions_total: u64,

    /// Audio bytes sent across all finished playback sessions.
    pub bytes_streamed: u64,

    /// Chunks sent across all finished playback sessions.
    pub chunks_streamed: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path".
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
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

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately; AppConfig is cheap to
    /// clone.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after re-validation.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Called by middleware for every request.
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Called when any request produces an error response.
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A playback connection was accepted.
    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_stream_sessions += 1;
    }

    /// A playback connection closed.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_stream_sessions > 0 {
            metrics.active_stream_sessions -= 1;
        }
    }

    /// Fold one finished playback session into the running totals.
    pub fn record_stream_totals(&self, bytes_sent: u64, chunks_sent: u64) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.stream_sessions_total += 1;
        metrics.bytes_streamed += bytes_sent;
        metrics.chunks_streamed += chunks_sent;
    }

    /// Consistent copy of the metrics for the health/metrics endpoints.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_stream_sessions: metrics.active_stream_sessions,
            stream_sessions_total: metrics.stream_sessions_total,
            bytes_streamed: metrics.bytes_streamed,
            chunks_streamed: metrics.chunks_streamed,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average = total duration / request count.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint in [0.0, 1.0].
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters() {
        let state = AppState::new(AppConfig::default());

        state.increment_active_sessions();
        state.increment_active_sessions();
        state.decrement_active_sessions();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.active_stream_sessions, 1);

        // Underflow-protected.
        state.decrement_active_sessions();
        state.decrement_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_stream_sessions, 0);
    }

    #[test]
    fn test_stream_totals_accumulate() {
        let state = AppState::new(AppConfig::default());

        state.record_stream_totals(17640, 10);
        state.record_stream_totals(320, 1);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.stream_sessions_total, 2);
        assert_eq!(snapshot.bytes_streamed, 17960);
        assert_eq!(snapshot.chunks_streamed, 11);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());

        state.record_endpoint_request("GET /health", 5, false);
        state.record_endpoint_request("GET /health", 15, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = snapshot.endpoint_metrics.get("GET /health").unwrap();
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 10.0);
        assert_eq!(metric.error_rate(), 0.5);
    }
}
