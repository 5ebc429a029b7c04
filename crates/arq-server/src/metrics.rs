// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request metrics for the HTTP facade.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use serde_json::{Value, json};

/// Per-endpoint counters mirrored into the `/status` body.
#[derive(Debug, Default, Clone, Copy)]
struct EndpointStats {
    count: u64,
    errors: u64,
}

/// Counters and histograms for every facade route, backed by a private
/// Prometheus registry so multiple servers can coexist in one process.
pub struct HttpMetrics {
    registry: Registry,
    requests: IntCounterVec,
    errors: IntCounterVec,
    duration: HistogramVec,
    stats: RwLock<BTreeMap<String, EndpointStats>>,
}

impl HttpMetrics {
    /// Fresh metrics with their own registry.
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by endpoint"),
            &["endpoint"],
        )
        .unwrap();
        let errors = IntCounterVec::new(
            Opts::new("http_errors_total", "HTTP error responses by endpoint"),
            &["endpoint"],
        )
        .unwrap();
        let duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "Request latency by endpoint"),
            &["endpoint"],
        )
        .unwrap();

        registry.register(Box::new(requests.clone())).unwrap();
        registry.register(Box::new(errors.clone())).unwrap();
        registry.register(Box::new(duration.clone())).unwrap();

        Self {
            registry,
            requests,
            errors,
            duration,
            stats: RwLock::new(BTreeMap::new()),
        }
    }

    /// Record one completed request.
    pub fn record(&self, endpoint: &str, status: u16, elapsed: Duration) {
        self.requests.with_label_values(&[endpoint]).inc();
        self.duration
            .with_label_values(&[endpoint])
            .observe(elapsed.as_secs_f64());

        let is_error = status >= 400;
        if is_error {
            self.errors.with_label_values(&[endpoint]).inc();
        }

        if let Ok(mut stats) = self.stats.write() {
            let entry = stats.entry(endpoint.to_string()).or_default();
            entry.count += 1;
            if is_error {
                entry.errors += 1;
            }
        }
    }

    /// Prometheus text exposition of every tracked metric.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// JSON request statistics for the `/status` body.
    #[must_use]
    pub fn request_stats(&self) -> Value {
        let stats = match self.stats.read() {
            Ok(stats) => stats,
            Err(poisoned) => poisoned.into_inner(),
        };
        let total: u64 = stats.values().map(|s| s.count).sum();
        let errors: u64 = stats.values().map(|s| s.errors).sum();
        let by_endpoint: BTreeMap<String, Value> = stats
            .iter()
            .map(|(endpoint, s)| {
                (
                    endpoint.clone(),
                    json!({ "count": s.count, "errors": s.errors }),
                )
            })
            .collect();

        json!({
            "total_requests": total,
            "error_count": errors,
            "requests_by_endpoint": by_endpoint,
        })
    }
}

impl Default for HttpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HttpMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMetrics").finish_non_exhaustive()
    }
}
