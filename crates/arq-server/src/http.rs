// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP admin facade.
//!
//! Read-only status/version/metrics plus key-gated lifecycle actions.
//! Admin routes check `X-API-Key` against the configured key and answer
//! 401 on any mismatch; lifecycle actions are scheduled, not performed
//! inline, so the HTTP response always goes out first.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::metrics::HttpMetrics;

/// Lifecycle action requested through the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminSignal {
    /// Stop the process.
    Shutdown,
    /// Restart the process.
    Restart,
}

/// Shared facade state.
#[derive(Clone)]
pub struct AdminState {
    /// Expected `X-API-Key` value; admin routes refuse when unset.
    pub api_key: Option<String>,
    /// Request metrics.
    pub metrics: Arc<HttpMetrics>,
    /// Server start time.
    pub started_at: DateTime<Utc>,
    /// Where lifecycle requests land.
    pub signals: mpsc::UnboundedSender<AdminSignal>,
}

impl AdminState {
    /// State plus the receiving end of the lifecycle channel.
    #[must_use]
    pub fn new(api_key: Option<String>) -> (Self, mpsc::UnboundedReceiver<AdminSignal>) {
        let (signals, rx) = mpsc::unbounded_channel();
        (
            Self {
                api_key,
                metrics: Arc::new(HttpMetrics::new()),
                started_at: Utc::now(),
                signals,
            },
            rx,
        )
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.api_key else {
            return false;
        };
        headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|presented| presented == expected)
    }
}

async fn track_requests(State(state): State<AdminState>, req: Request<Body>, next: Next) -> Response {
    let endpoint = req.uri().path().to_owned();
    let start = Instant::now();
    let response = next.run(req).await;
    state
        .metrics
        .record(&endpoint, response.status().as_u16(), start.elapsed());
    response
}

async fn get_status(State(state): State<AdminState>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    Json(json!({
        "service": "arqonbus",
        "status": "ok",
        "uptime_seconds": uptime,
        "requests": state.metrics.request_stats(),
    }))
}

async fn get_version() -> impl IntoResponse {
    Json(json!({
        "service": "arqonbus",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_prometheus_metrics(State(state): State<AdminState>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.render_prometheus(),
    )
}

async fn admin_shutdown(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    admin_action(&state, &headers, AdminSignal::Shutdown)
}

async fn admin_restart(State(state): State<AdminState>, headers: HeaderMap) -> Response {
    admin_action(&state, &headers, AdminSignal::Restart)
}

fn admin_action(state: &AdminState, headers: &HeaderMap, signal: AdminSignal) -> Response {
    if !state.authorized(headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid API key" })))
            .into_response();
    }

    info!(?signal, "admin lifecycle action scheduled");
    let _ = state.signals.send(signal);
    let action = match signal {
        AdminSignal::Shutdown => "shutdown scheduled",
        AdminSignal::Restart => "restart scheduled",
    };
    (StatusCode::OK, Json(json!({ "status": action }))).into_response()
}

/// Build the facade router.
pub fn build_admin_app(state: AdminState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/version", get(get_version))
        .route("/metrics/prometheus", get(get_prometheus_metrics))
        .route("/admin/shutdown", post(admin_shutdown))
        .route("/admin/restart", post(admin_restart))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
