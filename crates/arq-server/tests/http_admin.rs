// SPDX-License-Identifier: MIT OR Apache-2.0
//! Admin facade: routes, API-key gate, and request tracking.

use arq_server::http::{AdminSignal, AdminState, build_admin_app};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn version_reports_service_and_version() {
    let (state, _rx) = AdminState::new(None);
    let app = build_admin_app(state);

    let response = app
        .oneshot(Request::builder().uri("/version").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let payload = body_json(response).await;
    assert_eq!(payload["service"], "arqonbus");
    assert_eq!(payload["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn status_tracks_per_endpoint_request_counts() {
    let (state, _rx) = AdminState::new(None);
    let app = build_admin_app(state);

    app.clone()
        .oneshot(Request::builder().uri("/version").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let payload = body_json(response).await;

    assert_eq!(payload["service"], "arqonbus");
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["requests"]["requests_by_endpoint"]["/version"]["count"], 1);
}

#[tokio::test]
async fn prometheus_endpoint_exports_counters() {
    let (state, _rx) = AdminState::new(None);
    let app = build_admin_app(state);

    app.clone()
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics/prometheus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("http_requests_total"));
    assert!(text.contains("http_request_duration_seconds"));
}

#[tokio::test]
async fn admin_shutdown_denies_without_api_key() {
    let (state, mut rx) = AdminState::new(Some("secret-key".to_string()));
    let app = build_admin_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/shutdown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn admin_shutdown_authorized_schedules_signal() {
    let (state, mut rx) = AdminState::new(Some("secret-key".to_string()));
    let app = build_admin_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/shutdown")
                .header("x-api-key", "secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(rx.try_recv().unwrap(), AdminSignal::Shutdown);
}

#[tokio::test]
async fn admin_restart_accepts_mixed_case_header() {
    let (state, mut rx) = AdminState::new(Some("secret-key".to_string()));
    let app = build_admin_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/restart")
                .header("X-API-Key", "secret-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(rx.try_recv().unwrap(), AdminSignal::Restart);
}

#[tokio::test]
async fn wrong_api_key_is_rejected() {
    let (state, mut rx) = AdminState::new(Some("secret-key".to_string()));
    let app = build_admin_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/shutdown")
                .header("x-api-key", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(rx.try_recv().is_err());
}
