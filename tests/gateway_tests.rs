mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use coxy::gateway::{GatewayConfig, GatewayRouter, HealthReport, HealthStatus};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::closed_port_url;

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

fn gateway(backend: &str, frontend: &str) -> Router {
    GatewayRouter::new(
        client(),
        GatewayConfig::new(backend, frontend).with_health_timeout(Duration::from_millis(200)),
    )
    .router()
}

async fn mount_root(server: &MockServer, status: u16) {
    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn healthz(app: Router) -> HealthReport {
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    serde_json::from_value(body_json(response).await).unwrap()
}

#[tokio::test]
async fn healthz_is_ok_when_both_services_answer() {
    let backend = MockServer::start().await;
    let frontend = MockServer::start().await;
    mount_root(&backend, 200).await;
    mount_root(&frontend, 204).await;

    let report = healthz(gateway(&backend.uri(), &frontend.uri())).await;

    assert_eq!(report.status, HealthStatus::Ok);
    assert_eq!(report.services["backend"].status, Some(200));
    assert_eq!(report.services["frontend"].status, Some(204));
    assert!(report.services.values().all(|s| s.ok));
}

#[tokio::test]
async fn healthz_counts_redirects_as_down() {
    let backend = MockServer::start().await;
    let frontend = MockServer::start().await;
    mount_root(&backend, 302).await;
    mount_root(&frontend, 200).await;

    let report = healthz(gateway(&backend.uri(), &frontend.uri())).await;

    assert_eq!(report.status, HealthStatus::Degraded);
    let backend = &report.services["backend"];
    assert!(!backend.ok);
    assert_eq!(backend.status, Some(302));
    assert_eq!(backend.error, None);
    assert!(report.services["frontend"].ok);
}

#[tokio::test]
async fn healthz_is_degraded_when_a_service_is_down() {
    let frontend = MockServer::start().await;
    mount_root(&frontend, 200).await;

    let report = healthz(gateway(&closed_port_url(), &frontend.uri())).await;

    assert_eq!(report.status, HealthStatus::Degraded);
    let backend = &report.services["backend"];
    assert!(!backend.ok);
    assert_eq!(backend.status, None);
    assert!(backend.error.is_some());
    assert!(report.services["frontend"].ok);
}

#[tokio::test]
async fn healthz_treats_server_errors_and_slow_services_as_down() {
    let backend = MockServer::start().await;
    let frontend = MockServer::start().await;
    mount_root(&backend, 503).await;
    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&frontend)
        .await;

    let started = std::time::Instant::now();
    let report = healthz(gateway(&backend.uri(), &frontend.uri())).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.services["backend"].status, Some(503));
    assert!(!report.services["backend"].ok);
    assert_eq!(
        report.services["frontend"].error.as_deref(),
        Some("timed out after 200ms")
    );
}

#[tokio::test]
async fn api_requests_reach_the_backend_with_headers_and_query() {
    let backend = MockServer::start().await;
    let frontend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat/completions"))
        .and(query_param("stream", "true"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .insert_header("x-request-id", "req-1")
                .set_body_json(json!({ "ok": true })),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let response = gateway(&backend.uri(), &frontend.uri())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat/completions?stream=true")
                .header(header::AUTHORIZATION, "Bearer caller-key")
                .header(header::CONNECTION, "keep-alive")
                .body(Body::from(r#"{"messages":[]}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-1");
    assert_eq!(body_json(response).await, json!({ "ok": true }));

    let received = backend.received_requests().await.unwrap();
    assert_eq!(received[0].headers["authorization"], "Bearer caller-key");
    assert_eq!(received[0].body, br#"{"messages":[]}"#);
    assert!(frontend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn api_prefix_is_rewritten_for_the_backend() {
    let backend = MockServer::start().await;
    let frontend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_string("models"))
        .expect(1)
        .mount(&backend)
        .await;
    let app = GatewayRouter::new(
        client(),
        GatewayConfig::new(backend.uri(), frontend.uri()).with_rewrite_prefix("/v1"),
    )
    .router();

    let response = app
        .oneshot(Request::builder().uri("/api/models").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn other_paths_reach_the_frontend() {
    let backend = MockServer::start().await;
    let frontend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api-keys"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html></html>"),
        )
        .expect(1)
        .mount(&frontend)
        .await;

    let response = gateway(&backend.uri(), &frontend.uri())
        .oneshot(Request::builder().uri("/api-keys").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
    assert!(backend.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn redirects_are_passed_through_unfollowed() {
    let backend = MockServer::start().await;
    let frontend = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(307).insert_header("location", "/elsewhere"))
        .mount(&frontend)
        .await;

    let response = gateway(&backend.uri(), &frontend.uri())
        .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], "/elsewhere");
}

#[tokio::test]
async fn upstream_status_is_relayed_verbatim() {
    let backend = MockServer::start().await;
    let frontend = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/things/1"))
        .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
        .mount(&backend)
        .await;

    let response = gateway(&backend.uri(), &frontend.uri())
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/things/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"gone");
}

#[tokio::test]
async fn unreachable_service_is_bad_gateway() {
    let frontend = MockServer::start().await;

    let response = gateway(&closed_port_url(), &frontend.uri())
        .oneshot(Request::builder().uri("/api/models").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        body_json(response).await,
        json!({ "error": "Bad Gateway", "message": "Upstream service unavailable" })
    );
}

#[tokio::test]
async fn unsupported_methods_are_rejected() {
    let backend = MockServer::start().await;
    let frontend = MockServer::start().await;

    let response = gateway(&backend.uri(), &frontend.uri())
        .oneshot(
            Request::builder()
                .method("TRACE")
                .uri("/api/models")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(backend.received_requests().await.unwrap().is_empty());
}
