//! HTTP API tests driving the router in-process
//!
//! Run with: cargo test --test http_api_tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use beacon_api::create_router;
use beacon_core::models::Instance;
use beacon_core::{Config, ManualClock};
use beacon_registry::discovery::FnProbe;
use beacon_registry::{InMemoryStore, Services};

fn test_app() -> (Router, Arc<AtomicBool>) {
    let down = Arc::new(AtomicBool::new(false));
    let flag = down.clone();
    let probe = FnProbe::new(move |_: &Instance| {
        if flag.load(Ordering::SeqCst) {
            Err("connection refused".to_string())
        } else {
            Ok(())
        }
    });

    let mut config = Config::default();
    config.health_check.interval_ms = 0;
    let services = Services::with_store(
        &config,
        Arc::new(InMemoryStore::new()),
        ManualClock::starting_now(),
        Arc::new(probe),
    )
    .expect("Failed to wire services");
    (create_router(&services), down)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn register(app: &Router, name: &str, address: &str) -> Value {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/v1/register",
        Some(json!({ "name": name, "address": address, "port": 8080 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = test_app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_register_and_lookup() {
    let (app, _) = test_app();
    let ids = register(&app, "orders", "10.0.0.1").await;
    assert!(ids["service_id"].is_string());
    assert!(ids["instance_id"].is_string());

    let (status, body) = send(&app, Method::GET, "/api/v1/service/orders", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "orders");
    assert_eq!(body["version"], "1.0.0");
    assert_eq!(body["instances"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_register_rejects_malformed_body() {
    let (app, _) = test_app();
    let (status, body) = send(&app, Method::POST, "/api/v1/register", Some(json!({ "name": "orders" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");
}

#[tokio::test]
async fn test_unknown_service_is_not_found() {
    let (app, _) = test_app();
    let (status, body) = send(&app, Method::GET, "/api/v1/discover/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn test_discover_round_robin_cycles() {
    let (app, _) = test_app();
    register(&app, "orders", "10.0.0.1").await;
    register(&app, "orders", "10.0.0.2").await;

    let mut picked = Vec::new();
    for _ in 0..4 {
        let (status, body) = send(&app, Method::GET, "/api/v1/discover/orders?algorithm=round_robin", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["instances"].as_array().unwrap().len(), 2);
        picked.push(body["selected"]["address"].as_str().unwrap().to_string());
    }
    assert_eq!(picked, ["10.0.0.1", "10.0.0.2", "10.0.0.1", "10.0.0.2"]);
}

#[tokio::test]
async fn test_discover_rejects_unknown_algorithm() {
    let (app, _) = test_app();
    register(&app, "orders", "10.0.0.1").await;
    let (status, body) = send(&app, Method::GET, "/api/v1/discover/orders?algorithm=fastest", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "configuration");
}

#[tokio::test]
async fn test_ip_hash_uses_forwarded_for() {
    let (app, _) = test_app();
    for i in 1..=4 {
        register(&app, "orders", &format!("10.0.0.{i}")).await;
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let request = Request::builder()
            .uri("/api/v1/discover/orders?algorithm=ip_hash&use_cache=false")
            .header("x-forwarded-for", "203.0.113.9, 10.1.1.1")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        seen.push(body["selected"]["id"].clone());
    }
    assert!(seen.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_health_check_marks_unhealthy_and_discovery_reports_unavailable() {
    let (app, down) = test_app();
    register(&app, "orders", "10.0.0.1").await;
    down.store(true, Ordering::SeqCst);

    let (status, report) = send(
        &app,
        Method::POST,
        "/api/v1/health-check/orders",
        Some(json!({ "timeout_ms": 100, "retries": 2, "interval_ms": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["summary"]["unhealthy"], 1);
    assert_eq!(report["results"][0]["attempts"], 2);

    let (status, body) = send(&app, Method::GET, "/api/v1/discover/orders?use_cache=false", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "no_healthy_instance");

    // healthy_only=false still returns the candidate
    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/discover/orders?use_cache=false&healthy_only=false",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["instances"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_health_check_without_body_uses_defaults() {
    let (app, _) = test_app();
    register(&app, "orders", "10.0.0.1").await;

    let (status, report) = send(&app, Method::POST, "/api/v1/health-check/orders", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["summary"]["healthy"], 1);
    assert_eq!(report["summary"]["health_percentage"], 100.0);
}

#[tokio::test]
async fn test_health_check_accepts_short_field_names() {
    let (app, down) = test_app();
    register(&app, "orders", "10.0.0.1").await;
    down.store(true, Ordering::SeqCst);

    let (status, report) = send(
        &app,
        Method::POST,
        "/api/v1/health-check/orders",
        Some(json!({ "timeout": 10, "retries": 1, "interval": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["summary"]["unhealthy"], 1);
    assert_eq!(report["results"][0]["attempts"], 1);
}

#[tokio::test]
async fn test_health_check_rejects_bad_overrides() {
    let (app, _) = test_app();
    register(&app, "orders", "10.0.0.1").await;

    for body in [
        json!({ "timout": 10 }),
        json!({ "retries": 0 }),
        json!({ "retries": 1000 }),
        json!({ "timeout_ms": 0 }),
        json!({ "interval": 3_600_000 }),
    ] {
        let (status, error) = send(&app, Method::POST, "/api/v1/health-check/orders", Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {body}");
        assert_eq!(error["kind"], "invalid_input");
    }

    let (status, _) = send(&app, Method::POST, "/api/v1/health-check", Some(json!({ "retries": 11 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_last_health_check_runs_sweep_when_empty() {
    let (app, _) = test_app();
    register(&app, "orders", "10.0.0.1").await;
    register(&app, "billing", "10.0.1.1").await;

    let (status, sweep) = send(&app, Method::GET, "/api/v1/health-check/last", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sweep["summary"]["total"], 2);
}

#[tokio::test]
async fn test_heartbeat_and_activity() {
    let (app, _) = test_app();
    let ids = register(&app, "orders", "10.0.0.1").await;
    let service_id = ids["service_id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/api/v1/heartbeat/{service_id}/active"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/heartbeat",
        Some(json!({ "service_id": service_id, "instance_id": ids["instance_id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (_, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/heartbeat/{service_id}/active"),
        None,
    )
    .await;
    assert_eq!(body["active"], true);
    assert!(body["last_heartbeat"].is_string());
}

#[tokio::test]
async fn test_heartbeat_for_unknown_service_is_not_found() {
    let (app, _) = test_app();
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/heartbeat",
        Some(json!({ "service_id": "missing" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deregister_removes_service() {
    let (app, _) = test_app();
    let ids = register(&app, "orders", "10.0.0.1").await;
    let service_id = ids["service_id"].as_str().unwrap();

    // Warm the discovery cache first
    let (status, _) = send(&app, Method::GET, "/api/v1/discover/orders", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::DELETE, &format!("/api/v1/deregister/{service_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, _) = send(&app, Method::GET, "/api/v1/discover/orders", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/v1/deregister/{service_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deregister_single_instance() {
    let (app, _) = test_app();
    let first = register(&app, "orders", "10.0.0.1").await;
    register(&app, "orders", "10.0.0.2").await;

    let uri = format!(
        "/api/v1/deregister/{}/{}",
        first["service_id"].as_str().unwrap(),
        first["instance_id"].as_str().unwrap()
    );
    let (status, _) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, Method::GET, "/api/v1/discover/orders", None).await;
    let instances = body["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0]["address"], "10.0.0.2");
}

#[tokio::test]
async fn test_services_listing_and_catalog() {
    let (app, _) = test_app();
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/register",
        Some(json!({
            "name": "orders",
            "address": "10.0.0.1",
            "port": 8080,
            "category": "commerce",
            "tags": ["critical"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    register(&app, "search", "10.0.0.9").await;

    let (_, all) = send(&app, Method::GET, "/api/v1/services", None).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let (_, commerce) = send(&app, Method::GET, "/api/v1/services?category=COMMERCE", None).await;
    assert_eq!(commerce.as_array().unwrap().len(), 1);
    assert_eq!(commerce[0]["name"], "orders");

    let (_, tagged) = send(&app, Method::GET, "/api/v1/catalog?tag=critical", None).await;
    assert_eq!(tagged.as_array().unwrap().len(), 1);

    let (_, categories) = send(&app, Method::GET, "/api/v1/catalog/categories", None).await;
    assert_eq!(categories["commerce"], 1);
}

#[tokio::test]
async fn test_connection_release_and_stats() {
    let (app, _) = test_app();
    register(&app, "orders", "10.0.0.1").await;

    let (_, body) = send(
        &app,
        Method::GET,
        "/api/v1/discover/orders?algorithm=least_connections",
        None,
    )
    .await;
    let instance_id = body["selected"]["id"].clone();

    let (_, stats) = send(&app, Method::GET, "/api/v1/stats", None).await;
    assert_eq!(stats["registry"]["services"], 1);
    assert_eq!(stats["registry"]["instances"], 1);
    assert!(stats["load_balancer"]["services"]["orders"].is_object());

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/connections/release",
        Some(json!({ "service": "orders", "instance_id": instance_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (app, _) = test_app();
    register(&app, "orders", "10.0.0.1").await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("beacon_registrations_total"));
}
