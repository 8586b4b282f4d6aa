//! Integration tests for the HTTP façade (§4.8, §6): the router is driven
//! directly with `tower::ServiceExt::oneshot`, the way `axum`'s own test
//! suite recommends, so these exercise real request parsing and status
//! mapping without binding a socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use rotaproxyd::api;
use rotaproxyd::core::types::{InboundSpec, ProxyStartConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::support::test_manager;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_returns_ok() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(test_manager(dir.path()));
    let app = api::router(manager);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn proxy_status_defaults_to_stopped_with_no_instance() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(test_manager(dir.path()));
    let app = api::router(manager);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/proxy/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "stopped" }));
}

#[tokio::test]
async fn proxy_details_is_not_found_with_no_instance() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(test_manager(dir.path()));
    let app = api::router(manager);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/proxy/details")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn http_test_start_rejects_empty_link_list_with_400() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(test_manager(dir.path()));
    let app = api::router(manager);

    let request_body = json!({ "links": [], "threadCount": 2 });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/http/test")
                .header("content-type", "application/json")
                .body(Body::from(request_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body.get("error").is_some());
}

#[tokio::test]
async fn proxy_start_then_details_round_trip_through_the_router() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Arc::new(test_manager(dir.path()));
    let app = api::router(manager);

    let start_body = serde_json::to_string(&ProxyStartConfig {
        inbound: InboundSpec {
            protocol: "socks5".to_string(),
            addr: "127.0.0.1".to_string(),
            port: 0,
            orig_link: None,
        },
        pool: vec!["socks5://a.example:1080".to_string()],
        interval_s: 3600,
        options: Default::default(),
    })
    .unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/proxy/start")
                .header("content-type", "application/json")
                .body(Body::from(start_body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // A second start while one instance is already running is the §6
    // "busy" case, mapped to 500 rather than the usual 409 a Conflict maps
    // to elsewhere.
    let second_start = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/proxy/start")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "inbound": {
                            "protocol": "socks5",
                            "addr": "127.0.0.1",
                            "port": 0,
                            "orig_link": null
                        },
                        "pool": ["socks5://c.example:1080"],
                        "interval_s": 3600
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second_start.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let details_response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/proxy/details")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(details_response.status(), StatusCode::OK);
    let details = body_json(details_response).await;
    assert_eq!(details["total"], json!(1));
}
