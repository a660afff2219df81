// HTTP routes of the remote-control gateway

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::daemon;
use gamewarden::gateway::router;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_reports_sessions() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon(&dir);
    let app = router(Arc::clone(daemon.gateway()));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connectedSessions"], 0);
}

#[tokio::test]
async fn test_device_info() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon(&dir);
    let app = router(Arc::clone(daemon.gateway()));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/device-info")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["deviceName"], "test-rig");
    assert_eq!(body["deviceId"], daemon.gateway().device_id());
}

#[tokio::test]
async fn test_pair_issues_code() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon(&dir);
    let app = router(Arc::clone(daemon.gateway()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/pair")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"deviceName": "phone", "deviceType": "android"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let code = body["pairingCode"].as_str().unwrap();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    assert_eq!(body["expiresIn"], 300);
    assert!(body["pairingId"].is_string());

    // the code authenticates exactly once
    let gateway = daemon.gateway();
    let (first, _rx1) = gateway.sessions().open().unwrap();
    let (second, _rx2) = gateway.sessions().open().unwrap();
    assert!(gateway.authenticate(&first, code, None).is_ok());
    assert!(gateway.authenticate(&second, code, None).is_err());
}

#[tokio::test]
async fn test_pair_rejects_blank_name() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon(&dir);
    let app = router(Arc::clone(daemon.gateway()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/pair")
                .header("content-type", "application/json")
                .body(Body::from(json!({"deviceName": "  "}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "invalid_params");
}

#[tokio::test]
async fn test_unknown_route() {
    let dir = TempDir::new().unwrap();
    let daemon = daemon(&dir);
    let app = router(Arc::clone(daemon.gateway()));

    let response = app
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
