//! Router-level tests without live dependencies: identity propagation is
//! enforced, and a dead catalog store surfaces as STORAGE_SERVICE_ERROR.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use device_server::config::{DeviceConfig, RedisConfig};
use device_server::{build_router, AppState};

fn test_config() -> DeviceConfig {
  DeviceConfig {
    storage_service_url: "http://127.0.0.1:59201".to_string(),
    bus_url: "nats://127.0.0.1:59222".to_string(),
    redis: RedisConfig {
      port: 59_379,
      ..RedisConfig::default()
    },
    ..DeviceConfig::default()
  }
}

async fn app() -> axum::Router {
  let state = AppState::try_new(test_config())
    .await
    .expect("state should build without live dependencies");
  build_router(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

const ADMIN: &str = r#"{"id":"u-1","username":"alice","role":"administrator"}"#;
const VIEWER: &str = r#"{"id":"u-2","username":"bob","role":"viewer"}"#;

#[tokio::test]
async fn health_is_public() {
  let response = app()
    .await
    .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn mutations_require_identity() {
  let response = app()
    .await
    .oneshot(
      Request::builder()
        .method("POST")
        .uri("/api/v1/devices")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"name":"edge-1","type":"server"}"#))
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn viewers_cannot_mutate() {
  let response = app()
    .await
    .oneshot(
      Request::builder()
        .method("POST")
        .uri("/api/v1/devices")
        .header("content-type", "application/json")
        .header("x-user-info", VIEWER)
        .body(Body::from(r#"{"name":"edge-1","type":"server"}"#))
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::FORBIDDEN);
  let body = body_json(response).await;
  assert_eq!(body["error"], "AUTHORIZATION_ERROR");
}

#[tokio::test]
async fn dead_catalog_surfaces_as_storage_error() {
  let response = app()
    .await
    .oneshot(
      Request::builder()
        .method("POST")
        .uri("/api/v1/devices")
        .header("content-type", "application/json")
        .header("x-user-info", ADMIN)
        .body(Body::from(r#"{"name":"edge-1","type":"server"}"#))
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
  let body = body_json(response).await;
  assert_eq!(body["error"], "STORAGE_SERVICE_ERROR");
}

#[tokio::test]
async fn invalid_create_body_is_a_validation_error() {
  let response = app()
    .await
    .oneshot(
      Request::builder()
        .method("POST")
        .uri("/api/v1/devices")
        .header("content-type", "application/json")
        .header("x-user-info", ADMIN)
        .body(Body::from(r#"{"name":"","type":"server"}"#))
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  let body = body_json(response).await;
  assert_eq!(body["error"], "VALIDATION_ERROR");
}
