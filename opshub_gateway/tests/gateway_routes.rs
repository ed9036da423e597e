//! Router-level tests that need no live Redis/NATS/catalog: the limiter
//! fails open, the bus starts degraded, and upstream failures map to the
//! documented envelopes.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use opshub_core::{Principal, Role};
use opshub_gateway::config::{AuthConfig, GatewayConfig, RedisConfig, UpstreamRoute};
use opshub_gateway::{build_router, AppState};

const ACCESS_SECRET: &str = "integration-access-secret-0123456789abcdef";
const REFRESH_SECRET: &str = "integration-refresh-secret-0123456789abcde";

fn test_config() -> GatewayConfig {
  GatewayConfig {
    auth: AuthConfig {
      access_secret: ACCESS_SECRET.to_string(),
      refresh_secret: REFRESH_SECRET.to_string(),
      ..AuthConfig::default()
    },
    redis: RedisConfig {
      port: 59_379,
      ..RedisConfig::default()
    },
    storage_service_url: "http://127.0.0.1:59201".to_string(),
    bus_url: "nats://127.0.0.1:59222".to_string(),
    upstreams: vec![UpstreamRoute {
      prefix: "/api/v1/devices".to_string(),
      service: "devices".to_string(),
      url: "http://127.0.0.1:59101".to_string(),
    }],
    ..GatewayConfig::default()
  }
}

async fn test_state() -> AppState {
  AppState::try_new(test_config())
    .await
    .expect("state should build without live dependencies")
}

fn alice() -> Principal {
  Principal {
    id: "u-1".to_string(),
    username: "alice".to_string(),
    role: Role::Administrator,
    email: None,
    is_active: true,
  }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_public() {
  let app = build_router(test_state().await);
  let response = app
    .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body = body_json(response).await;
  assert_eq!(body["status"], "healthy");
  assert_eq!(body["service"], "opshub_gateway");
}

#[tokio::test]
async fn verify_requires_bearer() {
  let app = build_router(test_state().await);
  let response = app
    .oneshot(
      Request::builder()
        .uri("/api/v1/auth/verify")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  let body = body_json(response).await;
  assert_eq!(body["error"], "AUTHENTICATION_ERROR");
  assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn proxied_routes_require_bearer() {
  let app = build_router(test_state().await);
  let response = app
    .oneshot(
      Request::builder()
        .uri("/api/v1/devices")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_service_is_not_found() {
  let state = test_state().await;
  let token = state.tokens.mint_access(&alice()).unwrap().token;
  let app = build_router(state);

  let response = app
    .oneshot(
      Request::builder()
        .uri("/api/v1/nosuchservice/things")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
  let body = body_json(response).await;
  assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn unreachable_upstream_maps_to_proxy_error() {
  let state = test_state().await;
  let token = state.tokens.mint_access(&alice()).unwrap().token;
  let app = build_router(state);

  let response = app
    .oneshot(
      Request::builder()
        .uri("/api/v1/devices?limit=10")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
  let body = body_json(response).await;
  assert_eq!(body["error"], "PROXY_ERROR");
  assert_eq!(body["details"]["service"], "devices");
}

#[tokio::test]
async fn responses_carry_a_correlation_id() {
  let app = build_router(test_state().await);
  let response = app
    .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
    .await
    .unwrap();
  assert!(response.headers().contains_key("x-correlation-id"));
}
