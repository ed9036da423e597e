//! HTTP handlers the gateway terminates itself (auth plane + health).

use axum::{
  extract::{ConnectInfo, State},
  http::HeaderMap,
  response::IntoResponse,
  Extension, Json,
};
use std::net::SocketAddr;

use opshub_core::Principal;

use crate::auth::{self, LoginRequest, LogoutRequest, RefreshRequest};
use crate::error::GatewayError;
use crate::health;
use crate::state::AppState;

fn peer_ip(state: &AppState, headers: &HeaderMap, addr: SocketAddr) -> String {
  if state.config.trust_proxy {
    if let Some(forwarded) = headers
      .get("x-forwarded-for")
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.split(',').next())
      .map(str::trim)
      .filter(|v| !v.is_empty())
    {
      return forwarded.to_string();
    }
  }
  addr.ip().to_string()
}

pub async fn login_handler(
  State(state): State<AppState>,
  ConnectInfo(addr): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
  Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, GatewayError> {
  let ip = peer_ip(&state, &headers, addr);
  let user_agent = headers
    .get("user-agent")
    .and_then(|v| v.to_str().ok())
    .map(str::to_string);
  let response = auth::login(&state, body, ip, user_agent).await?;
  Ok(Json(response))
}

pub async fn refresh_handler(
  State(state): State<AppState>,
  Json(body): Json<RefreshRequest>,
) -> Result<impl IntoResponse, GatewayError> {
  let response = auth::refresh(&state, body).await?;
  Ok(Json(response))
}

pub async fn logout_handler(
  State(state): State<AppState>,
  Extension(principal): Extension<Principal>,
  body: axum::body::Bytes,
) -> Result<impl IntoResponse, GatewayError> {
  // Logout accepts an empty body; a refresh token inside it narrows the
  // deletion to that one session.
  let body: LogoutRequest = if body.is_empty() {
    LogoutRequest::default()
  } else {
    serde_json::from_slice(&body).unwrap_or_default()
  };
  let response = auth::logout(&state, &principal, body).await?;
  Ok(Json(response))
}

pub async fn verify_handler(
  State(state): State<AppState>,
  Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, GatewayError> {
  let response = auth::verify(&state, &principal).await?;
  Ok(Json(response))
}

/// Gateway's own liveness, no dependencies consulted.
pub async fn health_handler() -> impl IntoResponse {
  Json(serde_json::json!({
    "status": "healthy",
    "timestamp": chrono::Utc::now().to_rfc3339(),
    "version": env!("CARGO_PKG_VERSION"),
    "service": "opshub_gateway",
  }))
}

/// Aggregated dependency health.
pub async fn system_health_handler(State(state): State<AppState>) -> impl IntoResponse {
  Json(health::aggregate(&state).await)
}
