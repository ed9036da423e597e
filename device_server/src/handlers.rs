//! Device management HTTP surface, anchored at `/api/v1/devices`.

use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
  Json,
};
use chrono::Utc;
use std::collections::HashMap;
use validator::Validate;

use opshub_core::middlewares::AuthUser;
use opshub_core::models::device::{
  DeviceCreateRequest, DeviceFilter, DeviceHealthSummary, DeviceUpdateRequest, HeartbeatRequest,
};
use opshub_core::CoreError;

use crate::error::DeviceError;
use crate::state::AppState;

fn require_write_access(AuthUser(principal): &AuthUser) -> Result<(), CoreError> {
  if matches!(principal.role, opshub_core::Role::Viewer) {
    return Err(CoreError::Authorization(
      "viewer role cannot modify devices".to_string(),
    ));
  }
  Ok(())
}

fn validation_error(errors: validator::ValidationErrors) -> CoreError {
  let fields: Vec<String> = errors.field_errors().keys().map(|k| k.to_string()).collect();
  CoreError::validation_fields("request validation failed", fields)
}

pub async fn list_devices(
  State(state): State<AppState>,
  Query(filter): Query<DeviceFilter>,
) -> Result<impl IntoResponse, DeviceError> {
  let page = state.registry.list(&filter).await?;
  Ok(Json(page))
}

pub async fn create_device(
  State(state): State<AppState>,
  user: AuthUser,
  Json(body): Json<DeviceCreateRequest>,
) -> Result<impl IntoResponse, DeviceError> {
  require_write_access(&user)?;
  body.validate().map_err(validation_error)?;
  let device = state.registry.create(body).await?;
  Ok((StatusCode::CREATED, Json(device)))
}

pub async fn get_device(
  State(state): State<AppState>,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, DeviceError> {
  let device = state.registry.get(&id).await?;
  Ok(Json(device))
}

pub async fn update_device(
  State(state): State<AppState>,
  user: AuthUser,
  Path(id): Path<String>,
  Json(body): Json<DeviceUpdateRequest>,
) -> Result<impl IntoResponse, DeviceError> {
  require_write_access(&user)?;
  body.validate().map_err(validation_error)?;
  let device = state.registry.update(&id, body).await?;
  Ok(Json(device))
}

pub async fn delete_device(
  State(state): State<AppState>,
  user: AuthUser,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, DeviceError> {
  require_write_access(&user)?;
  state.registry.delete(&id).await?;
  Ok(StatusCode::NO_CONTENT)
}

/// Heartbeat from a device agent. Always answers with the ack envelope; bus
/// or metrics-sink trouble stays on the server side.
pub async fn device_heartbeat(
  State(state): State<AppState>,
  Path(id): Path<String>,
  Json(body): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, DeviceError> {
  let response = state.heartbeat.handle(&id, body).await?;
  Ok(Json(response))
}

pub async fn test_connection(
  State(state): State<AppState>,
  _user: AuthUser,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, DeviceError> {
  // The probe engine pulls decrypted connection info itself; nothing secret
  // passes through this handler.
  let result = state.probe.test_device(&id).await?;
  Ok(Json(result))
}

/// Counts by administrative status plus live-status coverage.
pub async fn device_health(
  State(state): State<AppState>,
) -> Result<impl IntoResponse, DeviceError> {
  let page = state
    .registry
    .list(&DeviceFilter {
      limit: Some(1000),
      ..DeviceFilter::default()
    })
    .await?;

  let mut by_status: HashMap<String, u64> = HashMap::new();
  for device in &page.items {
    *by_status.entry(device.status.as_str().to_string()).or_default() += 1;
  }

  Ok(Json(DeviceHealthSummary {
    total: page.total,
    by_status,
    with_live_status: state.live.count().await,
    timestamp: Utc::now(),
  }))
}

/// Service liveness for the gateway's aggregator.
pub async fn service_health() -> impl IntoResponse {
  Json(serde_json::json!({
    "status": "healthy",
    "timestamp": Utc::now().to_rfc3339(),
    "version": env!("CARGO_PKG_VERSION"),
    "service": "device_server",
  }))
}
