//! # Device Management Service
//!
//! Coordination layer over the catalog store: device CRUD with a short list
//! cache, the multi-protocol connection probe engine, and the heartbeat /
//! live-status pipeline. Domain events leave on `device-events`; realtime
//! status frames go to the hub's `device:status` fan-in topic.

pub mod catalog;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod probe;
pub mod registry;
pub mod state;
pub mod status;

pub use config::DeviceConfig;
pub use state::AppState;

use anyhow::Result;
use axum::{
  middleware::from_fn,
  routing::{delete, get, post, put},
  Router,
};
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use opshub_core::middlewares::request_id_middleware;

const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

pub fn build_router(state: AppState) -> Router {
  Router::new()
    .route("/health", get(handlers::service_health))
    .route("/api/v1/devices", get(handlers::list_devices))
    .route("/api/v1/devices", post(handlers::create_device))
    .route("/api/v1/devices/health", get(handlers::device_health))
    .route("/api/v1/devices/{id}", get(handlers::get_device))
    .route("/api/v1/devices/{id}", put(handlers::update_device))
    .route("/api/v1/devices/{id}", delete(handlers::delete_device))
    .route("/api/v1/devices/{id}/status", post(handlers::device_heartbeat))
    .route(
      "/api/v1/devices/{id}/test-connection",
      post(handlers::test_connection),
    )
    .layer(from_fn(request_id_middleware))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

pub async fn serve(config: DeviceConfig) -> Result<()> {
  let addr = format!("{}:{}", config.server.host, config.server.port);
  let state = AppState::try_new(config).await?;
  let router = build_router(state.clone());

  let listener = tokio::net::TcpListener::bind(&addr).await?;
  info!("Device service listening on {}", addr);

  axum::serve(listener, router)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  state.bus.flush().await;
  info!("Device service shut down cleanly");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    let _ = tokio::signal::ctrl_c().await;
  };
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(_) => std::future::pending::<()>().await,
    }
  };

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }

  info!("Shutdown signal received; draining requests");
  tokio::spawn(async {
    tokio::time::sleep(DRAIN_DEADLINE).await;
    error!("Drain deadline exceeded; exiting");
    std::process::exit(1);
  });
}
