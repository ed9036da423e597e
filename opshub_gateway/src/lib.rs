//! # OpsHub Gateway
//!
//! The platform front door: token lifecycle, rate limiting, reverse proxy
//! with identity propagation, and the realtime hub. One axum app, one
//! composition root, wired config -> stores -> bus -> services -> router.

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod hub;
pub mod proxy;
pub mod rate_limit;
pub mod sessions;
pub mod state;

pub use config::GatewayConfig;
pub use state::AppState;

use anyhow::Result;
use axum::{
  middleware::{from_fn, from_fn_with_state},
  routing::{any, get, post},
  Router,
};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use opshub_core::middlewares::{request_id_middleware, verify_token_middleware};

const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// Assemble the gateway router around an initialized [`AppState`].
pub fn build_router(state: AppState) -> Router {
  let cors = cors_layer(&state.config.cors_origins);

  // Login gets the hard-coded guard; refresh rides the IP preset.
  let login_routes = Router::new()
    .route("/api/v1/auth/login", post(handlers::login_handler))
    .layer(from_fn_with_state(
      state.clone(),
      rate_limit::login_guard_middleware,
    ));

  let refresh_routes = Router::new()
    .route("/api/v1/auth/refresh", post(handlers::refresh_handler))
    .layer(from_fn_with_state(
      state.clone(),
      rate_limit::ip_rate_limit_middleware,
    ));

  let protected_routes = Router::new()
    .route("/api/v1/auth/logout", post(handlers::logout_handler))
    .route("/api/v1/auth/verify", get(handlers::verify_handler))
    .route(
      "/api/v1/system/health",
      get(handlers::system_health_handler),
    )
    .layer(from_fn_with_state(
      state.clone(),
      verify_token_middleware::<AppState>,
    ));

  // Everything else under /api/v1 streams through the proxy; bearer first,
  // then the per-principal window.
  let proxied_routes = Router::new()
    .route("/api/v1/{*rest}", any(proxy::proxy_handler))
    .layer(from_fn_with_state(
      state.clone(),
      rate_limit::principal_rate_limit_middleware,
    ))
    .layer(from_fn_with_state(
      state.clone(),
      verify_token_middleware::<AppState>,
    ));

  let public_routes = Router::new()
    .route("/health", get(handlers::health_handler))
    .route("/ws", get(hub::ws_handler));

  Router::new()
    .merge(login_routes)
    .merge(refresh_routes)
    .merge(protected_routes)
    .merge(proxied_routes)
    .merge(public_routes)
    .layer(from_fn(request_id_middleware))
    .layer(TraceLayer::new_for_http())
    .layer(cors)
    .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
  if origins.iter().any(|o| o == "*") {
    CorsLayer::new()
      .allow_origin(Any)
      .allow_methods(Any)
      .allow_headers(Any)
  } else {
    let parsed: Vec<axum::http::HeaderValue> =
      origins.iter().filter_map(|o| o.parse().ok()).collect();
    CorsLayer::new()
      .allow_origin(parsed)
      .allow_methods(Any)
      .allow_headers(Any)
  }
}

/// Run the gateway until SIGTERM/SIGINT, then drain within the deadline.
pub async fn serve(config: GatewayConfig) -> Result<()> {
  let addr = format!("{}:{}", config.server.host, config.server.port);
  let state = AppState::try_new(config).await?;

  hub::spawn_heartbeat(state.hub.clone());
  hub::spawn_fanin(state.clone());

  let router = build_router(state.clone());
  let listener = tokio::net::TcpListener::bind(&addr).await?;
  info!("Gateway listening on {}", addr);

  axum::serve(
    listener,
    router.into_make_service_with_connect_info::<SocketAddr>(),
  )
  .with_graceful_shutdown(shutdown_signal(state.clone()))
  .await?;

  state.bus.flush().await;
  info!("Gateway shut down cleanly");
  Ok(())
}

async fn shutdown_signal(state: AppState) {
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

  info!("Shutdown signal received; draining connections");
  state.hub.close_all();

  // Past the drain deadline the process exits hard with a failure code.
  tokio::spawn(async {
    tokio::time::sleep(DRAIN_DEADLINE).await;
    error!("Drain deadline exceeded; exiting");
    std::process::exit(1);
  });
}
