//! # LLM Service
//!
//! Provider registry with encrypted credentials, runtime dispatch across
//! vendor wire shapes, a content-addressed response cache, usage accounting
//! and prompt templates. The dispatcher's provider map follows the registry
//! through a 30-second reload loop.

pub mod adapters;
pub mod cache;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod state;
pub mod templates;
pub mod usage;
pub mod workflow;

pub use config::LlmConfig;
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
    .route("/api/v1/llm/providers", get(handlers::list_providers))
    .route("/api/v1/llm/providers", post(handlers::create_provider))
    .route("/api/v1/llm/providers/{id}", get(handlers::get_provider))
    .route("/api/v1/llm/providers/{id}", put(handlers::update_provider))
    .route(
      "/api/v1/llm/providers/{id}",
      delete(handlers::delete_provider),
    )
    .route(
      "/api/v1/llm/providers/{id}/set-default",
      post(handlers::set_default_provider),
    )
    .route("/api/v1/llm/test", post(handlers::test_provider))
    .route("/api/v1/llm/discover", post(handlers::discover_models))
    .route(
      "/api/v1/llm/chat/completions",
      post(handlers::chat_completions),
    )
    // Legacy alias kept for older clients.
    .route("/api/v1/llm/chat", post(handlers::chat_completions))
    .route(
      "/api/v1/llm/workflow/completions",
      post(handlers::workflow_completions),
    )
    .route("/api/v1/llm/models", get(handlers::list_models))
    .route("/api/v1/llm/usage", get(handlers::usage))
    .route("/api/v1/llm/templates", get(handlers::list_templates))
    .route("/api/v1/llm/templates", post(handlers::create_template))
    .layer(from_fn(request_id_middleware))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

pub async fn serve(config: LlmConfig) -> Result<()> {
  let addr = format!("{}:{}", config.server.host, config.server.port);
  let state = AppState::try_new(config).await?;
  let router = build_router(state.clone());

  let listener = tokio::net::TcpListener::bind(&addr).await?;
  info!("LLM service listening on {}", addr);

  axum::serve(listener, router)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  state.bus.flush().await;
  info!("LLM service shut down cleanly");
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
