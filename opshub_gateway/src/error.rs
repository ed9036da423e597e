use axum::response::{IntoResponse, Response};
use opshub_core::{jwt::TokenError, CoreError};
use thiserror::Error;

/// Gateway-side failures. Everything collapses into the platform taxonomy
/// before it reaches the wire.
#[derive(Error, Debug)]
pub enum GatewayError {
  #[error(transparent)]
  Core(#[from] CoreError),

  #[error("session store error: {0}")]
  SessionStore(#[from] redis::RedisError),

  #[error("catalog store error: {0}")]
  Catalog(#[from] reqwest::Error),

  #[error(transparent)]
  Token(#[from] TokenError),

  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),
}

impl GatewayError {
  pub fn into_core(self) -> CoreError {
    match self {
      GatewayError::Core(e) => e,
      GatewayError::SessionStore(e) => CoreError::Internal(format!("session store: {e}")),
      GatewayError::Catalog(e) => CoreError::storage_unavailable(e.to_string()),
      GatewayError::Token(e) => e.into(),
      GatewayError::Serde(e) => CoreError::Internal(format!("serialization: {e}")),
    }
  }
}

impl IntoResponse for GatewayError {
  fn into_response(self) -> Response {
    self.into_core().into_response()
  }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
