use axum::response::{IntoResponse, Response};
use opshub_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
  #[error(transparent)]
  Core(#[from] CoreError),

  #[error("cache error: {0}")]
  Cache(#[from] redis::RedisError),

  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),
}

impl DeviceError {
  pub fn into_core(self) -> CoreError {
    match self {
      DeviceError::Core(e) => e,
      DeviceError::Cache(e) => CoreError::Internal(format!("cache: {e}")),
      DeviceError::Serde(e) => CoreError::Internal(format!("serialization: {e}")),
    }
  }
}

impl IntoResponse for DeviceError {
  fn into_response(self) -> Response {
    self.into_core().into_response()
  }
}

pub type DeviceResult<T> = Result<T, DeviceError>;
