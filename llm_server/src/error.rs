use axum::response::{IntoResponse, Response};
use opshub_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
  #[error(transparent)]
  Core(#[from] CoreError),

  #[error("database error: {0}")]
  Db(sqlx::Error),

  #[error("cache error: {0}")]
  Cache(#[from] redis::RedisError),

  #[error("serialization error: {0}")]
  Serde(#[from] serde_json::Error),
}

impl From<sqlx::Error> for LlmError {
  fn from(err: sqlx::Error) -> Self {
    LlmError::Db(err)
  }
}

impl LlmError {
  pub fn into_core(self) -> CoreError {
    match self {
      LlmError::Core(e) => e,
      LlmError::Db(e) => match &e {
        sqlx::Error::RowNotFound => CoreError::NotFound("provider not found".to_string()),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
          CoreError::Conflict("a provider with this name already exists".to_string())
        }
        _ => CoreError::Internal(format!("database: {e}")),
      },
      LlmError::Cache(e) => CoreError::Internal(format!("cache: {e}")),
      LlmError::Serde(e) => CoreError::Internal(format!("serialization: {e}")),
    }
  }
}

impl IntoResponse for LlmError {
  fn into_response(self) -> Response {
    self.into_core().into_response()
  }
}

pub type LlmResult<T> = Result<T, LlmError>;
