use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication failure sub-reasons. Carried in the envelope `details` so
/// clients can distinguish a missing header from a stale credential without
/// the top-level code changing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthReason {
  MissingToken,
  InvalidToken,
  TokenExpired,
  InvalidCredentials,
}

/// Which upstream family failed; decides between the two 502 codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
  Proxy,
  Storage,
}

/// Platform-wide error taxonomy. Every service boundary returns this type
/// (or a service error that converts into it); the HTTP layer pattern-matches
/// to produce the wire envelope. Machine-readable codes are append-only.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
  #[error("validation error: {message}")]
  Validation {
    message: String,
    fields: Vec<String>,
  },

  #[error("authentication error: {message}")]
  Authentication { reason: AuthReason, message: String },

  #[error("authorization error: {0}")]
  Authorization(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("rate limit exceeded: {0}")]
  RateLimited(String),

  #[error("upstream {service} unavailable: {message}")]
  Upstream {
    kind: UpstreamKind,
    service: String,
    message: String,
  },

  #[error("no usable provider: {0}")]
  NoProvider(String),

  #[error("invalid provider configuration: {0}")]
  InvalidConfig(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl CoreError {
  pub fn validation(message: impl Into<String>) -> Self {
    CoreError::Validation {
      message: message.into(),
      fields: Vec::new(),
    }
  }

  pub fn validation_fields(message: impl Into<String>, fields: Vec<String>) -> Self {
    CoreError::Validation {
      message: message.into(),
      fields,
    }
  }

  pub fn authentication(reason: AuthReason, message: impl Into<String>) -> Self {
    CoreError::Authentication {
      reason,
      message: message.into(),
    }
  }

  /// The single reply for unknown user / wrong password / inactive account.
  /// The distinction lives only in logs.
  pub fn invalid_credentials() -> Self {
    CoreError::Authentication {
      reason: AuthReason::InvalidCredentials,
      message: "Invalid credentials".to_string(),
    }
  }

  pub fn proxy_unavailable(service: impl Into<String>, message: impl Into<String>) -> Self {
    CoreError::Upstream {
      kind: UpstreamKind::Proxy,
      service: service.into(),
      message: message.into(),
    }
  }

  pub fn storage_unavailable(message: impl Into<String>) -> Self {
    CoreError::Upstream {
      kind: UpstreamKind::Storage,
      service: "storage".to_string(),
      message: message.into(),
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      CoreError::Validation { .. } => StatusCode::BAD_REQUEST,
      CoreError::Authentication { .. } => StatusCode::UNAUTHORIZED,
      CoreError::Authorization(_) => StatusCode::FORBIDDEN,
      CoreError::NotFound(_) => StatusCode::NOT_FOUND,
      CoreError::Conflict(_) => StatusCode::CONFLICT,
      CoreError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
      CoreError::Upstream { .. } => StatusCode::BAD_GATEWAY,
      CoreError::NoProvider(_) => StatusCode::BAD_REQUEST,
      CoreError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
      CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  pub fn error_code(&self) -> &'static str {
    match self {
      CoreError::Validation { .. } => "VALIDATION_ERROR",
      CoreError::Authentication { .. } => "AUTHENTICATION_ERROR",
      CoreError::Authorization(_) => "AUTHORIZATION_ERROR",
      CoreError::NotFound(_) => "NOT_FOUND",
      CoreError::Conflict(_) => "CONFLICT",
      CoreError::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
      CoreError::Upstream {
        kind: UpstreamKind::Proxy,
        ..
      } => "PROXY_ERROR",
      CoreError::Upstream {
        kind: UpstreamKind::Storage,
        ..
      } => "STORAGE_SERVICE_ERROR",
      CoreError::NoProvider(_) => "NO_PROVIDER",
      CoreError::InvalidConfig(_) => "INVALID_CONFIG",
      CoreError::Internal(_) => "INTERNAL_SERVER_ERROR",
    }
  }

  pub fn envelope(&self) -> ErrorEnvelope {
    let details = match self {
      CoreError::Validation { fields, .. } if !fields.is_empty() => {
        Some(serde_json::json!({ "fields": fields }))
      }
      CoreError::Authentication { reason, .. } => Some(serde_json::json!({ "reason": reason })),
      CoreError::Upstream { service, .. } => Some(serde_json::json!({ "service": service })),
      _ => None,
    };

    ErrorEnvelope {
      error: self.error_code().to_string(),
      message: self.to_string(),
      timestamp: Utc::now().to_rfc3339(),
      details,
    }
  }
}

/// The wire shape every error takes. `error` is the stable machine code,
/// `message` the human text, `timestamp` ISO-8601.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
  pub error: String,
  pub message: String,
  pub timestamp: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<serde_json::Value>,
}

impl IntoResponse for CoreError {
  fn into_response(self) -> Response {
    (self.status(), Json(self.envelope())).into_response()
  }
}

impl From<serde_json::Error> for CoreError {
  fn from(err: serde_json::Error) -> Self {
    CoreError::Internal(format!("serialization error: {err}"))
  }
}

impl From<anyhow::Error> for CoreError {
  fn from(err: anyhow::Error) -> Self {
    CoreError::Internal(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_mapping_matches_taxonomy() {
    assert_eq!(
      CoreError::validation("bad").status(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      CoreError::invalid_credentials().status(),
      StatusCode::UNAUTHORIZED
    );
    assert_eq!(
      CoreError::Authorization("nope".into()).status(),
      StatusCode::FORBIDDEN
    );
    assert_eq!(
      CoreError::NotFound("device".into()).status(),
      StatusCode::NOT_FOUND
    );
    assert_eq!(
      CoreError::Conflict("name taken".into()).status(),
      StatusCode::CONFLICT
    );
    assert_eq!(
      CoreError::RateLimited("slow down".into()).status(),
      StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
      CoreError::proxy_unavailable("devices", "connect refused").status(),
      StatusCode::BAD_GATEWAY
    );
    assert_eq!(
      CoreError::Internal("boom".into()).status(),
      StatusCode::INTERNAL_SERVER_ERROR
    );
  }

  #[test]
  fn envelope_carries_code_and_timestamp() {
    let env = CoreError::proxy_unavailable("llm", "timeout").envelope();
    assert_eq!(env.error, "PROXY_ERROR");
    assert!(env.timestamp.contains('T'));
    assert_eq!(
      env.details.unwrap()["service"],
      serde_json::json!("llm")
    );
  }

  #[test]
  fn storage_upstream_uses_its_own_code() {
    let env = CoreError::storage_unavailable("500 from catalog").envelope();
    assert_eq!(env.error, "STORAGE_SERVICE_ERROR");
  }

  #[test]
  fn auth_envelope_exposes_sub_reason_only_in_details() {
    let env = CoreError::authentication(AuthReason::TokenExpired, "token expired").envelope();
    assert_eq!(env.error, "AUTHENTICATION_ERROR");
    assert_eq!(env.details.unwrap()["reason"], "TOKEN_EXPIRED");
  }

  #[test]
  fn validation_envelope_lists_offending_fields() {
    let env =
      CoreError::validation_fields("missing fields", vec!["name".into(), "type".into()]).envelope();
    assert_eq!(env.details.unwrap()["fields"][1], "type");
  }
}
