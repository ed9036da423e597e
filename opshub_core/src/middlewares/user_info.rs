use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::{AuthReason, CoreError};
use crate::models::auth::Principal;

/// Identity header injected by the gateway. Downstream services accept it
/// only from the gateway (network topology enforces that) and do not
/// re-verify the credential it came from.
pub const X_USER_INFO: &str = "x-user-info";

/// Extractor for the propagated identity on downstream services.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Principal);

impl<S> FromRequestParts<S> for AuthUser
where
  S: Send + Sync,
{
  type Rejection = CoreError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    let raw = parts
      .headers
      .get(X_USER_INFO)
      .ok_or_else(|| {
        CoreError::authentication(AuthReason::MissingToken, "Missing identity header")
      })?
      .to_str()
      .map_err(|_| {
        CoreError::authentication(AuthReason::InvalidToken, "Malformed identity header")
      })?;

    let principal: Principal = serde_json::from_str(raw).map_err(|_| {
      CoreError::authentication(AuthReason::InvalidToken, "Malformed identity header")
    })?;
    Ok(AuthUser(principal))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::auth::Role;
  use axum::body::Body;
  use axum::http::Request;

  #[tokio::test]
  async fn parses_gateway_injected_identity() {
    let req = Request::builder()
      .header(
        X_USER_INFO,
        r#"{"id":"u-1","username":"alice","role":"administrator"}"#,
      )
      .body(Body::empty())
      .unwrap();
    let (mut parts, _) = req.into_parts();
    let AuthUser(principal) = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
    assert_eq!(principal.username, "alice");
    assert_eq!(principal.role, Role::Administrator);
    assert!(principal.is_active);
  }

  #[tokio::test]
  async fn legacy_role_name_in_header_still_normalizes() {
    let req = Request::builder()
      .header(X_USER_INFO, r#"{"id":"u-2","username":"bob","role":"user"}"#)
      .body(Body::empty())
      .unwrap();
    let (mut parts, _) = req.into_parts();
    let AuthUser(principal) = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
    assert_eq!(principal.role, Role::Viewer);
  }

  #[tokio::test]
  async fn missing_header_is_rejected() {
    let req = Request::builder().body(Body::empty()).unwrap();
    let (mut parts, _) = req.into_parts();
    assert!(AuthUser::from_request_parts(&mut parts, &()).await.is_err());
  }
}
