use axum::{
  body::Body,
  extract::{FromRequestParts, Request, State},
  middleware::Next,
  response::{IntoResponse, Response},
};
use axum_extra::{
  headers::{authorization::Bearer, Authorization},
  TypedHeader,
};
use tracing::warn;

use crate::error::{AuthReason, CoreError};
use crate::models::auth::Principal;

/// Anything that can validate an access credential locally. Implemented by
/// each service's `AppState`; the middleware below is wrapped via
/// `axum::middleware::from_fn_with_state`.
pub trait TokenVerifier {
  fn verify_access_token(&self, token: &str) -> Result<Principal, CoreError>;
}

/// Bearer verification for routes the gateway terminates. On success the
/// verified [`Principal`] is inserted as a request extension.
pub async fn verify_token_middleware<T>(
  State(state): State<T>,
  req: Request<Body>,
  next: Next,
) -> Response
where
  T: TokenVerifier + Clone + Send + Sync + 'static,
{
  let (mut parts, body) = req.into_parts();
  let token =
    match TypedHeader::<Authorization<Bearer>>::from_request_parts(&mut parts, &state).await {
      Ok(bearer) => bearer.token().to_string(),
      Err(_) => {
        return CoreError::authentication(AuthReason::MissingToken, "Missing bearer token")
          .into_response();
      }
    };

  match state.verify_access_token(&token) {
    Ok(principal) => {
      let mut req = Request::from_parts(parts, body);
      req.extensions_mut().insert(principal);
      next.run(req).await
    }
    Err(e) => {
      warn!("Access token rejected: {}", e);
      e.into_response()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::jwt::{TokenManager, TokenType};
  use crate::models::auth::Role;
  use axum::http::StatusCode;
  use axum::{middleware::from_fn_with_state, routing::get, Extension, Router};
  use tower::ServiceExt;

  #[derive(Clone)]
  struct TestState {
    tokens: TokenManager,
  }

  impl TokenVerifier for TestState {
    fn verify_access_token(&self, token: &str) -> Result<Principal, CoreError> {
      let claims = self.tokens.verify(token, TokenType::Access)?;
      claims
        .principal
        .ok_or_else(|| CoreError::authentication(AuthReason::InvalidToken, "No principal"))
    }
  }

  async fn whoami(Extension(principal): Extension<Principal>) -> String {
    principal.username
  }

  fn state() -> TestState {
    TestState {
      tokens: TokenManager::new(
        "test-access-secret-0123456789abcdef!",
        "test-refresh-secret-0123456789abcdef",
        "opshub-gateway",
        "opshub-web",
        3600,
        86400,
      )
      .unwrap(),
    }
  }

  fn app(state: TestState) -> Router {
    Router::new()
      .route("/whoami", get(whoami))
      .layer(from_fn_with_state(
        state.clone(),
        verify_token_middleware::<TestState>,
      ))
  }

  #[tokio::test]
  async fn valid_bearer_passes_and_injects_principal() {
    let state = state();
    let principal = Principal {
      id: "u-1".into(),
      username: "alice".into(),
      role: Role::Operator,
      email: None,
      is_active: true,
    };
    let minted = state.tokens.mint_access(&principal).unwrap();

    let res = app(state)
      .oneshot(
        Request::builder()
          .uri("/whoami")
          .header("Authorization", format!("Bearer {}", minted.token))
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn missing_header_is_401() {
    let res = app(state())
      .oneshot(Request::builder().uri("/whoami").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn garbage_token_is_401() {
    let res = app(state())
      .oneshot(
        Request::builder()
          .uri("/whoami")
          .header("Authorization", "Bearer garbage")
          .body(Body::empty())
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
  }
}
