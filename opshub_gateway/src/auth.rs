//! Token lifecycle operations behind the auth endpoints.
//!
//! All credential failures collapse into one "Invalid credentials" reply at
//! the surface; which of unknown-user / wrong-password / inactive actually
//! happened is visible only in the logs.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use opshub_core::jwt::TokenType;
use opshub_core::{AuthReason, CoreError, Principal};

use crate::catalog::{CatalogAuthError, CredentialFailure};
use crate::error::{GatewayError, GatewayResult};
use crate::sessions::SessionRecord;
use crate::state::AppState;

pub const BEARER: &str = "Bearer";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
  pub username: String,
  pub password: String,
  #[serde(rename = "rememberMe", default)]
  pub remember_me: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_in: u64,
  pub token_type: &'static str,
  pub user: Principal,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
  #[serde(rename = "refreshToken")]
  pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
  pub access_token: String,
  pub expires_in: u64,
  pub token_type: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
  #[serde(rename = "refreshToken", default)]
  pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
  pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
  pub valid: bool,
  pub user: Principal,
}

pub async fn login(
  state: &AppState,
  req: LoginRequest,
  client_ip: String,
  user_agent: Option<String>,
) -> GatewayResult<LoginResponse> {
  let user = match state
    .catalog
    .verify_credentials(&req.username, &req.password)
    .await
  {
    Ok(user) => user,
    Err(CatalogAuthError::Rejected(failure)) => {
      // Log the real reason, answer with the uniform one.
      match failure {
        CredentialFailure::UnknownUser => {
          warn!(username = %req.username, ip = %client_ip, "Login failed: unknown user")
        }
        CredentialFailure::WrongPassword => {
          warn!(username = %req.username, ip = %client_ip, "Login failed: wrong password")
        }
        CredentialFailure::Inactive => {
          warn!(username = %req.username, ip = %client_ip, "Login failed: account inactive")
        }
      }
      return Err(CoreError::invalid_credentials().into());
    }
    Err(CatalogAuthError::Unavailable(msg)) => {
      return Err(CoreError::storage_unavailable(msg).into());
    }
  };

  let principal: Principal = user.into();
  let access = state.tokens.mint_access(&principal)?;
  let refresh = state.tokens.mint_refresh(&principal.id)?;

  let record = SessionRecord {
    user_id: principal.id.clone(),
    refresh_id: refresh.jti.clone(),
    created_at: Utc::now(),
    ip_address: Some(client_ip),
    user_agent,
  };
  state
    .sessions
    .save_refresh(&record, refresh.expires_in)
    .await?;

  info!(
    user_id = %principal.id,
    remember_me = req.remember_me,
    "Login succeeded"
  );

  Ok(LoginResponse {
    access_token: access.token,
    refresh_token: refresh.token,
    expires_in: access.expires_in,
    token_type: BEARER,
    user: principal,
  })
}

/// Issue a new access credential against a live session. The refresh
/// credential itself rotates only on explicit login.
pub async fn refresh(state: &AppState, req: RefreshRequest) -> GatewayResult<RefreshResponse> {
  let claims = state.tokens.verify(&req.refresh_token, TokenType::Refresh)?;

  let session = state.sessions.lookup_refresh(&claims.jti).await?;
  if session.is_none() {
    warn!(refresh_id = %claims.jti, "Refresh rejected: no session record");
    return Err(
      CoreError::authentication(AuthReason::InvalidToken, "Invalid token").into(),
    );
  }

  // Re-hydrate: a user deactivated since login must not mint new access.
  let user = state
    .catalog
    .get_user(&claims.sub)
    .await
    .map_err(GatewayError::Core)?;
  let principal: Principal = match user {
    Some(user) if user.is_active => user.into(),
    Some(_) => {
      warn!(user_id = %claims.sub, "Refresh rejected: account inactive");
      return Err(CoreError::invalid_credentials().into());
    }
    None => {
      warn!(user_id = %claims.sub, "Refresh rejected: user gone");
      return Err(CoreError::invalid_credentials().into());
    }
  };

  let access = state.tokens.mint_access(&principal)?;
  Ok(RefreshResponse {
    access_token: access.token,
    expires_in: access.expires_in,
    token_type: BEARER,
  })
}

/// Idempotent. With a refresh credential we delete that one session; without
/// one every session for the principal goes.
pub async fn logout(
  state: &AppState,
  principal: &Principal,
  req: LogoutRequest,
) -> GatewayResult<LogoutResponse> {
  match req.refresh_token.as_deref() {
    Some(token) => match state.tokens.verify(token, TokenType::Refresh) {
      Ok(claims) => {
        state.sessions.delete_refresh(&claims.sub, &claims.jti).await?;
      }
      Err(_) => {
        // Expired or malformed refresh on logout is not worth failing over;
        // fall back to clearing everything for the user.
        state.sessions.delete_all_for_user(&principal.id).await?;
      }
    },
    None => {
      state.sessions.delete_all_for_user(&principal.id).await?;
    }
  }
  info!(user_id = %principal.id, "Logged out");
  Ok(LogoutResponse {
    message: "Successfully logged out",
  })
}

/// Full verification with principal hydration from the catalog store.
pub async fn verify(state: &AppState, principal: &Principal) -> GatewayResult<VerifyResponse> {
  let user = state
    .catalog
    .get_user(&principal.id)
    .await
    .map_err(GatewayError::Core)?;
  match user {
    Some(user) if user.is_active => Ok(VerifyResponse {
      valid: true,
      user: user.into(),
    }),
    _ => {
      warn!(user_id = %principal.id, "Verify rejected: user gone or inactive");
      Err(CoreError::authentication(AuthReason::InvalidToken, "Invalid token").into())
    }
  }
}
