use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthReason, CoreError};
use crate::models::auth::Principal;

/// Clock skew tolerance between services, in seconds.
const LEEWAY_SECS: u64 = 30;
const MIN_SECRET_BYTES: usize = 32;

pub const DEFAULT_ACCESS_TTL_SECS: u64 = 60 * 60; // 1h
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60; // 7d

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
  Access,
  Refresh,
}

/// Signed claim set. `jti` is the credential id for access credentials and
/// the refresh id (the session key) for refresh credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
  pub sub: String,
  pub jti: String,
  pub iat: i64,
  pub exp: i64,
  pub iss: String,
  pub aud: String,
  pub token_type: TokenType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub principal: Option<Principal>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
  #[error("token expired")]
  Expired,
  #[error("invalid token: {0}")]
  Invalid(String),
  #[error("wrong token type")]
  WrongType,
  #[error("token configuration rejected: {0}")]
  Config(String),
}

impl From<TokenError> for CoreError {
  fn from(err: TokenError) -> Self {
    match err {
      TokenError::Expired => {
        CoreError::authentication(AuthReason::TokenExpired, "Token has expired")
      }
      TokenError::Invalid(_) | TokenError::WrongType => {
        CoreError::authentication(AuthReason::InvalidToken, "Invalid token")
      }
      TokenError::Config(msg) => CoreError::Internal(msg),
    }
  }
}

#[derive(Debug, Clone)]
pub struct MintedToken {
  pub token: String,
  pub jti: String,
  pub expires_in: u64,
}

/// Mints and verifies the platform's symmetric-HMAC credentials. Access and
/// refresh credentials are signed with distinct secrets so a leaked refresh
/// verifier can never validate an access assertion.
#[derive(Clone)]
pub struct TokenManager {
  access_encoding: EncodingKey,
  access_decoding: DecodingKey,
  refresh_encoding: EncodingKey,
  refresh_decoding: DecodingKey,
  issuer: String,
  audience: String,
  access_ttl_secs: u64,
  refresh_ttl_secs: u64,
}

impl TokenManager {
  pub fn new(
    access_secret: &str,
    refresh_secret: &str,
    issuer: impl Into<String>,
    audience: impl Into<String>,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
  ) -> Result<Self, TokenError> {
    if access_secret.len() < MIN_SECRET_BYTES {
      return Err(TokenError::Config(format!(
        "access secret must be at least {MIN_SECRET_BYTES} bytes"
      )));
    }
    if refresh_secret.len() < MIN_SECRET_BYTES {
      return Err(TokenError::Config(format!(
        "refresh secret must be at least {MIN_SECRET_BYTES} bytes"
      )));
    }
    if access_secret == refresh_secret {
      return Err(TokenError::Config(
        "access and refresh secrets must differ".to_string(),
      ));
    }

    Ok(Self {
      access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
      access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
      refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
      refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
      issuer: issuer.into(),
      audience: audience.into(),
      access_ttl_secs,
      refresh_ttl_secs,
    })
  }

  pub fn access_ttl_secs(&self) -> u64 {
    self.access_ttl_secs
  }

  pub fn refresh_ttl_secs(&self) -> u64 {
    self.refresh_ttl_secs
  }

  /// Mint a short-lived access credential carrying the principal.
  pub fn mint_access(&self, principal: &Principal) -> Result<MintedToken, TokenError> {
    let jti = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();
    let claims = TokenClaims {
      sub: principal.id.clone(),
      jti: jti.clone(),
      iat: now,
      exp: now + self.access_ttl_secs as i64,
      iss: self.issuer.clone(),
      aud: self.audience.clone(),
      token_type: TokenType::Access,
      principal: Some(principal.clone()),
    };
    let token = encode(
      &Header::new(Algorithm::HS256),
      &claims,
      &self.access_encoding,
    )
    .map_err(|e| TokenError::Invalid(e.to_string()))?;
    Ok(MintedToken {
      token,
      jti,
      expires_in: self.access_ttl_secs,
    })
  }

  /// Mint a long-lived refresh credential bound to a user id. The returned
  /// `jti` is the refresh id the session store is keyed by.
  pub fn mint_refresh(&self, user_id: &str) -> Result<MintedToken, TokenError> {
    let jti = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();
    let claims = TokenClaims {
      sub: user_id.to_string(),
      jti: jti.clone(),
      iat: now,
      exp: now + self.refresh_ttl_secs as i64,
      iss: self.issuer.clone(),
      aud: self.audience.clone(),
      token_type: TokenType::Refresh,
      principal: None,
    };
    let token = encode(
      &Header::new(Algorithm::HS256),
      &claims,
      &self.refresh_encoding,
    )
    .map_err(|e| TokenError::Invalid(e.to_string()))?;
    Ok(MintedToken {
      token,
      jti,
      expires_in: self.refresh_ttl_secs,
    })
  }

  /// Verify signature, expiry, issuer, audience and declared type.
  pub fn verify(&self, token: &str, expected: TokenType) -> Result<TokenClaims, TokenError> {
    let key = match expected {
      TokenType::Access => &self.access_decoding,
      TokenType::Refresh => &self.refresh_decoding,
    };
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = LEEWAY_SECS;
    validation.set_issuer(&[&self.issuer]);
    validation.set_audience(&[&self.audience]);

    let data = decode::<TokenClaims>(token, key, &validation).map_err(|e| match e.kind() {
      jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
      _ => TokenError::Invalid(e.to_string()),
    })?;

    if data.claims.token_type != expected {
      return Err(TokenError::WrongType);
    }
    Ok(data.claims)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::auth::Role;

  const ACCESS_SECRET: &str = "test-access-secret-0123456789abcdef!";
  const REFRESH_SECRET: &str = "test-refresh-secret-0123456789abcdef";

  fn manager() -> TokenManager {
    TokenManager::new(
      ACCESS_SECRET,
      REFRESH_SECRET,
      "opshub-gateway",
      "opshub-web",
      3600,
      7 * 24 * 3600,
    )
    .unwrap()
  }

  fn alice() -> Principal {
    Principal {
      id: "u-42".into(),
      username: "alice".into(),
      role: Role::Administrator,
      email: Some("alice@example.com".into()),
      is_active: true,
    }
  }

  #[test]
  fn startup_rejects_short_or_equal_secrets() {
    assert!(TokenManager::new("short", REFRESH_SECRET, "i", "a", 1, 1).is_err());
    assert!(TokenManager::new(ACCESS_SECRET, "short", "i", "a", 1, 1).is_err());
    assert!(TokenManager::new(ACCESS_SECRET, ACCESS_SECRET, "i", "a", 1, 1).is_err());
  }

  #[test]
  fn access_round_trip_preserves_principal() {
    let tm = manager();
    let minted = tm.mint_access(&alice()).unwrap();
    let claims = tm.verify(&minted.token, TokenType::Access).unwrap();
    let principal = claims.principal.unwrap();
    assert_eq!(principal.id, "u-42");
    assert_eq!(principal.username, "alice");
    assert_eq!(principal.role, Role::Administrator);
    assert_eq!(claims.jti, minted.jti);
    assert_eq!(claims.iss, "opshub-gateway");
  }

  #[test]
  fn refresh_is_rejected_on_the_access_path() {
    let tm = manager();
    let refresh = tm.mint_refresh("u-42").unwrap();
    // Wrong key entirely: signature fails before the type check.
    assert!(tm.verify(&refresh.token, TokenType::Access).is_err());
    // And the declared type is checked even under the right key.
    let claims = tm.verify(&refresh.token, TokenType::Refresh).unwrap();
    assert_eq!(claims.token_type, TokenType::Refresh);
  }

  #[test]
  fn expired_access_reports_expired() {
    let tm = manager();
    // Hand-roll claims whose exp is far enough in the past to clear leeway.
    let now = Utc::now().timestamp();
    let claims = TokenClaims {
      sub: "u-42".into(),
      jti: Uuid::new_v4().to_string(),
      iat: now - 7200,
      exp: now - 3600,
      iss: "opshub-gateway".into(),
      aud: "opshub-web".into(),
      token_type: TokenType::Access,
      principal: Some(alice()),
    };
    let token = encode(
      &Header::new(Algorithm::HS256),
      &claims,
      &EncodingKey::from_secret(ACCESS_SECRET.as_bytes()),
    )
    .unwrap();
    assert!(matches!(
      tm.verify(&token, TokenType::Access),
      Err(TokenError::Expired)
    ));
  }

  #[test]
  fn garbage_is_invalid_not_expired() {
    let tm = manager();
    assert!(matches!(
      tm.verify("not-a-token", TokenType::Access),
      Err(TokenError::Invalid(_))
    ));
  }
}
