//! Storage-service (catalog store) client for the auth plane.
//!
//! Credential checks are fully delegated: the gateway never sees password
//! hashes. The caller decides how much of a failure to reveal; this client
//! keeps the distinction (unknown user / wrong password / inactive) for the
//! logs.

use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use opshub_core::models::auth::UserRecord;
use opshub_core::CoreError;

const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a credential check failed. Never surfaced verbatim to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFailure {
  UnknownUser,
  WrongPassword,
  Inactive,
}

#[derive(Debug)]
pub enum CatalogAuthError {
  Rejected(CredentialFailure),
  Unavailable(String),
}

#[derive(Clone)]
pub struct CatalogClient {
  base_url: String,
  client: reqwest::Client,
}

#[derive(Serialize)]
struct VerifyCredentialsBody<'a> {
  username: &'a str,
  password: &'a str,
}

impl CatalogClient {
  pub fn new(base_url: impl Into<String>) -> Self {
    let client = reqwest::Client::builder()
      .timeout(CATALOG_TIMEOUT)
      .connect_timeout(CATALOG_TIMEOUT)
      .build()
      .unwrap_or_default();
    Self {
      base_url: base_url.into(),
      client,
    }
  }

  /// Delegate a username/password check to the catalog store.
  pub async fn verify_credentials(
    &self,
    username: &str,
    password: &str,
  ) -> Result<UserRecord, CatalogAuthError> {
    let url = format!("{}/api/v1/users/verify-credentials", self.base_url);
    let response = self
      .client
      .post(&url)
      .json(&VerifyCredentialsBody { username, password })
      .send()
      .await
      .map_err(|e| CatalogAuthError::Unavailable(e.to_string()))?;

    match response.status() {
      StatusCode::OK => {
        let user: UserRecord = response
          .json()
          .await
          .map_err(|e| CatalogAuthError::Unavailable(e.to_string()))?;
        if !user.is_active {
          return Err(CatalogAuthError::Rejected(CredentialFailure::Inactive));
        }
        Ok(user)
      }
      StatusCode::NOT_FOUND => Err(CatalogAuthError::Rejected(CredentialFailure::UnknownUser)),
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
        Err(CatalogAuthError::Rejected(CredentialFailure::WrongPassword))
      }
      status => {
        warn!("Catalog credential check returned {}", status);
        Err(CatalogAuthError::Unavailable(format!(
          "catalog returned {status}"
        )))
      }
    }
  }

  /// Hydrate a user record by id. `Ok(None)` means the user is gone.
  pub async fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, CoreError> {
    let url = format!("{}/api/v1/users/{}", self.base_url, user_id);
    let response = self
      .client
      .get(&url)
      .send()
      .await
      .map_err(|e| CoreError::storage_unavailable(e.to_string()))?;

    match response.status() {
      StatusCode::OK => {
        let user = response
          .json()
          .await
          .map_err(|e| CoreError::storage_unavailable(e.to_string()))?;
        Ok(Some(user))
      }
      StatusCode::NOT_FOUND => Ok(None),
      status => Err(CoreError::storage_unavailable(format!(
        "catalog returned {status}"
      ))),
    }
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }
}
