use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use opshub_core::middlewares::TokenVerifier;
use opshub_core::{AuthReason, CoreError, EventBus, Principal, TokenManager};
use opshub_core::jwt::TokenType;

use crate::catalog::CatalogClient;
use crate::config::GatewayConfig;
use crate::hub::Hub;
use crate::rate_limit::RateLimiter;
use crate::sessions::SessionStore;

const PROXY_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROXY_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Composition root for the gateway. Built once at startup; everything a
/// handler needs hangs off this.
#[derive(Clone)]
pub struct AppState {
  inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
  pub config: GatewayConfig,
  pub tokens: TokenManager,
  pub sessions: SessionStore,
  pub rate_limiter: RateLimiter,
  pub catalog: CatalogClient,
  pub redis: redis::Client,
  pub proxy_client: reqwest::Client,
  pub hub: Hub,
  pub bus: EventBus,
}

impl Deref for AppState {
  type Target = AppStateInner;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

impl AppState {
  pub async fn try_new(config: GatewayConfig) -> Result<Self> {
    let tokens = TokenManager::new(
      &config.auth.access_secret,
      &config.auth.refresh_secret,
      config.auth.issuer.clone(),
      config.auth.audience.clone(),
      config.auth.access_expires_secs,
      config.auth.refresh_expires_secs,
    )?;

    let redis = redis::Client::open(config.redis.url())?;
    let sessions = SessionStore::new(redis.clone(), config.redis.key_prefix.clone());
    let rate_limiter = RateLimiter::new(redis.clone(), config.redis.key_prefix.clone());
    let catalog = CatalogClient::new(config.storage_service_url.clone());

    let proxy_client = reqwest::Client::builder()
      .connect_timeout(PROXY_CONNECT_TIMEOUT)
      .timeout(PROXY_READ_TIMEOUT)
      .redirect(reqwest::redirect::Policy::none())
      .build()?;

    let bus = EventBus::connect(config.bus_url.clone()).await;
    let hub = Hub::new();

    Ok(Self {
      inner: Arc::new(AppStateInner {
        config,
        tokens,
        sessions,
        rate_limiter,
        catalog,
        redis,
        proxy_client,
        hub,
        bus,
      }),
    })
  }
}

impl TokenVerifier for AppState {
  /// Local-only check: signature, expiry, type. Principal hydration happens
  /// on the explicit verify endpoint, not per proxied request.
  fn verify_access_token(&self, token: &str) -> Result<Principal, CoreError> {
    let claims = self.tokens.verify(token, TokenType::Access)?;
    claims
      .principal
      .ok_or_else(|| CoreError::authentication(AuthReason::InvalidToken, "Invalid token"))
  }
}
