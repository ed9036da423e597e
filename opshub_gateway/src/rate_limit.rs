//! Sliding-window rate limiting in Redis.
//!
//! The window is a sorted set of request timestamps per key; trim, count and
//! append run as one server-side script so concurrent requests cannot
//! overshoot the limit. If Redis is down we fail open: the limiter must
//! never be the outage.

use axum::{
  body::Body,
  extract::{ConnectInfo, Request, State},
  middleware::Next,
  response::{IntoResponse, Response},
};
use chrono::Utc;
use std::net::SocketAddr;
use tracing::warn;
use uuid::Uuid;

use opshub_core::{CoreError, Principal};

use crate::state::AppState;

/// Login guard preset: hard-coded stricter floor, independent of config.
pub const LOGIN_GUARD_WINDOW_MS: u64 = 5 * 60 * 1000;
pub const LOGIN_GUARD_LIMIT: u32 = 10;

const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local count = redis.call('ZCARD', key)
if count < limit then
  redis.call('ZADD', key, now, ARGV[4])
  redis.call('PEXPIRE', key, window)
  return 1
end
return 0
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Allowed,
  Denied,
}

#[derive(Clone)]
pub struct RateLimiter {
  client: redis::Client,
  prefix: String,
}

impl RateLimiter {
  pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
    Self {
      client,
      prefix: prefix.into(),
    }
  }

  /// One atomic window check. Redis errors allow the request through.
  pub async fn check(&self, key: &str, window_ms: u64, limit: u32) -> Decision {
    let full_key = format!("{}:ratelimit:{}", self.prefix, key);
    let now_ms = Utc::now().timestamp_millis();
    let member = format!("{}-{}", now_ms, Uuid::new_v4());

    let script = redis::Script::new(SLIDING_WINDOW_SCRIPT);
    let result: Result<i64, redis::RedisError> = async {
      let mut conn = self.client.get_multiplexed_async_connection().await?;
      script
        .key(&full_key)
        .arg(now_ms)
        .arg(window_ms)
        .arg(limit)
        .arg(member)
        .invoke_async(&mut conn)
        .await
    }
    .await;

    match result {
      Ok(1) => Decision::Allowed,
      Ok(_) => Decision::Denied,
      Err(e) => {
        warn!("Rate-limit store unreachable, failing open: {}", e);
        Decision::Allowed
      }
    }
  }
}

/// Best available client address: `X-Forwarded-For` when the deployment
/// fronts the gateway with a proxy we trust, else the socket peer.
pub fn client_ip(req: &Request<Body>, trust_proxy: bool) -> String {
  if trust_proxy {
    if let Some(forwarded) = req
      .headers()
      .get("x-forwarded-for")
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.split(',').next())
    {
      let forwarded = forwarded.trim();
      if !forwarded.is_empty() {
        return forwarded.to_string();
      }
    }
  }
  req
    .extensions()
    .get::<ConnectInfo<SocketAddr>>()
    .map(|ConnectInfo(addr)| addr.ip().to_string())
    .unwrap_or_else(|| "unknown".to_string())
}

/// Preset: per-principal when authenticated, falling back to IP. Applied to
/// the proxied API surface after bearer verification.
pub async fn principal_rate_limit_middleware(
  State(state): State<AppState>,
  req: Request<Body>,
  next: Next,
) -> Response {
  let key = match req.extensions().get::<Principal>() {
    Some(principal) => format!("user:{}", principal.id),
    None => format!("ip:{}", client_ip(&req, state.config.trust_proxy)),
  };
  let config = &state.config.rate_limit;
  match state
    .rate_limiter
    .check(&key, config.window_ms, config.max_requests)
    .await
  {
    Decision::Allowed => next.run(req).await,
    Decision::Denied => CoreError::RateLimited("Too many requests, slow down".to_string())
      .into_response(),
  }
}

/// Preset: IP basic, for unauthenticated surfaces.
pub async fn ip_rate_limit_middleware(
  State(state): State<AppState>,
  req: Request<Body>,
  next: Next,
) -> Response {
  let key = format!("ip:{}", client_ip(&req, state.config.trust_proxy));
  let config = &state.config.rate_limit;
  match state
    .rate_limiter
    .check(&key, config.window_ms, config.max_requests)
    .await
  {
    Decision::Allowed => next.run(req).await,
    Decision::Denied => CoreError::RateLimited("Too many requests, slow down".to_string())
      .into_response(),
  }
}

/// Preset: login guard. Stricter than anything configurable; exists to blunt
/// credential stuffing.
pub async fn login_guard_middleware(
  State(state): State<AppState>,
  req: Request<Body>,
  next: Next,
) -> Response {
  let key = format!("login:{}", client_ip(&req, state.config.trust_proxy));
  match state
    .rate_limiter
    .check(&key, LOGIN_GUARD_WINDOW_MS, LOGIN_GUARD_LIMIT)
    .await
  {
    Decision::Allowed => next.run(req).await,
    Decision::Denied => CoreError::RateLimited(
      "Too many login attempts, please try again in 5 minutes".to_string(),
    )
    .into_response(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::Request as HttpRequest;

  #[test]
  fn forwarded_header_wins_only_when_trusted() {
    let req = HttpRequest::builder()
      .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
      .body(Body::empty())
      .unwrap();
    assert_eq!(client_ip(&req, true), "203.0.113.9");
    assert_eq!(client_ip(&req, false), "unknown");
  }

  #[test]
  fn login_guard_is_stricter_than_default_config() {
    assert!(LOGIN_GUARD_LIMIT < 100);
    assert!(LOGIN_GUARD_WINDOW_MS > 60_000);
  }
}
