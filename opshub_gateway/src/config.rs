//! Gateway configuration: YAML file plus environment overrides.
//!
//! The file is optional; every setting has a default or an env var, and the
//! spec'd `GATEWAY_*` / `JWT_*` / `REDIS_*` variables always win over the
//! file so container deployments need no config mount.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
  pub server: ServerConfig,
  pub auth: AuthConfig,
  pub redis: RedisConfig,
  pub rate_limit: RateLimitConfig,
  pub storage_service_url: String,
  pub bus_url: String,
  pub cors_origins: Vec<String>,
  pub trust_proxy: bool,
  pub upstreams: Vec<UpstreamRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host: "0.0.0.0".to_string(),
      port: 8080,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
  pub access_secret: String,
  pub refresh_secret: String,
  pub access_expires_secs: u64,
  pub refresh_expires_secs: u64,
  pub issuer: String,
  pub audience: String,
}

impl Default for AuthConfig {
  fn default() -> Self {
    Self {
      access_secret: String::new(),
      refresh_secret: String::new(),
      access_expires_secs: 3600,
      refresh_expires_secs: 7 * 24 * 3600,
      issuer: "opshub-gateway".to_string(),
      audience: "opshub-web".to_string(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
  pub host: String,
  pub port: u16,
  pub password: Option<String>,
  pub db: u32,
  pub key_prefix: String,
}

impl Default for RedisConfig {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".to_string(),
      port: 6379,
      password: None,
      db: 0,
      key_prefix: "opshub".to_string(),
    }
  }
}

impl RedisConfig {
  pub fn url(&self) -> String {
    match &self.password {
      Some(password) => format!(
        "redis://:{}@{}:{}/{}",
        password, self.host, self.port, self.db
      ),
      None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
  pub window_ms: u64,
  pub max_requests: u32,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      window_ms: 60_000,
      max_requests: 100,
    }
  }
}

/// One row of the static routing table: path prefix -> upstream base URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamRoute {
  pub prefix: String,
  pub service: String,
  pub url: String,
}

impl Default for GatewayConfig {
  fn default() -> Self {
    Self {
      server: ServerConfig::default(),
      auth: AuthConfig::default(),
      redis: RedisConfig::default(),
      rate_limit: RateLimitConfig::default(),
      storage_service_url: "http://127.0.0.1:8201".to_string(),
      bus_url: "nats://127.0.0.1:4222".to_string(),
      cors_origins: vec!["*".to_string()],
      trust_proxy: false,
      upstreams: default_upstreams(),
    }
  }
}

fn default_upstreams() -> Vec<UpstreamRoute> {
  [
    ("storage", "http://127.0.0.1:8201"),
    ("devices", "http://127.0.0.1:8101"),
    ("mcp", "http://127.0.0.1:8401"),
    ("llm", "http://127.0.0.1:8301"),
    ("workflows", "http://127.0.0.1:8501"),
  ]
  .into_iter()
  .map(|(svc, url)| UpstreamRoute {
    prefix: format!("/api/v1/{svc}"),
    service: svc.to_string(),
    url: url.to_string(),
  })
  .collect()
}

impl GatewayConfig {
  pub fn load(path: Option<&str>) -> Result<Self> {
    let mut config = match path {
      Some(path) => Self::from_file(path)?,
      None => ["gateway.yml", "/etc/opshub/gateway.yml"]
        .iter()
        .find_map(|p| Self::from_file(p).ok())
        .unwrap_or_default(),
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
  }

  pub fn from_file(path: &str) -> Result<Self> {
    let content =
      std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
    serde_yaml::from_str(&content).with_context(|| format!("parsing config {path}"))
  }

  fn apply_env(&mut self) {
    if let Ok(v) = env::var("GATEWAY_HOST") {
      self.server.host = v;
    }
    if let Some(v) = parse_env("GATEWAY_PORT") {
      self.server.port = v;
    }
    if let Ok(v) = env::var("CORS_ORIGINS") {
      self.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Ok(v) = env::var("TRUST_PROXY") {
      self.trust_proxy = matches!(v.as_str(), "1" | "true" | "yes");
    }
    if let Ok(v) = env::var("JWT_ACCESS_SECRET") {
      self.auth.access_secret = v;
    }
    if let Ok(v) = env::var("JWT_REFRESH_SECRET") {
      self.auth.refresh_secret = v;
    }
    if let Some(v) = env::var("JWT_ACCESS_EXPIRES_IN").ok().and_then(|v| parse_duration_secs(&v)) {
      self.auth.access_expires_secs = v;
    }
    if let Some(v) = env::var("JWT_REFRESH_EXPIRES_IN").ok().and_then(|v| parse_duration_secs(&v)) {
      self.auth.refresh_expires_secs = v;
    }
    if let Ok(v) = env::var("JWT_ISSUER") {
      self.auth.issuer = v;
    }
    if let Ok(v) = env::var("REDIS_HOST") {
      self.redis.host = v;
    }
    if let Some(v) = parse_env("REDIS_PORT") {
      self.redis.port = v;
    }
    if let Ok(v) = env::var("REDIS_PASSWORD") {
      if !v.is_empty() {
        self.redis.password = Some(v);
      }
    }
    if let Some(v) = parse_env("REDIS_DB") {
      self.redis.db = v;
    }
    if let Ok(v) = env::var("REDIS_KEY_PREFIX") {
      self.redis.key_prefix = v;
    }
    if let Ok(v) = env::var("STORAGE_SERVICE_URL") {
      self.storage_service_url = v;
    }
    if let Ok(v) = env::var("KAFKA_BROKERS").or_else(|_| env::var("BUS_URL")) {
      self.bus_url = v;
    }
    if let Some(v) = parse_env("RATE_LIMIT_WINDOW_MS") {
      self.rate_limit.window_ms = v;
    }
    if let Some(v) = parse_env("RATE_LIMIT_MAX_REQUESTS") {
      self.rate_limit.max_requests = v;
    }
  }

  fn validate(&self) -> Result<()> {
    if self.auth.access_secret.len() < 32 {
      bail!("JWT_ACCESS_SECRET must be set and at least 32 bytes");
    }
    if self.auth.refresh_secret.len() < 32 {
      bail!("JWT_REFRESH_SECRET must be set and at least 32 bytes");
    }
    if self.auth.access_secret == self.auth.refresh_secret {
      bail!("JWT access and refresh secrets must differ");
    }
    if self.upstreams.is_empty() {
      bail!("routing table must not be empty");
    }
    if self.rate_limit.window_ms == 0 || self.rate_limit.max_requests == 0 {
      bail!("rate limit window and max requests must be positive");
    }
    Ok(())
  }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
  env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Accepts `3600`, `60s`, `15m`, `1h` or `7d`.
fn parse_duration_secs(value: &str) -> Option<u64> {
  let value = value.trim();
  if let Ok(secs) = value.parse::<u64>() {
    return Some(secs);
  }
  let (num, unit) = value.split_at(value.len().checked_sub(1)?);
  let num: u64 = num.parse().ok()?;
  match unit {
    "s" => Some(num),
    "m" => Some(num * 60),
    "h" => Some(num * 3600),
    "d" => Some(num * 86_400),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn duration_suffixes_parse() {
    assert_eq!(parse_duration_secs("3600"), Some(3600));
    assert_eq!(parse_duration_secs("1h"), Some(3600));
    assert_eq!(parse_duration_secs("7d"), Some(604_800));
    assert_eq!(parse_duration_secs("15m"), Some(900));
    assert_eq!(parse_duration_secs("abc"), None);
  }

  #[test]
  fn default_routing_table_covers_all_services() {
    let config = GatewayConfig::default();
    let prefixes: Vec<&str> = config.upstreams.iter().map(|u| u.prefix.as_str()).collect();
    for svc in ["storage", "devices", "mcp", "llm", "workflows"] {
      assert!(prefixes.contains(&format!("/api/v1/{svc}").as_str()));
    }
  }

  #[test]
  fn validation_rejects_weak_or_equal_secrets() {
    let mut config = GatewayConfig {
      auth: AuthConfig {
        access_secret: "a".repeat(32),
        refresh_secret: "a".repeat(32),
        ..AuthConfig::default()
      },
      ..GatewayConfig::default()
    };
    assert!(config.validate().is_err());
    config.auth.refresh_secret = "b".repeat(32);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn redis_url_includes_password_when_set() {
    let mut redis = RedisConfig::default();
    assert_eq!(redis.url(), "redis://127.0.0.1:6379/0");
    redis.password = Some("s3cret".into());
    assert_eq!(redis.url(), "redis://:s3cret@127.0.0.1:6379/0");
  }
}
