use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
  pub server: ServerConfig,
  pub postgres: PostgresConfig,
  pub redis: RedisConfig,
  pub bus_url: String,
  /// Process-wide secret the provider API keys are sealed with.
  pub encryption_key: String,
  pub cache_ttl_secs: u64,
  pub openai_api_key: Option<String>,
  pub anthropic_api_key: Option<String>,
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
      port: 8301,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
  pub host: String,
  pub port: u16,
  pub user: String,
  pub password: String,
  pub database: String,
}

impl Default for PostgresConfig {
  fn default() -> Self {
    Self {
      host: "127.0.0.1".to_string(),
      port: 5432,
      user: "opshub".to_string(),
      password: "opshub".to_string(),
      database: "opshub_llm".to_string(),
    }
  }
}

impl PostgresConfig {
  pub fn url(&self) -> String {
    format!(
      "postgres://{}:{}@{}:{}/{}",
      self.user, self.password, self.host, self.port, self.database
    )
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

impl Default for LlmConfig {
  fn default() -> Self {
    Self {
      server: ServerConfig::default(),
      postgres: PostgresConfig::default(),
      redis: RedisConfig::default(),
      bus_url: "nats://127.0.0.1:4222".to_string(),
      encryption_key: String::new(),
      cache_ttl_secs: 3600,
      openai_api_key: None,
      anthropic_api_key: None,
    }
  }
}

impl LlmConfig {
  pub fn load(path: Option<&str>) -> Result<Self> {
    let mut config = match path {
      Some(path) => {
        let content =
          std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        serde_yaml::from_str(&content).with_context(|| format!("parsing config {path}"))?
      }
      None => ["llm.yml", "/etc/opshub/llm.yml"]
        .iter()
        .find_map(|p| {
          std::fs::read_to_string(p)
            .ok()
            .and_then(|c| serde_yaml::from_str(&c).ok())
        })
        .unwrap_or_default(),
    };
    apply_env(&mut config);
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.encryption_key.len() < 32 {
      bail!("ENCRYPTION_KEY must be set and at least 32 characters");
    }
    Ok(())
  }
}

fn apply_env(config: &mut LlmConfig) {
  if let Some(v) = env::var("LLM_SERVICE_PORT").ok().and_then(|v| v.parse().ok()) {
    config.server.port = v;
  }
  if let Ok(v) = env::var("POSTGRES_HOST") {
    config.postgres.host = v;
  }
  if let Some(v) = env::var("POSTGRES_PORT").ok().and_then(|v| v.parse().ok()) {
    config.postgres.port = v;
  }
  if let Ok(v) = env::var("POSTGRES_USER") {
    config.postgres.user = v;
  }
  if let Ok(v) = env::var("POSTGRES_PASSWORD") {
    config.postgres.password = v;
  }
  if let Ok(v) = env::var("POSTGRES_DB") {
    config.postgres.database = v;
  }
  if let Ok(v) = env::var("REDIS_HOST") {
    config.redis.host = v;
  }
  if let Some(v) = env::var("REDIS_PORT").ok().and_then(|v| v.parse().ok()) {
    config.redis.port = v;
  }
  if let Ok(v) = env::var("REDIS_PASSWORD") {
    if !v.is_empty() {
      config.redis.password = Some(v);
    }
  }
  if let Ok(v) = env::var("REDIS_KEY_PREFIX") {
    config.redis.key_prefix = v;
  }
  if let Ok(v) = env::var("KAFKA_BROKERS").or_else(|_| env::var("BUS_URL")) {
    config.bus_url = v;
  }
  if let Ok(v) = env::var("ENCRYPTION_KEY") {
    config.encryption_key = v;
  }
  if let Ok(v) = env::var("OPENAI_API_KEY") {
    if !v.is_empty() {
      config.openai_api_key = Some(v);
    }
  }
  if let Ok(v) = env::var("ANTHROPIC_API_KEY") {
    if !v.is_empty() {
      config.anthropic_api_key = Some(v);
    }
  }
  if let Some(v) = env::var("LLM_CACHE_TTL_SECS").ok().and_then(|v| v.parse().ok()) {
    config.cache_ttl_secs = v;
  }
}
