use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
  pub server: ServerConfig,
  pub storage_service_url: String,
  pub redis: RedisConfig,
  pub bus_url: String,
  pub influx: InfluxConfig,
  pub probe: ProbeConfig,
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
      port: 8101,
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

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
  pub url: Option<String>,
  pub token: Option<String>,
  pub bucket: String,
  pub org: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
  /// Global cap on concurrently running probes.
  pub max_concurrent: usize,
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self { max_concurrent: 64 }
  }
}

impl Default for DeviceConfig {
  fn default() -> Self {
    Self {
      server: ServerConfig::default(),
      storage_service_url: "http://127.0.0.1:8201".to_string(),
      redis: RedisConfig::default(),
      bus_url: "nats://127.0.0.1:4222".to_string(),
      influx: InfluxConfig {
        url: None,
        token: None,
        bucket: "device-metrics".to_string(),
        org: "opshub".to_string(),
      },
      probe: ProbeConfig::default(),
    }
  }
}

impl DeviceConfig {
  pub fn load(path: Option<&str>) -> Result<Self> {
    let mut config = match path {
      Some(path) => {
        let content =
          std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        serde_yaml::from_str(&content).with_context(|| format!("parsing config {path}"))?
      }
      None => ["device.yml", "/etc/opshub/device.yml"]
        .iter()
        .find_map(|p| {
          std::fs::read_to_string(p)
            .ok()
            .and_then(|c| serde_yaml::from_str(&c).ok())
        })
        .unwrap_or_default(),
    };
    apply_env(&mut config);
    Ok(config)
  }
}

fn apply_env(config: &mut DeviceConfig) {
  if let Some(v) = env::var("PORT").ok().and_then(|v| v.parse().ok()) {
    config.server.port = v;
  }
  if let Ok(v) = env::var("STORAGE_SERVICE_URL") {
    config.storage_service_url = v;
  }
  if let Ok(v) = env::var("INFLUXDB_URL") {
    config.influx.url = Some(v);
  }
  if let Ok(v) = env::var("INFLUXDB_TOKEN") {
    config.influx.token = Some(v);
  }
  if let Ok(v) = env::var("KAFKA_BROKERS").or_else(|_| env::var("BUS_URL")) {
    config.bus_url = v;
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
}
