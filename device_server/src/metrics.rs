//! Best-effort forwarding of heartbeat metrics to the time-series sink.
//!
//! Line protocol over HTTP, 5s timeout, no retry. A missing or broken sink
//! only ever costs a log line.

use std::time::Duration;
use tracing::{debug, warn};

use opshub_core::models::device::DeviceMetrics;

use crate::config::InfluxConfig;

const SINK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct InfluxSink {
  config: InfluxConfig,
  client: reqwest::Client,
}

impl InfluxSink {
  pub fn new(config: InfluxConfig) -> Self {
    let client = reqwest::Client::builder()
      .timeout(SINK_TIMEOUT)
      .build()
      .unwrap_or_default();
    Self { config, client }
  }

  pub async fn write(&self, device_id: &str, metrics: &DeviceMetrics) {
    let Some(url) = &self.config.url else {
      return;
    };

    let line = to_line_protocol(device_id, metrics);
    if line.is_empty() {
      return;
    }

    let endpoint = format!(
      "{}/api/v2/write?org={}&bucket={}&precision=ms",
      url, self.config.org, self.config.bucket
    );
    let mut request = self.client.post(&endpoint).body(line);
    if let Some(token) = &self.config.token {
      request = request.header("Authorization", format!("Token {token}"));
    }

    match request.send().await {
      Ok(response) if response.status().is_success() => {
        debug!(device = %device_id, "Metrics forwarded");
      }
      Ok(response) => {
        warn!(device = %device_id, status = %response.status(), "Metrics sink rejected write");
      }
      Err(e) => {
        warn!(device = %device_id, "Metrics sink unreachable: {}", e);
      }
    }
  }
}

fn to_line_protocol(device_id: &str, metrics: &DeviceMetrics) -> String {
  let mut fields: Vec<String> = Vec::new();
  if let Some(cpu) = metrics.cpu_percent {
    fields.push(format!("cpu_percent={cpu}"));
  }
  if let Some(memory) = metrics.memory_percent {
    fields.push(format!("memory_percent={memory}"));
  }
  if let Some(disk) = metrics.disk_percent {
    fields.push(format!("disk_percent={disk}"));
  }
  for (key, value) in &metrics.extra {
    if let Some(number) = value.as_f64() {
      fields.push(format!("{}={}", sanitize_field_key(key), number));
    }
  }
  if fields.is_empty() {
    return String::new();
  }
  format!(
    "device_metrics,device_id={} {} {}",
    device_id.replace([' ', ','], "_"),
    fields.join(","),
    chrono::Utc::now().timestamp_millis()
  )
}

fn sanitize_field_key(key: &str) -> String {
  key
    .chars()
    .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn line_protocol_shape() {
    let metrics = DeviceMetrics {
      cpu_percent: Some(42.5),
      memory_percent: Some(60.0),
      disk_percent: None,
      extra: [("gpu usage".to_string(), serde_json::json!(10.0))]
        .into_iter()
        .collect(),
    };
    let line = to_line_protocol("dev-1", &metrics);
    assert!(line.starts_with("device_metrics,device_id=dev-1 "));
    assert!(line.contains("cpu_percent=42.5"));
    assert!(line.contains("memory_percent=60"));
    assert!(line.contains("gpu_usage=10"));
    assert!(!line.contains("disk_percent"));
  }

  #[test]
  fn empty_metrics_produce_no_line() {
    assert!(to_line_protocol("dev-1", &DeviceMetrics::default()).is_empty());
  }
}
