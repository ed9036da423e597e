//! Dependency health aggregation for `/api/v1/system/health`.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::state::AppState;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
  pub name: String,
  pub key: String,
  pub status: &'static str,
  pub response_time_ms: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SystemHealth {
  pub status: &'static str,
  pub healthy: usize,
  pub total: usize,
  pub services: Vec<ServiceHealth>,
  pub timestamp: String,
}

/// Probe every known dependency in parallel and roll the answers up.
pub async fn aggregate(state: &AppState) -> SystemHealth {
  let mut probes: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = ServiceHealth> + Send>>> =
    Vec::new();

  for upstream in &state.config.upstreams {
    probes.push(Box::pin(probe_http(
      upstream.service.clone(),
      format!("{}/health", upstream.url),
      state.proxy_client.clone(),
    )));
  }
  probes.push(Box::pin(probe_redis(state.redis.clone())));
  probes.push(Box::pin(probe_bus(state.clone())));

  let services = join_all(probes).await;
  let healthy = services.iter().filter(|s| s.status == "healthy").count();
  let total = services.len();
  let status = if healthy == total {
    "healthy"
  } else if healthy == 0 {
    "unhealthy"
  } else {
    "degraded"
  };

  SystemHealth {
    status,
    healthy,
    total,
    services,
    timestamp: Utc::now().to_rfc3339(),
  }
}

async fn probe_http(name: String, url: String, client: reqwest::Client) -> ServiceHealth {
  let start = Instant::now();
  let result = tokio::time::timeout(PROBE_TIMEOUT, client.get(&url).send()).await;
  let elapsed = start.elapsed().as_millis() as u64;
  let key = name.clone();

  match result {
    Ok(Ok(response)) if response.status().is_success() => ServiceHealth {
      name,
      key,
      status: "healthy",
      response_time_ms: elapsed,
      details: Some(serde_json::json!({ "statusCode": response.status().as_u16() })),
      error: None,
    },
    Ok(Ok(response)) => ServiceHealth {
      name,
      key,
      status: "unhealthy",
      response_time_ms: elapsed,
      details: None,
      error: Some(format!("health endpoint returned {}", response.status())),
    },
    Ok(Err(e)) => ServiceHealth {
      name,
      key,
      status: "unhealthy",
      response_time_ms: elapsed,
      details: None,
      error: Some(e.to_string()),
    },
    Err(_) => ServiceHealth {
      name,
      key,
      status: "unhealthy",
      response_time_ms: elapsed,
      details: None,
      error: Some("health probe timed out".to_string()),
    },
  }
}

async fn probe_redis(client: redis::Client) -> ServiceHealth {
  let start = Instant::now();
  let result = tokio::time::timeout(PROBE_TIMEOUT, async {
    let mut conn = client.get_multiplexed_async_connection().await?;
    redis::cmd("PING").query_async::<_, String>(&mut conn).await
  })
  .await;
  let elapsed = start.elapsed().as_millis() as u64;

  match result {
    Ok(Ok(_)) => ServiceHealth {
      name: "redis".into(),
      key: "redis".into(),
      status: "healthy",
      response_time_ms: elapsed,
      details: None,
      error: None,
    },
    Ok(Err(e)) => ServiceHealth {
      name: "redis".into(),
      key: "redis".into(),
      status: "unhealthy",
      response_time_ms: elapsed,
      details: None,
      error: Some(e.to_string()),
    },
    Err(_) => ServiceHealth {
      name: "redis".into(),
      key: "redis".into(),
      status: "unhealthy",
      response_time_ms: elapsed,
      details: None,
      error: Some("ping timed out".to_string()),
    },
  }
}

async fn probe_bus(state: AppState) -> ServiceHealth {
  let start = Instant::now();
  let connected = state.bus.is_connected().await;
  let elapsed = start.elapsed().as_millis() as u64;
  ServiceHealth {
    name: "event-bus".into(),
    key: "bus".into(),
    status: if connected { "healthy" } else { "unhealthy" },
    response_time_ms: elapsed,
    details: Some(serde_json::json!({ "droppedEvents": state.bus.dropped_count() })),
    error: if connected {
      None
    } else {
      Some("bus disconnected".to_string())
    },
  }
}
