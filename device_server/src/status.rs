//! Live status cache and the heartbeat pipeline.
//!
//! Heartbeats compare-and-set the ephemeral status entry (5 min TTL), emit
//! `DeviceStatusChanged` when the status moved, forward metrics best-effort,
//! and always answer the caller even when the bus is down.

use chrono::Utc;
use tracing::warn;

use opshub_core::events::{DeviceEventKind, TOPIC_DEVICE_EVENTS, TOPIC_DEVICE_STATUS};
use opshub_core::models::device::{
  DeviceStatus, HeartbeatRequest, HeartbeatResponse, LiveDeviceStatus, StatusActor,
};
use opshub_core::{CoreError, DomainEvent, EventBus, WsMessage, WsMessageType};

use crate::error::DeviceResult;
use crate::metrics::InfluxSink;

const LIVE_STATUS_TTL_SECS: u64 = 300;

/// Atomic get-and-set so two racing heartbeats cannot both observe the same
/// previous value.
const SWAP_SCRIPT: &str = r#"
local prev = redis.call('GET', KEYS[1])
redis.call('SET', KEYS[1], ARGV[1], 'EX', tonumber(ARGV[2]))
return prev
"#;

#[derive(Clone)]
pub struct LiveStatusStore {
  redis: redis::Client,
  prefix: String,
}

impl LiveStatusStore {
  pub fn new(redis: redis::Client, prefix: impl Into<String>) -> Self {
    Self {
      redis,
      prefix: prefix.into(),
    }
  }

  fn key(&self, device_id: &str) -> String {
    format!("{}:device:live:{}", self.prefix, device_id)
  }

  pub async fn get(&self, device_id: &str) -> DeviceResult<Option<LiveDeviceStatus>> {
    let mut conn = self.redis.get_multiplexed_async_connection().await?;
    let raw: Option<String> = redis::AsyncCommands::get(&mut conn, self.key(device_id)).await?;
    match raw {
      Some(json) => Ok(Some(serde_json::from_str(&json)?)),
      None => Ok(None),
    }
  }

  /// Write the new entry and return what was there before.
  pub async fn swap(
    &self,
    device_id: &str,
    status: &LiveDeviceStatus,
  ) -> DeviceResult<Option<LiveDeviceStatus>> {
    let mut conn = self.redis.get_multiplexed_async_connection().await?;
    let payload = serde_json::to_string(status)?;
    let script = redis::Script::new(SWAP_SCRIPT);
    let prev: Option<String> = script
      .key(self.key(device_id))
      .arg(payload)
      .arg(LIVE_STATUS_TTL_SECS)
      .invoke_async(&mut conn)
      .await?;
    match prev {
      Some(json) => Ok(serde_json::from_str(&json).ok()),
      None => Ok(None),
    }
  }

  pub async fn count(&self) -> u64 {
    let pattern = format!("{}:device:live:*", self.prefix);
    let result: Result<u64, redis::RedisError> = async {
      let mut conn = self.redis.get_multiplexed_async_connection().await?;
      let mut cursor: u64 = 0;
      let mut count: u64 = 0;
      loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
          .arg(cursor)
          .arg("MATCH")
          .arg(&pattern)
          .arg("COUNT")
          .arg(200)
          .query_async(&mut conn)
          .await?;
        count += keys.len() as u64;
        cursor = next;
        if cursor == 0 {
          break;
        }
      }
      Ok(count)
    }
    .await;
    result.unwrap_or(0)
  }
}

pub struct HeartbeatPipeline {
  pub live: LiveStatusStore,
  pub bus: EventBus,
  pub metrics: InfluxSink,
}

impl HeartbeatPipeline {
  /// `POST /devices/{id}/status`. Bus and metrics failures are logged, never
  /// surfaced; only a cache outage or an illegal transition fails the call.
  pub async fn handle(
    &self,
    device_id: &str,
    request: HeartbeatRequest,
  ) -> DeviceResult<HeartbeatResponse> {
    let previous = self.live.get(device_id).await.ok().flatten();
    if let Some(previous) = &previous {
      if !previous
        .status
        .can_transition(request.status, StatusActor::Probe)
      {
        return Err(
          CoreError::validation(format!(
            "heartbeat may not move device from {} to {}",
            previous.status.as_str(),
            request.status.as_str()
          ))
          .into(),
        );
      }
    }

    let entry = LiveDeviceStatus {
      status: request.status,
      last_heartbeat: Utc::now(),
      metrics: request.metrics.clone(),
    };
    let swapped = self.live.swap(device_id, &entry).await?;
    let previous_status = swapped.map(|s| s.status);

    if previous_status != Some(request.status) {
      self
        .emit_status_changed(device_id, previous_status, request.status)
        .await;
    }

    if let Some(metrics) = &request.metrics {
      self.metrics.write(device_id, metrics).await;
    }

    Ok(HeartbeatResponse {
      success: true,
      timestamp: Utc::now(),
      device_id: device_id.to_string(),
    })
  }

  pub async fn emit_status_changed(
    &self,
    device_id: &str,
    previous: Option<DeviceStatus>,
    current: DeviceStatus,
  ) {
    let payload = serde_json::json!({
      "deviceId": device_id,
      "previousStatus": previous.map(|s| s.as_str()),
      "currentStatus": current.as_str(),
    });

    self
      .bus
      .publish_or_drop(
        TOPIC_DEVICE_EVENTS,
        &DomainEvent::device(
          DeviceEventKind::DeviceStatusChanged,
          device_id.to_string(),
          payload.clone(),
        ),
      )
      .await;

    // Realtime frame for anyone watching the device room.
    let frame = WsMessage::new(WsMessageType::DeviceStatus, payload);
    if let Err(e) = self.bus.publish_realtime(TOPIC_DEVICE_STATUS, &frame).await {
      warn!(device = %device_id, "Realtime status frame dropped: {}", e);
    }
  }
}
