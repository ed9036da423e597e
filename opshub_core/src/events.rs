//! Domain event contracts shared by every OpsHub service.
//!
//! Two families live here: durable domain events published to the topic log
//! (`device-events`, `llm-events`) and the realtime envelope the hub fans
//! out to browsers. Both are closed sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable topics, partition-ordered by event key.
pub const TOPIC_DEVICE_EVENTS: &str = "device-events";
pub const TOPIC_LLM_EVENTS: &str = "llm-events";

/// Realtime fan-in topics consumed by the gateway hub.
pub const TOPIC_WORKFLOW_UPDATES: &str = "workflow:updates";
pub const TOPIC_METRICS_UPDATES: &str = "metrics:updates";
pub const TOPIC_DEVICE_STATUS: &str = "device:status";
pub const TOPIC_CHAT_RESPONSES: &str = "chat:responses";
pub const TOPIC_SYSTEM_ALERTS: &str = "system:alerts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEventKind {
  DeviceCreated,
  DeviceUpdated,
  DeviceDeleted,
  DeviceStatusChanged,
  MetricThresholdExceeded,
  DeviceHealthCheck,
}

impl DeviceEventKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      DeviceEventKind::DeviceCreated => "DeviceCreated",
      DeviceEventKind::DeviceUpdated => "DeviceUpdated",
      DeviceEventKind::DeviceDeleted => "DeviceDeleted",
      DeviceEventKind::DeviceStatusChanged => "DeviceStatusChanged",
      DeviceEventKind::MetricThresholdExceeded => "MetricThresholdExceeded",
      DeviceEventKind::DeviceHealthCheck => "DeviceHealthCheck",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmEventKind {
  LlmRequestStarted,
  LlmRequestCompleted,
  LlmRequestFailed,
  TokenLimitExceeded,
  ModelSwitched,
  ProviderHealthCheck,
  CacheHit,
  CacheMiss,
}

impl LlmEventKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      LlmEventKind::LlmRequestStarted => "LLMRequestStarted",
      LlmEventKind::LlmRequestCompleted => "LLMRequestCompleted",
      LlmEventKind::LlmRequestFailed => "LLMRequestFailed",
      LlmEventKind::TokenLimitExceeded => "TokenLimitExceeded",
      LlmEventKind::ModelSwitched => "ModelSwitched",
      LlmEventKind::ProviderHealthCheck => "ProviderHealthCheck",
      LlmEventKind::CacheHit => "CacheHit",
      LlmEventKind::CacheMiss => "CacheMiss",
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
  pub source: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub correlation_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_id: Option<String>,
}

/// The envelope every domain event travels in. `key` decides partition
/// ordering on the bus (device id, request id, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
  pub event_id: String,
  pub event_type: String,
  pub timestamp: DateTime<Utc>,
  pub key: String,
  pub payload: serde_json::Value,
  pub metadata: EventMetadata,
}

impl DomainEvent {
  pub fn new(
    event_type: impl Into<String>,
    key: impl Into<String>,
    payload: serde_json::Value,
    source: impl Into<String>,
  ) -> Self {
    Self {
      event_id: Uuid::new_v4().to_string(),
      event_type: event_type.into(),
      timestamp: Utc::now(),
      key: key.into(),
      payload,
      metadata: EventMetadata {
        source: source.into(),
        correlation_id: None,
        user_id: None,
      },
    }
  }

  pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
    self.metadata.correlation_id = Some(correlation_id.into());
    self
  }

  pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
    self.metadata.user_id = Some(user_id.into());
    self
  }

  pub fn device(kind: DeviceEventKind, key: impl Into<String>, payload: serde_json::Value) -> Self {
    Self::new(kind.as_str(), key, payload, "device-service")
  }

  pub fn llm(kind: LlmEventKind, key: impl Into<String>, payload: serde_json::Value) -> Self {
    Self::new(kind.as_str(), key, payload, "llm-service")
  }
}

/// Realtime message types delivered over the hub. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsMessageType {
  ExecutionUpdate,
  MetricUpdate,
  DeviceStatus,
  WorkflowProgress,
  ChatResponse,
  Alert,
  Error,
  Heartbeat,
  ConnectionStatus,
  Pong,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Low,
  #[default]
  Normal,
  High,
  Urgent,
}

pub const WS_ENVELOPE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMetadata {
  pub message_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub correlation_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub session_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  pub version: String,
}

/// Outgoing hub frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessage {
  #[serde(rename = "type")]
  pub message_type: WsMessageType,
  pub timestamp: DateTime<Utc>,
  pub payload: serde_json::Value,
  pub metadata: WsMetadata,
}

impl WsMessage {
  pub fn new(message_type: WsMessageType, payload: serde_json::Value) -> Self {
    Self {
      message_type,
      timestamp: Utc::now(),
      payload,
      metadata: WsMetadata {
        message_id: Uuid::new_v4().to_string(),
        correlation_id: None,
        user_id: None,
        session_id: None,
        priority: None,
        version: WS_ENVELOPE_VERSION.to_string(),
      },
    }
  }

  pub fn with_priority(mut self, priority: Priority) -> Self {
    self.metadata.priority = Some(priority);
    self
  }

  pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
    self.metadata.user_id = Some(user_id.into());
    self
  }

  pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
    self.metadata.session_id = Some(session_id.into());
    self
  }

  pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
    self.metadata.correlation_id = Some(correlation_id.into());
    self
  }

  pub fn priority(&self) -> Priority {
    self.metadata.priority.unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn domain_event_wire_shape() {
    let event = DomainEvent::device(
      DeviceEventKind::DeviceStatusChanged,
      "dev-1",
      serde_json::json!({"previousStatus": "active", "currentStatus": "error"}),
    )
    .with_correlation_id("corr-1");
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["eventType"], "DeviceStatusChanged");
    assert_eq!(value["key"], "dev-1");
    assert_eq!(value["metadata"]["source"], "device-service");
    assert_eq!(value["metadata"]["correlationId"], "corr-1");
    assert!(value["eventId"].as_str().unwrap().len() >= 32);
  }

  #[test]
  fn llm_event_types_keep_their_contract_names() {
    assert_eq!(LlmEventKind::LlmRequestStarted.as_str(), "LLMRequestStarted");
    assert_eq!(LlmEventKind::CacheHit.as_str(), "CacheHit");
  }

  #[test]
  fn ws_message_serializes_type_and_version() {
    let msg = WsMessage::new(
      WsMessageType::DeviceStatus,
      serde_json::json!({"deviceId": "dev-1"}),
    )
    .with_priority(Priority::High);
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "device_status");
    assert_eq!(value["metadata"]["version"], WS_ENVELOPE_VERSION);
    assert_eq!(value["metadata"]["priority"], "high");
  }

  #[test]
  fn priority_ordering_puts_low_first() {
    assert!(Priority::Low < Priority::Normal);
    assert!(Priority::Normal < Priority::Urgent);
  }
}
