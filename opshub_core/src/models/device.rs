use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
  Server,
  Network,
  Storage,
  Iot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
  Active,
  Inactive,
  Maintenance,
  Error,
}

impl DeviceStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      DeviceStatus::Active => "active",
      DeviceStatus::Inactive => "inactive",
      DeviceStatus::Maintenance => "maintenance",
      DeviceStatus::Error => "error",
    }
  }
}

/// Who is asking for a status transition. Heartbeats may only move a device
/// between `active` and `error`; `maintenance` and `inactive` are admin-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusActor {
  Admin,
  Probe,
}

impl DeviceStatus {
  pub fn can_transition(self, to: DeviceStatus, actor: StatusActor) -> bool {
    use DeviceStatus::*;
    if self == to {
      return true;
    }
    match actor {
      StatusActor::Admin => match (self, to) {
        (Active, Maintenance) | (Maintenance, Active) => true,
        (Active, Error) | (Maintenance, Error) => true,
        (Error, Active) | (Error, Inactive) => true,
        (Inactive, Active) => true,
        _ => false,
      },
      StatusActor::Probe => matches!((self, to), (Active, Error) | (Error, Active)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionProtocol {
  Ssh,
  Telnet,
  Http,
  Https,
  Snmp,
}

impl ConnectionProtocol {
  pub fn as_str(&self) -> &'static str {
    match self {
      ConnectionProtocol::Ssh => "ssh",
      ConnectionProtocol::Telnet => "telnet",
      ConnectionProtocol::Http => "http",
      ConnectionProtocol::Https => "https",
      ConnectionProtocol::Snmp => "snmp",
    }
  }
}

const SECRET_MASK: &str = "********";

/// How to reach a device. The catalog store holds the encrypted secrets;
/// only its `getDecryptedConnectionInfo` endpoint ever returns them in the
/// clear, and only the probe engine calls it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
  pub protocol: ConnectionProtocol,
  pub host: String,
  pub port: u16,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub password: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub private_key: Option<String>,
  #[serde(default = "default_timeout_sec")]
  pub timeout_sec: u64,
  #[serde(default = "default_retry_attempts")]
  pub retry_attempts: u32,
  #[serde(default)]
  pub enable_sudo: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sudo_password: Option<String>,
}

fn default_timeout_sec() -> u64 {
  30
}

fn default_retry_attempts() -> u32 {
  1
}

impl ConnectionInfo {
  /// Copy with every secret replaced by a mask. This is the only form that
  /// may leave the service in an API response.
  pub fn masked(&self) -> Self {
    let mask = |s: &Option<String>| s.as_ref().map(|_| SECRET_MASK.to_string());
    Self {
      password: mask(&self.password),
      private_key: mask(&self.private_key),
      sudo_password: mask(&self.sudo_password),
      ..self.clone()
    }
  }

  pub fn has_credentials(&self) -> bool {
    self.password.is_some() || self.private_key.is_some()
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub device_type: DeviceType,
  pub status: DeviceStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub group_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub connection_info: Option<ConnectionInfo>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub metadata: HashMap<String, serde_json::Value>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Device {
  pub fn masked(&self) -> Self {
    Self {
      connection_info: self.connection_info.as_ref().map(ConnectionInfo::masked),
      ..self.clone()
    }
  }
}

/// Point-in-time metrics reported alongside heartbeats. Unknown fields from
/// newer agents are preserved in `extra` rather than dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetrics {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub cpu_percent: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub memory_percent: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub disk_percent: Option<f64>,
  #[serde(flatten)]
  pub extra: HashMap<String, serde_json::Value>,
}

/// Ephemeral live status, written on heartbeat with a 5 minute TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveDeviceStatus {
  pub status: DeviceStatus,
  pub last_heartbeat: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub metrics: Option<DeviceMetrics>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCreateRequest {
  #[validate(length(min = 1, max = 255))]
  pub name: String,
  #[serde(rename = "type")]
  pub device_type: DeviceType,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub group_id: Option<String>,
  #[serde(default)]
  pub connection_info: Option<ConnectionInfo>,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(default)]
  pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeviceUpdateRequest {
  #[validate(length(min = 1, max = 255))]
  pub name: Option<String>,
  #[serde(rename = "type")]
  pub device_type: Option<DeviceType>,
  pub status: Option<DeviceStatus>,
  pub group_id: Option<String>,
  pub connection_info: Option<ConnectionInfo>,
  pub tags: Option<Vec<String>>,
  pub metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
  pub status: DeviceStatus,
  #[serde(default)]
  pub metrics: Option<DeviceMetrics>,
  #[serde(default)]
  pub metadata: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
  pub success: bool,
  pub timestamp: DateTime<Utc>,
  pub device_id: String,
}

/// Closed set of probe failure codes. Transport errors that do not match a
/// specific code collapse into the protocol's `_CONNECTION_FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProbeErrorCode {
  HostUnreachable,
  SshAuthFailed,
  SshConnectionRefused,
  SshTimeout,
  SshConnectionFailed,
  HttpConnectionRefused,
  HttpAuthFailed,
  HttpTimeout,
  HttpConnectionFailed,
  SnmpTimeout,
  SnmpUnknownHost,
  SnmpConnectionFailed,
  UnsupportedProtocol,
}

/// Probe outcome. Strictly read-only with respect to the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
  pub success: bool,
  pub protocol: ConnectionProtocol,
  pub response_time_ms: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub details: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_code: Option<ProbeErrorCode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFilter {
  pub group_id: Option<String>,
  pub status: Option<DeviceStatus>,
  #[serde(rename = "type")]
  pub device_type: Option<DeviceType>,
  pub tags: Option<String>,
  pub limit: Option<u32>,
  pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceListPage {
  pub items: Vec<Device>,
  pub total: u64,
  pub limit: u32,
  pub offset: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealthSummary {
  pub total: u64,
  pub by_status: HashMap<String, u64>,
  pub with_live_status: u64,
  pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn masking_replaces_every_secret() {
    let info = ConnectionInfo {
      protocol: ConnectionProtocol::Ssh,
      host: "10.0.0.5".into(),
      port: 22,
      username: Some("root".into()),
      password: Some("hunter2".into()),
      private_key: None,
      timeout_sec: 30,
      retry_attempts: 1,
      enable_sudo: true,
      sudo_password: Some("hunter2".into()),
    };
    let masked = info.masked();
    assert_eq!(masked.password.as_deref(), Some(SECRET_MASK));
    assert_eq!(masked.sudo_password.as_deref(), Some(SECRET_MASK));
    assert_eq!(masked.username.as_deref(), Some("root"));
    assert!(masked.private_key.is_none());
  }

  #[test]
  fn probe_may_only_toggle_active_and_error() {
    use DeviceStatus::*;
    assert!(Active.can_transition(Error, StatusActor::Probe));
    assert!(Error.can_transition(Active, StatusActor::Probe));
    assert!(!Active.can_transition(Maintenance, StatusActor::Probe));
    assert!(!Maintenance.can_transition(Error, StatusActor::Probe));
    assert!(!Error.can_transition(Inactive, StatusActor::Probe));
  }

  #[test]
  fn admin_transitions_follow_state_machine() {
    use DeviceStatus::*;
    assert!(Active.can_transition(Maintenance, StatusActor::Admin));
    assert!(Maintenance.can_transition(Active, StatusActor::Admin));
    assert!(Error.can_transition(Inactive, StatusActor::Admin));
    assert!(!(Inactive.can_transition(Maintenance, StatusActor::Admin)));
  }

  #[test]
  fn self_transition_is_always_allowed() {
    assert!(DeviceStatus::Active.can_transition(DeviceStatus::Active, StatusActor::Probe));
  }

  #[test]
  fn metrics_preserve_unknown_fields() {
    let raw = serde_json::json!({
      "cpuPercent": 42.5,
      "gpuPercent": 12.0
    });
    let metrics: DeviceMetrics = serde_json::from_value(raw).unwrap();
    assert_eq!(metrics.cpu_percent, Some(42.5));
    assert_eq!(metrics.extra["gpuPercent"], serde_json::json!(12.0));
  }

  #[test]
  fn error_codes_serialize_screaming_snake() {
    assert_eq!(
      serde_json::to_string(&ProbeErrorCode::SshAuthFailed).unwrap(),
      "\"SSH_AUTH_FAILED\""
    );
    assert_eq!(
      serde_json::to_string(&ProbeErrorCode::HostUnreachable).unwrap(),
      "\"HOST_UNREACHABLE\""
    );
  }
}
