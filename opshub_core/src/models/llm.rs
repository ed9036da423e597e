use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
  Openai,
  Anthropic,
  Google,
  Ollama,
  Custom,
}

impl ProviderType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ProviderType::Openai => "openai",
      ProviderType::Anthropic => "anthropic",
      ProviderType::Google => "google",
      ProviderType::Ollama => "ollama",
      ProviderType::Custom => "custom",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPurpose {
  Chat,
  Workflow,
  Both,
}

impl ProviderPurpose {
  pub fn serves_chat(&self) -> bool {
    matches!(self, ProviderPurpose::Chat | ProviderPurpose::Both)
  }

  pub fn serves_workflow(&self) -> bool {
    matches!(self, ProviderPurpose::Workflow | ProviderPurpose::Both)
  }
}

/// Provider connection settings. `api_key` is stored encrypted at rest and
/// never serialized back out of the read path; see `LlmProvider::masked`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub api_key: Option<String>,
  pub base_url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub organization: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub headers: Option<HashMap<String, String>>,
  #[serde(rename = "timeout", default = "default_provider_timeout")]
  pub timeout_sec: u64,
}

fn default_provider_timeout() -> u64 {
  30
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultFlags {
  #[serde(default)]
  pub for_chat: bool,
  #[serde(default)]
  pub for_workflow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmProvider {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub provider_type: ProviderType,
  pub purpose: ProviderPurpose,
  pub config: ProviderConfig,
  #[serde(default)]
  pub models: Vec<String>,
  pub is_active: bool,
  pub is_default: DefaultFlags,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl LlmProvider {
  /// Read-path shape: the config with the key omitted entirely.
  pub fn masked(&self) -> Self {
    Self {
      config: ProviderConfig {
        api_key: None,
        ..self.config.clone()
      },
      ..self.clone()
    }
  }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCreateRequest {
  #[validate(length(min = 1, max = 255))]
  pub name: String,
  #[serde(rename = "type")]
  pub provider_type: ProviderType,
  #[serde(default = "default_purpose")]
  pub purpose: ProviderPurpose,
  pub config: ProviderConfig,
  #[serde(default)]
  pub models: Vec<String>,
  #[serde(default = "default_true")]
  pub is_active: bool,
}

fn default_purpose() -> ProviderPurpose {
  ProviderPurpose::Both
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUpdateRequest {
  #[validate(length(min = 1, max = 255))]
  pub name: Option<String>,
  pub purpose: Option<ProviderPurpose>,
  pub config: Option<ProviderConfig>,
  pub models: Option<Vec<String>>,
  pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
  System,
  User,
  Assistant,
}

impl std::fmt::Display for ChatRole {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ChatRole::System => write!(f, "system"),
      ChatRole::User => write!(f, "user"),
      ChatRole::Assistant => write!(f, "assistant"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
  pub role: ChatRole,
  pub content: String,
}

impl ChatMessage {
  pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
    Self {
      role,
      content: content.into(),
    }
  }

  pub fn system(content: impl Into<String>) -> Self {
    Self::new(ChatRole::System, content)
  }

  pub fn user(content: impl Into<String>) -> Self {
    Self::new(ChatRole::User, content)
  }

  pub fn assistant(content: impl Into<String>) -> Self {
    Self::new(ChatRole::Assistant, content)
  }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
  #[validate(length(min = 1))]
  pub messages: Vec<ChatMessage>,
  #[serde(default)]
  pub model: Option<String>,
  #[serde(default)]
  pub provider_id: Option<String>,
  #[serde(default)]
  pub temperature: Option<f64>,
  #[serde(default)]
  pub max_tokens: Option<u32>,
  #[serde(default)]
  pub stream: Option<bool>,
  /// Realtime hub session the streaming fragments should be fanned out to.
  #[serde(default)]
  pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
  pub prompt_tokens: u32,
  pub completion_tokens: u32,
  pub total_tokens: u32,
  #[serde(default)]
  pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatChoice {
  pub message: ChatMessage,
  pub finish_reason: String,
}

/// The uniform response shape every vendor reply is normalized into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
  pub id: String,
  pub model: String,
  pub usage: TokenUsage,
  pub choices: Vec<ChatChoice>,
  pub created_at: DateTime<Utc>,
  pub finish_reason: String,
}

impl ChatResponse {
  pub fn content(&self) -> &str {
    self
      .choices
      .first()
      .map(|c| c.message.content.as_str())
      .unwrap_or("")
  }
}

/// A streaming fragment. `finished` stays false until end of stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatChunk {
  pub request_id: String,
  pub model: String,
  pub delta: String,
  pub finished: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
  pub intent: String,
  pub parameters: serde_json::Value,
  pub steps: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
  Success,
  Error,
  Timeout,
}

/// Append-only record of one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmRequestLog {
  pub request_id: String,
  pub timestamp: DateTime<Utc>,
  pub provider_id: String,
  pub model: String,
  pub input_messages: Vec<ChatMessage>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub response: Option<ChatResponse>,
  pub duration_ms: u64,
  pub cached: bool,
  pub status: RequestStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn masked_provider_never_carries_a_key() {
    let provider = LlmProvider {
      id: "p-1".into(),
      name: "prod-openai".into(),
      provider_type: ProviderType::Openai,
      purpose: ProviderPurpose::Both,
      config: ProviderConfig {
        api_key: Some("sk-secret".into()),
        base_url: "https://api.openai.com/v1".into(),
        organization: None,
        headers: None,
        timeout_sec: 30,
      },
      models: vec!["gpt-4o".into()],
      is_active: true,
      is_default: DefaultFlags::default(),
      created_at: Utc::now(),
      updated_at: Utc::now(),
    };
    let masked = provider.masked();
    assert!(masked.config.api_key.is_none());
    let json = serde_json::to_string(&masked).unwrap();
    assert!(!json.contains("sk-secret"));
    assert!(!json.contains("apiKey"));
  }

  #[test]
  fn purpose_serves_matrix() {
    assert!(ProviderPurpose::Both.serves_chat());
    assert!(ProviderPurpose::Both.serves_workflow());
    assert!(ProviderPurpose::Chat.serves_chat());
    assert!(!ProviderPurpose::Chat.serves_workflow());
    assert!(!ProviderPurpose::Workflow.serves_chat());
  }

  #[test]
  fn chat_request_parses_wire_shape() {
    let req: ChatRequest = serde_json::from_str(
      r#"{"messages":[{"role":"user","content":"Hello"}],"maxTokens":128}"#,
    )
    .unwrap();
    assert_eq!(req.messages[0].role, ChatRole::User);
    assert_eq!(req.max_tokens, Some(128));
    assert!(req.provider_id.is_none());
  }
}
