//! Vendor clients behind one tagged variant.
//!
//! One `invoke` per wire shape; shared helpers (SSE splitting, error
//! classification) live here as free functions. Adding a vendor means adding
//! a variant, not a base class.

mod anthropic;
mod ollama;
mod openai;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiLikeClient;

use std::time::Duration;
use tokio::sync::mpsc;

use opshub_core::models::llm::{ChatChunk, ChatMessage, ChatResponse, LlmProvider, ProviderType};
use opshub_core::CoreError;

pub const OPENAI_TIMEOUT: Duration = Duration::from_secs(30);
pub const ANTHROPIC_TIMEOUT: Duration = Duration::from_secs(45);
pub const OLLAMA_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
  #[error("provider timed out: {0}")]
  Timeout(String),
  #[error("provider transport error: {0}")]
  Transport(String),
  #[error("provider api error ({status}): {message}")]
  Api { status: u16, message: String },
  #[error("provider response unparseable: {0}")]
  Parse(String),
}

impl AdapterError {
  /// Network trouble and vendor 5xx are worth retrying; 4xx and parse
  /// failures are not.
  pub fn is_retryable(&self) -> bool {
    match self {
      AdapterError::Timeout(_) | AdapterError::Transport(_) => true,
      AdapterError::Api { status, .. } => *status >= 500,
      AdapterError::Parse(_) => false,
    }
  }

  pub fn from_reqwest(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      AdapterError::Timeout(e.to_string())
    } else {
      AdapterError::Transport(e.to_string())
    }
  }
}

impl From<AdapterError> for CoreError {
  fn from(err: AdapterError) -> Self {
    match err {
      AdapterError::Api { status, message } if status < 500 => {
        CoreError::validation(format!("provider rejected request ({status}): {message}"))
      }
      other => CoreError::proxy_unavailable("llm-provider", other.to_string()),
    }
  }
}

/// The normalized invocation the dispatcher hands to any client.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
  pub messages: Vec<ChatMessage>,
  pub model: String,
  pub temperature: Option<f64>,
  pub max_tokens: Option<u32>,
}

pub enum ProviderClient {
  OpenAiLike(OpenAiLikeClient),
  Anthropic(AnthropicClient),
  Ollama(OllamaClient),
  /// Operator-configured endpoint; assumes the OpenAI wire shape with the
  /// configured headers passed through as-is.
  Custom(OpenAiLikeClient),
}

impl ProviderClient {
  pub fn from_provider(
    provider: &LlmProvider,
    api_key: Option<String>,
  ) -> Result<Self, CoreError> {
    let config = &provider.config;
    match provider.provider_type {
      ProviderType::Anthropic => {
        let api_key = api_key.ok_or_else(|| {
          CoreError::InvalidConfig(format!("provider {} has no api key", provider.name))
        })?;
        Ok(ProviderClient::Anthropic(AnthropicClient::new(
          config.base_url.clone(),
          api_key,
          ANTHROPIC_TIMEOUT,
        )?))
      }
      ProviderType::Ollama => Ok(ProviderClient::Ollama(OllamaClient::new(
        config.base_url.clone(),
        OLLAMA_TIMEOUT,
      )?)),
      ProviderType::Openai | ProviderType::Google => {
        let api_key = api_key.ok_or_else(|| {
          CoreError::InvalidConfig(format!("provider {} has no api key", provider.name))
        })?;
        Ok(ProviderClient::OpenAiLike(OpenAiLikeClient::new(
          config.base_url.clone(),
          Some(api_key),
          config.organization.clone(),
          config.headers.clone().unwrap_or_default(),
          OPENAI_TIMEOUT,
        )?))
      }
      ProviderType::Custom => Ok(ProviderClient::Custom(OpenAiLikeClient::new(
        config.base_url.clone(),
        api_key,
        config.organization.clone(),
        config.headers.clone().unwrap_or_default(),
        Duration::from_secs(config.timeout_sec.max(1)),
      )?)),
    }
  }

  pub async fn invoke(
    &self,
    request: &AdapterRequest,
    request_id: &str,
  ) -> Result<ChatResponse, AdapterError> {
    match self {
      ProviderClient::OpenAiLike(client) | ProviderClient::Custom(client) => {
        client.invoke(request, request_id).await
      }
      ProviderClient::Anthropic(client) => client.invoke(request, request_id).await,
      ProviderClient::Ollama(client) => client.invoke(request, request_id).await,
    }
  }

  pub async fn invoke_stream(
    &self,
    request: &AdapterRequest,
    request_id: &str,
  ) -> Result<mpsc::Receiver<ChatChunk>, AdapterError> {
    match self {
      ProviderClient::OpenAiLike(client) | ProviderClient::Custom(client) => {
        client.invoke_stream(request, request_id).await
      }
      ProviderClient::Anthropic(client) => client.invoke_stream(request, request_id).await,
      ProviderClient::Ollama(client) => client.invoke_stream(request, request_id).await,
    }
  }

  /// Vendor-side model discovery. Vendors without a listing endpoint return
  /// an empty list and the registry's own model list stands.
  pub async fn list_models(&self) -> Result<Vec<String>, AdapterError> {
    match self {
      ProviderClient::OpenAiLike(client) | ProviderClient::Custom(client) => {
        client.list_models().await
      }
      ProviderClient::Anthropic(_) => Ok(Vec::new()),
      ProviderClient::Ollama(client) => client.list_models().await,
    }
  }

  /// Cheap reachability check; returns latency in milliseconds.
  pub async fn probe(&self) -> Result<u64, AdapterError> {
    let start = std::time::Instant::now();
    match self {
      ProviderClient::OpenAiLike(client) | ProviderClient::Custom(client) => {
        client.list_models().await?;
      }
      ProviderClient::Ollama(client) => {
        client.list_models().await?;
      }
      ProviderClient::Anthropic(client) => {
        client.probe().await?;
      }
    }
    Ok(start.elapsed().as_millis() as u64)
  }

  /// Model used when the request does not name one.
  pub async fn resolve_model(
    &self,
    requested: Option<&str>,
    registry_models: &[String],
  ) -> Result<String, AdapterError> {
    if let Some(model) = requested {
      return Ok(model.to_string());
    }
    if let Some(model) = registry_models.first() {
      return Ok(model.clone());
    }
    // Ollama can self-describe; everyone else must be configured.
    if let ProviderClient::Ollama(client) = self {
      let models = client.list_models().await?;
      if let Some(model) = models.into_iter().next() {
        return Ok(model);
      }
    }
    Err(AdapterError::Api {
      status: 400,
      message: "no model requested and none configured".to_string(),
    })
  }
}

/// Split an SSE byte buffer into complete `data:` payloads, leaving any
/// trailing partial line in the buffer.
pub(crate) fn drain_sse_data(buffer: &mut String) -> Vec<String> {
  let mut payloads = Vec::new();
  while let Some(newline) = buffer.find('\n') {
    let line: String = buffer.drain(..=newline).collect();
    let line = line.trim();
    if let Some(data) = line.strip_prefix("data:") {
      let data = data.trim();
      if !data.is_empty() {
        payloads.push(data.to_string());
      }
    }
  }
  payloads
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sse_drain_keeps_partial_lines() {
    let mut buffer = String::from("data: {\"a\":1}\n\ndata: {\"b\":2}\ndata: {\"c\"");
    let payloads = drain_sse_data(&mut buffer);
    assert_eq!(payloads, vec!["{\"a\":1}", "{\"b\":2}"]);
    assert_eq!(buffer, "data: {\"c\"");
  }

  #[test]
  fn retryability_matrix() {
    assert!(AdapterError::Timeout("t".into()).is_retryable());
    assert!(AdapterError::Transport("t".into()).is_retryable());
    assert!(AdapterError::Api {
      status: 503,
      message: "overloaded".into()
    }
    .is_retryable());
    assert!(!AdapterError::Api {
      status: 401,
      message: "bad key".into()
    }
    .is_retryable());
    assert!(!AdapterError::Parse("bad json".into()).is_retryable());
  }

  #[test]
  fn client_4xx_maps_to_validation_not_proxy_error() {
    let core: CoreError = AdapterError::Api {
      status: 400,
      message: "bad request".into(),
    }
    .into();
    assert_eq!(core.error_code(), "VALIDATION_ERROR");
    let core: CoreError = AdapterError::Timeout("slow".into()).into();
    assert_eq!(core.error_code(), "PROXY_ERROR");
  }
}
