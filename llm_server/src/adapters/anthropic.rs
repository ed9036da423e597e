//! Anthropic messages client. The system message is extracted and passed as
//! the top-level `system` field; stop reasons map onto the uniform set:
//! `end_turn` -> `stop`, `max_tokens` -> `length`, anything else -> `stop`.

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use opshub_core::models::llm::{
  ChatChoice, ChatChunk, ChatMessage, ChatResponse, ChatRole, TokenUsage,
};
use opshub_core::CoreError;

use super::{drain_sse_data, AdapterError, AdapterRequest};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicClient {
  base_url: String,
  api_key: String,
  client: reqwest::Client,
}

#[derive(Serialize)]
struct WireRequest<'a> {
  model: &'a str,
  max_tokens: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  system: Option<String>,
  messages: Vec<WireMessage>,
  #[serde(skip_serializing_if = "Option::is_none")]
  temperature: Option<f64>,
  #[serde(skip_serializing_if = "std::ops::Not::not")]
  stream: bool,
}

#[derive(Serialize)]
struct WireMessage {
  role: String,
  content: String,
}

#[derive(Deserialize)]
struct WireResponse {
  model: Option<String>,
  content: Vec<ContentBlock>,
  stop_reason: Option<String>,
  usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
  #[serde(rename = "type")]
  block_type: String,
  #[serde(default)]
  text: String,
}

#[derive(Deserialize)]
struct WireUsage {
  input_tokens: u32,
  output_tokens: u32,
}

fn map_stop_reason(reason: Option<&str>) -> String {
  match reason {
    Some("end_turn") => "stop".to_string(),
    Some("max_tokens") => "length".to_string(),
    _ => "stop".to_string(),
  }
}

/// Pull the system prompt out; Anthropic takes it beside the messages.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<WireMessage>) {
  let system = messages
    .iter()
    .filter(|m| m.role == ChatRole::System)
    .map(|m| m.content.clone())
    .collect::<Vec<_>>();
  let system = if system.is_empty() {
    None
  } else {
    Some(system.join("\n"))
  };

  let rest = messages
    .iter()
    .filter(|m| m.role != ChatRole::System)
    .map(|m| WireMessage {
      role: m.role.to_string(),
      content: m.content.clone(),
    })
    .collect();
  (system, rest)
}

impl AnthropicClient {
  pub fn new(base_url: String, api_key: String, timeout: Duration) -> Result<Self, CoreError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| CoreError::InvalidConfig(format!("http client build failed: {e}")))?;
    Ok(Self {
      base_url: base_url.trim_end_matches('/').to_string(),
      api_key,
      client,
    })
  }

  fn messages_request(&self) -> reqwest::RequestBuilder {
    self
      .client
      .post(format!("{}/v1/messages", self.base_url))
      .header("x-api-key", &self.api_key)
      .header("anthropic-version", ANTHROPIC_VERSION)
  }

  async fn check(response: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
      .ok()
      .and_then(|v| {
        v.get("error")
          .and_then(|e| e.get("message"))
          .and_then(|m| m.as_str())
          .map(str::to_string)
      })
      .unwrap_or(body);
    Err(AdapterError::Api {
      status: status.as_u16(),
      message,
    })
  }

  pub async fn invoke(
    &self,
    request: &AdapterRequest,
    request_id: &str,
  ) -> Result<ChatResponse, AdapterError> {
    let (system, messages) = split_system(&request.messages);
    let wire = WireRequest {
      model: &request.model,
      max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
      system,
      messages,
      temperature: request.temperature,
      stream: false,
    };

    let response = self
      .messages_request()
      .json(&wire)
      .send()
      .await
      .map_err(AdapterError::from_reqwest)?;
    let response = Self::check(response).await?;
    let body: WireResponse = response
      .json()
      .await
      .map_err(|e| AdapterError::Parse(e.to_string()))?;

    let content = body
      .content
      .iter()
      .filter(|block| block.block_type == "text")
      .map(|block| block.text.as_str())
      .collect::<Vec<_>>()
      .join("");
    let finish_reason = map_stop_reason(body.stop_reason.as_deref());
    let usage = body
      .usage
      .map(|u| TokenUsage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.input_tokens + u.output_tokens,
        cost: 0.0,
      })
      .unwrap_or_default();

    Ok(ChatResponse {
      id: request_id.to_string(),
      model: body.model.unwrap_or_else(|| request.model.clone()),
      usage,
      choices: vec![ChatChoice {
        message: ChatMessage::assistant(content),
        finish_reason: finish_reason.clone(),
      }],
      created_at: Utc::now(),
      finish_reason,
    })
  }

  pub async fn invoke_stream(
    &self,
    request: &AdapterRequest,
    request_id: &str,
  ) -> Result<mpsc::Receiver<ChatChunk>, AdapterError> {
    let (system, messages) = split_system(&request.messages);
    let wire = WireRequest {
      model: &request.model,
      max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
      system,
      messages,
      temperature: request.temperature,
      stream: true,
    };

    let response = self
      .messages_request()
      .json(&wire)
      .send()
      .await
      .map_err(AdapterError::from_reqwest)?;
    let response = Self::check(response).await?;

    let (tx, rx) = mpsc::channel(64);
    let request_id = request_id.to_string();
    let model = request.model.clone();
    tokio::spawn(async move {
      let mut stream = response.bytes_stream();
      let mut buffer = String::new();
      let mut stop_reason: Option<String> = None;

      'outer: while let Some(next) = stream.next().await {
        let bytes = match next {
          Ok(bytes) => bytes,
          Err(e) => {
            warn!("Anthropic stream broke: {}", e);
            break;
          }
        };
        buffer.push_str(&String::from_utf8_lossy(&bytes));
        for payload in drain_sse_data(&mut buffer) {
          let Ok(event) = serde_json::from_str::<serde_json::Value>(&payload) else {
            debug!("Skipping unparseable stream event");
            continue;
          };
          match event.get("type").and_then(|t| t.as_str()) {
            Some("content_block_delta") => {
              let text = event
                .pointer("/delta/text")
                .and_then(|t| t.as_str())
                .unwrap_or_default();
              if !text.is_empty()
                && tx
                  .send(ChatChunk {
                    request_id: request_id.clone(),
                    model: model.clone(),
                    delta: text.to_string(),
                    finished: false,
                    finish_reason: None,
                  })
                  .await
                  .is_err()
              {
                break 'outer;
              }
            }
            Some("message_delta") => {
              if let Some(reason) = event.pointer("/delta/stop_reason").and_then(|r| r.as_str()) {
                stop_reason = Some(reason.to_string());
              }
            }
            Some("message_stop") => break 'outer,
            _ => {}
          }
        }
      }

      let _ = tx
        .send(ChatChunk {
          request_id,
          model,
          delta: String::new(),
          finished: true,
          finish_reason: Some(map_stop_reason(stop_reason.as_deref())),
        })
        .await;
    });
    Ok(rx)
  }

  /// Minimal paid-path probe: a single-token message.
  pub async fn probe(&self) -> Result<(), AdapterError> {
    let wire = WireRequest {
      model: "claude-3-5-haiku-20241022",
      max_tokens: 1,
      system: None,
      messages: vec![WireMessage {
        role: "user".to_string(),
        content: "ping".to_string(),
      }],
      temperature: None,
      stream: false,
    };
    let response = self
      .messages_request()
      .json(&wire)
      .send()
      .await
      .map_err(AdapterError::from_reqwest)?;
    Self::check(response).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stop_reason_mapping() {
    assert_eq!(map_stop_reason(Some("end_turn")), "stop");
    assert_eq!(map_stop_reason(Some("max_tokens")), "length");
    assert_eq!(map_stop_reason(Some("tool_use")), "stop");
    assert_eq!(map_stop_reason(None), "stop");
  }

  #[test]
  fn system_messages_are_extracted() {
    let messages = vec![
      ChatMessage::system("You are terse."),
      ChatMessage::user("Hello"),
      ChatMessage::assistant("Hi"),
    ];
    let (system, rest) = split_system(&messages);
    assert_eq!(system.as_deref(), Some("You are terse."));
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0].role, "user");
  }

  #[test]
  fn no_system_message_means_no_system_field() {
    let (system, rest) = split_system(&[ChatMessage::user("Hello")]);
    assert!(system.is_none());
    assert_eq!(rest.len(), 1);
  }
}
