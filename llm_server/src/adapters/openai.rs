//! OpenAI-compatible chat completions client. Also serves `custom`
//! providers, which share the wire shape.

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use opshub_core::models::llm::{
  ChatChoice, ChatChunk, ChatMessage, ChatResponse, TokenUsage,
};
use opshub_core::CoreError;

use super::{drain_sse_data, AdapterError, AdapterRequest};

pub struct OpenAiLikeClient {
  base_url: String,
  api_key: Option<String>,
  organization: Option<String>,
  headers: HashMap<String, String>,
  client: reqwest::Client,
}

#[derive(Serialize)]
struct WireRequest<'a> {
  model: &'a str,
  messages: Vec<WireMessage>,
  #[serde(skip_serializing_if = "Option::is_none")]
  temperature: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
  #[serde(skip_serializing_if = "std::ops::Not::not")]
  stream: bool,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
  role: String,
  content: String,
}

impl From<&ChatMessage> for WireMessage {
  fn from(message: &ChatMessage) -> Self {
    Self {
      role: message.role.to_string(),
      content: message.content.clone(),
    }
  }
}

#[derive(Deserialize)]
struct WireResponse {
  model: Option<String>,
  choices: Vec<WireChoice>,
  usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
  message: WireMessage,
  finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
  prompt_tokens: u32,
  completion_tokens: u32,
  total_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
  choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
  delta: StreamDelta,
  finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
  #[serde(default)]
  content: Option<String>,
}

#[derive(Deserialize)]
struct ModelList {
  data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
  id: String,
}

impl OpenAiLikeClient {
  pub fn new(
    base_url: String,
    api_key: Option<String>,
    organization: Option<String>,
    headers: HashMap<String, String>,
    timeout: Duration,
  ) -> Result<Self, CoreError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| CoreError::InvalidConfig(format!("http client build failed: {e}")))?;
    Ok(Self {
      base_url: base_url.trim_end_matches('/').to_string(),
      api_key,
      organization,
      headers,
      client,
    })
  }

  fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
    let mut builder = self
      .client
      .request(method, format!("{}{}", self.base_url, path));
    if let Some(api_key) = &self.api_key {
      builder = builder.bearer_auth(api_key);
    }
    if let Some(organization) = &self.organization {
      builder = builder.header("OpenAI-Organization", organization);
    }
    for (name, value) in &self.headers {
      builder = builder.header(name, value);
    }
    builder
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
    let wire = WireRequest {
      model: &request.model,
      messages: request.messages.iter().map(WireMessage::from).collect(),
      temperature: request.temperature,
      max_tokens: request.max_tokens,
      stream: false,
    };

    let response = self
      .request(reqwest::Method::POST, "/chat/completions")
      .json(&wire)
      .send()
      .await
      .map_err(AdapterError::from_reqwest)?;
    let response = Self::check(response).await?;
    let body: WireResponse = response
      .json()
      .await
      .map_err(|e| AdapterError::Parse(e.to_string()))?;

    let choices: Vec<ChatChoice> = body
      .choices
      .into_iter()
      .map(|c| ChatChoice {
        message: ChatMessage {
          role: opshub_core::models::llm::ChatRole::Assistant,
          content: c.message.content,
        },
        // finish_reason passes through verbatim on this wire shape.
        finish_reason: c.finish_reason.unwrap_or_else(|| "stop".to_string()),
      })
      .collect();
    let finish_reason = choices
      .first()
      .map(|c| c.finish_reason.clone())
      .unwrap_or_else(|| "stop".to_string());
    let usage = body.usage.map(|u| TokenUsage {
      prompt_tokens: u.prompt_tokens,
      completion_tokens: u.completion_tokens,
      total_tokens: u.total_tokens,
      cost: 0.0,
    });

    Ok(ChatResponse {
      id: request_id.to_string(),
      model: body.model.unwrap_or_else(|| request.model.clone()),
      usage: usage.unwrap_or_default(),
      choices,
      created_at: Utc::now(),
      finish_reason,
    })
  }

  pub async fn invoke_stream(
    &self,
    request: &AdapterRequest,
    request_id: &str,
  ) -> Result<mpsc::Receiver<ChatChunk>, AdapterError> {
    let wire = WireRequest {
      model: &request.model,
      messages: request.messages.iter().map(WireMessage::from).collect(),
      temperature: request.temperature,
      max_tokens: request.max_tokens,
      stream: true,
    };

    let response = self
      .request(reqwest::Method::POST, "/chat/completions")
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
      let mut finish_reason: Option<String> = None;

      'outer: while let Some(next) = stream.next().await {
        let bytes = match next {
          Ok(bytes) => bytes,
          Err(e) => {
            warn!("OpenAI stream broke: {}", e);
            break;
          }
        };
        buffer.push_str(&String::from_utf8_lossy(&bytes));
        for payload in drain_sse_data(&mut buffer) {
          if payload == "[DONE]" {
            break 'outer;
          }
          let Ok(chunk) = serde_json::from_str::<StreamChunk>(&payload) else {
            debug!("Skipping unparseable stream chunk");
            continue;
          };
          for choice in chunk.choices {
            if let Some(reason) = choice.finish_reason {
              finish_reason = Some(reason);
            }
            if let Some(content) = choice.delta.content {
              if tx
                .send(ChatChunk {
                  request_id: request_id.clone(),
                  model: model.clone(),
                  delta: content,
                  finished: false,
                  finish_reason: None,
                })
                .await
                .is_err()
              {
                break 'outer;
              }
            }
          }
        }
      }

      let _ = tx
        .send(ChatChunk {
          request_id,
          model,
          delta: String::new(),
          finished: true,
          finish_reason: Some(finish_reason.unwrap_or_else(|| "stop".to_string())),
        })
        .await;
    });
    Ok(rx)
  }

  pub async fn list_models(&self) -> Result<Vec<String>, AdapterError> {
    let response = self
      .request(reqwest::Method::GET, "/models")
      .send()
      .await
      .map_err(AdapterError::from_reqwest)?;
    let response = Self::check(response).await?;
    let list: ModelList = response
      .json()
      .await
      .map_err(|e| AdapterError::Parse(e.to_string()))?;
    Ok(list.data.into_iter().map(|m| m.id).collect())
  }
}
