//! Ollama chat client: no auth, NDJSON streaming, zero cost by definition.

use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use opshub_core::models::llm::{ChatChoice, ChatChunk, ChatMessage, ChatResponse, TokenUsage};
use opshub_core::CoreError;

use super::{AdapterError, AdapterRequest};

pub struct OllamaClient {
  base_url: String,
  client: reqwest::Client,
}

#[derive(Serialize)]
struct WireRequest<'a> {
  model: &'a str,
  messages: Vec<WireMessage>,
  stream: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  options: Option<WireOptions>,
}

#[derive(Serialize)]
struct WireOptions {
  #[serde(skip_serializing_if = "Option::is_none")]
  temperature: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  num_predict: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
  role: String,
  content: String,
}

#[derive(Deserialize)]
struct WireResponse {
  model: Option<String>,
  message: Option<WireMessage>,
  #[serde(default)]
  done: bool,
  #[serde(default)]
  prompt_eval_count: Option<u32>,
  #[serde(default)]
  eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct TagList {
  models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
  name: String,
}

impl OllamaClient {
  pub fn new(base_url: String, timeout: Duration) -> Result<Self, CoreError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| CoreError::InvalidConfig(format!("http client build failed: {e}")))?;
    Ok(Self {
      base_url: base_url.trim_end_matches('/').to_string(),
      client,
    })
  }

  async fn check(response: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
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
      messages: request
        .messages
        .iter()
        .map(|m| WireMessage {
          role: m.role.to_string(),
          content: m.content.clone(),
        })
        .collect(),
      stream: false,
      options: Some(WireOptions {
        temperature: request.temperature,
        num_predict: request.max_tokens,
      }),
    };

    let response = self
      .client
      .post(format!("{}/api/chat", self.base_url))
      .json(&wire)
      .send()
      .await
      .map_err(AdapterError::from_reqwest)?;
    let response = Self::check(response).await?;
    let body: WireResponse = response
      .json()
      .await
      .map_err(|e| AdapterError::Parse(e.to_string()))?;

    let content = body.message.map(|m| m.content).unwrap_or_default();
    let prompt_tokens = body.prompt_eval_count.unwrap_or(0);
    let completion_tokens = body.eval_count.unwrap_or(0);

    Ok(ChatResponse {
      id: request_id.to_string(),
      model: body.model.unwrap_or_else(|| request.model.clone()),
      usage: TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens,
        // Local inference: zero by definition.
        cost: 0.0,
      },
      choices: vec![ChatChoice {
        message: ChatMessage::assistant(content),
        finish_reason: "stop".to_string(),
      }],
      created_at: Utc::now(),
      finish_reason: "stop".to_string(),
    })
  }

  pub async fn invoke_stream(
    &self,
    request: &AdapterRequest,
    request_id: &str,
  ) -> Result<mpsc::Receiver<ChatChunk>, AdapterError> {
    let wire = WireRequest {
      model: &request.model,
      messages: request
        .messages
        .iter()
        .map(|m| WireMessage {
          role: m.role.to_string(),
          content: m.content.clone(),
        })
        .collect(),
      stream: true,
      options: Some(WireOptions {
        temperature: request.temperature,
        num_predict: request.max_tokens,
      }),
    };

    let response = self
      .client
      .post(format!("{}/api/chat", self.base_url))
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

      'outer: while let Some(next) = stream.next().await {
        let bytes = match next {
          Ok(bytes) => bytes,
          Err(e) => {
            warn!("Ollama stream broke: {}", e);
            break;
          }
        };
        buffer.push_str(&String::from_utf8_lossy(&bytes));
        // NDJSON: one complete object per line.
        while let Some(newline) = buffer.find('\n') {
          let line: String = buffer.drain(..=newline).collect();
          let line = line.trim();
          if line.is_empty() {
            continue;
          }
          let Ok(part) = serde_json::from_str::<WireResponse>(line) else {
            debug!("Skipping unparseable ollama line");
            continue;
          };
          if part.done {
            break 'outer;
          }
          if let Some(message) = part.message {
            if !message.content.is_empty()
              && tx
                .send(ChatChunk {
                  request_id: request_id.clone(),
                  model: model.clone(),
                  delta: message.content,
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

      let _ = tx
        .send(ChatChunk {
          request_id,
          model,
          delta: String::new(),
          finished: true,
          finish_reason: Some("stop".to_string()),
        })
        .await;
    });
    Ok(rx)
  }

  pub async fn list_models(&self) -> Result<Vec<String>, AdapterError> {
    let response = self
      .client
      .get(format!("{}/api/tags", self.base_url))
      .send()
      .await
      .map_err(AdapterError::from_reqwest)?;
    let response = Self::check(response).await?;
    let tags: TagList = response
      .json()
      .await
      .map_err(|e| AdapterError::Parse(e.to_string()))?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
  }
}
