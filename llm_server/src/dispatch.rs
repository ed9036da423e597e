//! Provider dispatcher: selection, per-request pipeline, reload loop.
//!
//! The provider map is single-writer (the reload loop) and many-reader
//! (request handlers); the write lock is taken only to swap in an already
//! built map, never across a network call.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use opshub_core::events::{LlmEventKind, TOPIC_CHAT_RESPONSES, TOPIC_LLM_EVENTS};
use opshub_core::models::llm::{
  ChatRequest, ChatResponse, DefaultFlags, LlmProvider, LlmRequestLog, ProviderConfig,
  ProviderPurpose, ProviderType, RequestStatus,
};
use opshub_core::{CoreError, DomainEvent, EventBus, WsMessage, WsMessageType};

use crate::adapters::{AdapterError, AdapterRequest, ProviderClient};
use crate::cache::{cache_key, ResponseCache};
use crate::error::{LlmError, LlmResult};
use crate::registry::ProviderRegistry;
use crate::usage::UsageRecorder;

pub const RELOAD_INTERVAL: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_MS: u64 = 250;

/// Per-1k-token prices (input, output) in USD. Unknown models fall back to
/// the per-vendor default row; Ollama is zero by definition.
fn price_per_1k(provider_type: ProviderType, model: &str) -> (f64, f64) {
  match provider_type {
    ProviderType::Ollama => (0.0, 0.0),
    ProviderType::Anthropic => match model {
      m if m.contains("opus") => (15.0, 75.0),
      m if m.contains("haiku") => (0.8, 4.0),
      _ => (3.0, 15.0),
    },
    _ => match model {
      m if m.contains("gpt-4o-mini") => (0.15, 0.6),
      m if m.contains("gpt-4o") => (2.5, 10.0),
      m if m.contains("gpt-3.5") => (0.5, 1.5),
      _ => (1.0, 2.0),
    },
  }
}

pub fn compute_cost(
  provider_type: ProviderType,
  model: &str,
  prompt_tokens: u32,
  completion_tokens: u32,
) -> f64 {
  let (input_price, output_price) = price_per_1k(provider_type, model);
  (prompt_tokens as f64 * input_price + completion_tokens as f64 * output_price) / 1000.0
}

#[derive(Clone)]
struct LoadedProvider {
  provider: LlmProvider,
  client: Arc<ProviderClient>,
}

struct DispatcherInner {
  providers: RwLock<HashMap<String, LoadedProvider>>,
  registry: ProviderRegistry,
  cache: ResponseCache,
  usage: UsageRecorder,
  bus: EventBus,
  env_openai: Option<String>,
  env_anthropic: Option<String>,
}

#[derive(Clone)]
pub struct Dispatcher {
  inner: Arc<DispatcherInner>,
}

impl Dispatcher {
  pub fn new(
    registry: ProviderRegistry,
    cache: ResponseCache,
    usage: UsageRecorder,
    bus: EventBus,
    env_openai: Option<String>,
    env_anthropic: Option<String>,
  ) -> Self {
    Self {
      inner: Arc::new(DispatcherInner {
        providers: RwLock::new(HashMap::new()),
        registry,
        cache,
        usage,
        bus,
        env_openai,
        env_anthropic,
      }),
    }
  }

  /// Diff the in-memory map against the registry. Added providers are
  /// instantiated, changed ones rebuilt, removed or deactivated ones
  /// evicted. A provider that fails to build is skipped, never fatal.
  pub async fn reload(&self) -> LlmResult<()> {
    let desired = self.inner.registry.list().await?;
    let current = self.inner.providers.read().await.clone();
    let mut next: HashMap<String, LoadedProvider> = HashMap::new();
    let mut any_changed = false;

    for provider in desired.into_iter().filter(|p| p.is_active) {
      match current.get(&provider.id) {
        Some(loaded) if loaded.provider.updated_at == provider.updated_at => {
          next.insert(provider.id.clone(), loaded.clone());
        }
        existing => {
          if existing.is_some() {
            any_changed = true;
          }
          match self.build_client(&provider) {
            Ok(client) => {
              info!(provider = %provider.name, "Provider (re)loaded");
              next.insert(
                provider.id.clone(),
                LoadedProvider {
                  provider,
                  client: Arc::new(client),
                },
              );
            }
            Err(e) => {
              // Fail-soft: a broken provider must not take the loop down.
              error!(provider = %provider.name, "Provider rebuild failed: {}", e);
            }
          }
        }
      }
    }

    for loaded in self.env_fallback_providers() {
      next.entry(loaded.provider.id.clone()).or_insert(loaded);
    }

    let evicted: Vec<String> = current
      .keys()
      .filter(|id| !next.contains_key(*id))
      .cloned()
      .collect();
    if !evicted.is_empty() {
      any_changed = true;
      info!(count = evicted.len(), "Providers evicted from dispatch map");
    }

    *self.inner.providers.write().await = next;

    // A content-addressed value survives provider restarts, but a changed
    // provider config invalidates the whole prefix.
    if any_changed {
      self.inner.cache.clear().await;
    }
    Ok(())
  }

  fn build_client(&self, provider: &LlmProvider) -> LlmResult<ProviderClient> {
    let api_key = self.inner.registry.decrypt_api_key(provider)?;
    ProviderClient::from_provider(provider, api_key).map_err(LlmError::Core)
  }

  /// Environment-provisioned fallbacks, keyed `env-<type>`.
  fn env_fallback_providers(&self) -> Vec<LoadedProvider> {
    let mut out = Vec::new();
    let now = Utc::now();
    let mut push = |id: &str, provider_type: ProviderType, base_url: &str, api_key: &str| {
      let provider = LlmProvider {
        id: id.to_string(),
        name: id.to_string(),
        provider_type,
        purpose: ProviderPurpose::Both,
        config: ProviderConfig {
          api_key: Some(api_key.to_string()),
          base_url: base_url.to_string(),
          organization: None,
          headers: None,
          timeout_sec: 30,
        },
        models: Vec::new(),
        is_active: true,
        is_default: DefaultFlags::default(),
        created_at: now,
        updated_at: now,
      };
      match ProviderClient::from_provider(&provider, Some(api_key.to_string())) {
        Ok(client) => out.push(LoadedProvider {
          provider,
          client: Arc::new(client),
        }),
        Err(e) => warn!(provider = %id, "Env fallback provider unusable: {}", e),
      }
    };

    if let Some(key) = &self.inner.env_openai {
      push("env-openai", ProviderType::Openai, "https://api.openai.com/v1", key);
    }
    if let Some(key) = &self.inner.env_anthropic {
      push(
        "env-anthropic",
        ProviderType::Anthropic,
        "https://api.anthropic.com",
        key,
      );
    }
    out
  }

  pub fn spawn_reload_loop(&self) {
    let dispatcher = self.clone();
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(RELOAD_INTERVAL);
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        interval.tick().await;
        if let Err(e) = dispatcher.reload().await {
          error!("Provider reload failed: {}", e);
        }
      }
    });
  }

  /// Selection chain: explicit id, then the purpose default, then the env
  /// fallback, then NO_PROVIDER.
  async fn select(
    &self,
    purpose: ProviderPurpose,
    provider_id: Option<&str>,
  ) -> LlmResult<LoadedProvider> {
    let providers = self.inner.providers.read().await;

    if let Some(id) = provider_id {
      return providers.get(id).cloned().ok_or_else(|| {
        CoreError::NoProvider(format!("provider {id} is unknown or inactive")).into()
      });
    }

    if let Some(loaded) = providers.values().find(|p| {
      match purpose {
        ProviderPurpose::Workflow => p.provider.is_default.for_workflow,
        _ => p.provider.is_default.for_chat,
      }
    }) {
      return Ok(loaded.clone());
    }

    for env_id in ["env-openai", "env-anthropic"] {
      if let Some(loaded) = providers.get(env_id) {
        return Ok(loaded.clone());
      }
    }

    Err(CoreError::NoProvider("no provider configured for this purpose".to_string()).into())
  }

  async fn publish_event(&self, kind: LlmEventKind, request_id: &str, payload: serde_json::Value) {
    self
      .inner
      .bus
      .publish_or_drop(
        TOPIC_LLM_EVENTS,
        &DomainEvent::llm(kind, request_id.to_string(), payload),
      )
      .await;
  }

  /// Non-streaming chat: the full §cache -> invoke -> normalize -> account
  /// pipeline. Returns the normalized response with `id = requestId`.
  pub async fn chat(
    &self,
    request: &ChatRequest,
    purpose: ProviderPurpose,
  ) -> LlmResult<ChatResponse> {
    let request_id = Uuid::new_v4().to_string();
    let started = std::time::Instant::now();

    self
      .publish_event(
        LlmEventKind::LlmRequestStarted,
        &request_id,
        serde_json::json!({
          "providerId": request.provider_id,
          "model": request.model,
          "messageCount": request.messages.len(),
        }),
      )
      .await;

    // Content-addressed lookup before any provider work.
    let key = cache_key(&request.messages);
    if let Some(mut cached) = self.inner.cache.get(&key).await {
      cached.id = request_id.clone();
      self
        .publish_event(
          LlmEventKind::CacheHit,
          &request_id,
          serde_json::json!({ "cacheKey": key }),
        )
        .await;
      let log = LlmRequestLog {
        request_id: request_id.clone(),
        timestamp: Utc::now(),
        provider_id: "cache".to_string(),
        model: cached.model.clone(),
        input_messages: request.messages.clone(),
        response: Some(cached.clone()),
        duration_ms: started.elapsed().as_millis() as u64,
        cached: true,
        status: RequestStatus::Success,
        error_message: None,
      };
      if let Err(e) = self.inner.usage.record(&log).await {
        warn!("Request log append failed: {}", e);
      }
      return Ok(cached);
    }
    self
      .publish_event(
        LlmEventKind::CacheMiss,
        &request_id,
        serde_json::json!({ "cacheKey": key }),
      )
      .await;

    let loaded = self.select(purpose, request.provider_id.as_deref()).await?;
    let model = loaded
      .client
      .resolve_model(request.model.as_deref(), &loaded.provider.models)
      .await
      .map_err(CoreError::from)?;

    let adapter_request = AdapterRequest {
      messages: request.messages.clone(),
      model: model.clone(),
      temperature: request.temperature,
      max_tokens: request.max_tokens,
    };

    let result = invoke_with_retry(&loaded.client, &adapter_request, &request_id).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
      Ok(mut response) => {
        response.id = request_id.clone();
        response.usage.cost = compute_cost(
          loaded.provider.provider_type,
          &response.model,
          response.usage.prompt_tokens,
          response.usage.completion_tokens,
        );

        if let Err(e) = self.inner.cache.put(&key, &response).await {
          warn!("Response cache write failed: {}", e);
        }
        let log = LlmRequestLog {
          request_id: request_id.clone(),
          timestamp: Utc::now(),
          provider_id: loaded.provider.id.clone(),
          model: response.model.clone(),
          input_messages: request.messages.clone(),
          response: Some(response.clone()),
          duration_ms,
          cached: false,
          status: RequestStatus::Success,
          error_message: None,
        };
        if let Err(e) = self.inner.usage.record(&log).await {
          warn!("Request log append failed: {}", e);
        }
        self
          .publish_event(
            LlmEventKind::LlmRequestCompleted,
            &request_id,
            serde_json::json!({
              "providerId": loaded.provider.id,
              "model": response.model,
              "durationMs": duration_ms,
              "totalTokens": response.usage.total_tokens,
            }),
          )
          .await;
        Ok(response)
      }
      Err(adapter_error) => {
        let status = if matches!(adapter_error, AdapterError::Timeout(_)) {
          RequestStatus::Timeout
        } else {
          RequestStatus::Error
        };
        let log = LlmRequestLog {
          request_id: request_id.clone(),
          timestamp: Utc::now(),
          provider_id: loaded.provider.id.clone(),
          model,
          input_messages: request.messages.clone(),
          response: None,
          duration_ms,
          cached: false,
          status,
          error_message: Some(adapter_error.to_string()),
        };
        if let Err(e) = self.inner.usage.record(&log).await {
          warn!("Request log append failed: {}", e);
        }
        self
          .publish_event(
            LlmEventKind::LlmRequestFailed,
            &request_id,
            serde_json::json!({
              "providerId": loaded.provider.id,
              "durationMs": duration_ms,
              "error": adapter_error.to_string(),
            }),
          )
          .await;
        Err(LlmError::Core(adapter_error.into()))
      }
    }
  }

  /// Streaming variant: fragments fan out to the session's hub room as
  /// `chat_response` frames with `finished=false` until end of stream; the
  /// assembled response is cached and accounted like the plain path.
  pub async fn chat_stream(
    &self,
    request: &ChatRequest,
    session_id: &str,
    purpose: ProviderPurpose,
  ) -> LlmResult<String> {
    let request_id = Uuid::new_v4().to_string();
    let started = std::time::Instant::now();

    self
      .publish_event(
        LlmEventKind::LlmRequestStarted,
        &request_id,
        serde_json::json!({
          "providerId": request.provider_id,
          "sessionId": session_id,
          "streaming": true,
        }),
      )
      .await;

    let loaded = self.select(purpose, request.provider_id.as_deref()).await?;
    let model = loaded
      .client
      .resolve_model(request.model.as_deref(), &loaded.provider.models)
      .await
      .map_err(CoreError::from)?;

    let adapter_request = AdapterRequest {
      messages: request.messages.clone(),
      model: model.clone(),
      temperature: request.temperature,
      max_tokens: request.max_tokens,
    };
    let mut rx = loaded
      .client
      .invoke_stream(&adapter_request, &request_id)
      .await
      .map_err(|e| LlmError::Core(e.into()))?;

    let dispatcher = self.clone();
    let key = cache_key(&request.messages);
    let messages = request.messages.clone();
    let session_id = session_id.to_string();
    let response_id = request_id.clone();
    tokio::spawn(async move {
      let mut content = String::new();
      let mut finish_reason = "stop".to_string();

      while let Some(chunk) = rx.recv().await {
        if chunk.finished {
          if let Some(reason) = &chunk.finish_reason {
            finish_reason = reason.clone();
          }
        } else {
          content.push_str(&chunk.delta);
        }
        let frame = WsMessage::new(
          WsMessageType::ChatResponse,
          serde_json::to_value(&chunk).unwrap_or_default(),
        )
        .with_session_id(session_id.clone())
        .with_correlation_id(response_id.clone());
        if let Err(e) = dispatcher
          .inner
          .bus
          .publish_realtime(TOPIC_CHAT_RESPONSES, &frame)
          .await
        {
          debug!("Streaming frame dropped: {}", e);
        }
        if chunk.finished {
          break;
        }
      }

      let duration_ms = started.elapsed().as_millis() as u64;
      let response = ChatResponse {
        id: response_id.clone(),
        model: model.clone(),
        // Vendors do not report usage on all streams; tokens stay zero here
        // and the request log still carries duration and content.
        usage: Default::default(),
        choices: vec![opshub_core::models::llm::ChatChoice {
          message: opshub_core::models::llm::ChatMessage::assistant(content),
          finish_reason: finish_reason.clone(),
        }],
        created_at: Utc::now(),
        finish_reason,
      };
      if let Err(e) = dispatcher.inner.cache.put(&key, &response).await {
        warn!("Response cache write failed: {}", e);
      }
      let log = LlmRequestLog {
        request_id: response_id.clone(),
        timestamp: Utc::now(),
        provider_id: loaded.provider.id.clone(),
        model: response.model.clone(),
        input_messages: messages,
        response: Some(response),
        duration_ms,
        cached: false,
        status: RequestStatus::Success,
        error_message: None,
      };
      if let Err(e) = dispatcher.inner.usage.record(&log).await {
        warn!("Request log append failed: {}", e);
      }
      dispatcher
        .publish_event(
          LlmEventKind::LlmRequestCompleted,
          &response_id,
          serde_json::json!({ "durationMs": duration_ms, "streaming": true }),
        )
        .await;
    });

    Ok(request_id)
  }

  /// Reachability check against a specific provider.
  pub async fn test_provider(&self, provider_id: &str) -> LlmResult<(String, u64)> {
    let loaded = {
      let providers = self.inner.providers.read().await;
      providers.get(provider_id).cloned()
    }
    .ok_or_else(|| {
      LlmError::Core(CoreError::NoProvider(format!(
        "provider {provider_id} is unknown or inactive"
      )))
    })?;

    let latency = loaded
      .client
      .probe()
      .await
      .map_err(|e| LlmError::Core(e.into()))?;
    self
      .publish_event(
        LlmEventKind::ProviderHealthCheck,
        provider_id,
        serde_json::json!({ "providerId": provider_id, "latencyMs": latency, "success": true }),
      )
      .await;
    Ok((loaded.provider.name.clone(), latency))
  }

  /// Vendor-side model discovery, falling back to the registry list.
  pub async fn discover_models(&self, provider_id: &str) -> LlmResult<Vec<String>> {
    let loaded = {
      let providers = self.inner.providers.read().await;
      providers.get(provider_id).cloned()
    }
    .ok_or_else(|| {
      LlmError::Core(CoreError::NoProvider(format!(
        "provider {provider_id} is unknown or inactive"
      )))
    })?;

    let models = loaded
      .client
      .list_models()
      .await
      .map_err(|e| LlmError::Core(e.into()))?;
    if models.is_empty() {
      return Ok(loaded.provider.models.clone());
    }
    Ok(models)
  }

  /// Snapshot of the active provider map for the models endpoint.
  pub async fn active_providers(&self) -> Vec<LlmProvider> {
    self
      .inner
      .providers
      .read()
      .await
      .values()
      .map(|loaded| loaded.provider.masked())
      .collect()
  }
}

async fn invoke_with_retry(
  client: &ProviderClient,
  request: &AdapterRequest,
  request_id: &str,
) -> Result<ChatResponse, AdapterError> {
  let mut attempt: u32 = 0;
  loop {
    match client.invoke(request, request_id).await {
      Ok(response) => return Ok(response),
      Err(e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
        attempt += 1;
        let delay = Duration::from_millis(RETRY_BASE_MS * 2u64.saturating_pow(attempt - 1));
        warn!(attempt, "Provider call failed ({}); retrying in {:?}", e, delay);
        tokio::time::sleep(delay).await;
      }
      Err(e) => return Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ollama_cost_is_zero() {
    assert_eq!(compute_cost(ProviderType::Ollama, "llama3", 10_000, 10_000), 0.0);
  }

  #[test]
  fn cost_formula_divides_by_one_thousand() {
    // 1k prompt + 1k completion on gpt-4o: 2.5 + 10.0
    let cost = compute_cost(ProviderType::Openai, "gpt-4o", 1000, 1000);
    assert!((cost - 12.5).abs() < 1e-9);
  }

  #[test]
  fn unknown_models_use_the_vendor_default_row() {
    let cost = compute_cost(ProviderType::Openai, "some-new-model", 1000, 0);
    assert!((cost - 1.0).abs() < 1e-9);
    let anthropic = compute_cost(ProviderType::Anthropic, "claude-next", 1000, 0);
    assert!((anthropic - 3.0).abs() < 1e-9);
  }
}
