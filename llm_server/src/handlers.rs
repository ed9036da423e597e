//! LLM service HTTP surface, anchored at `/api/v1/llm`.
//!
//! Provider mutations are admin-gated; reads require any propagated
//! identity. Configs leave the service with the api key omitted, always.

use axum::{
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
  Json,
};
use serde::Deserialize;
use validator::Validate;

use opshub_core::middlewares::AuthUser;
use opshub_core::models::llm::{
  ChatRequest, ProviderCreateRequest, ProviderPurpose, ProviderUpdateRequest,
};
use opshub_core::CoreError;

use crate::error::LlmError;
use crate::state::AppState;
use crate::templates::TemplateCreateRequest;
use crate::workflow::{self, WorkflowRequest};

fn require_admin(AuthUser(principal): &AuthUser) -> Result<(), CoreError> {
  if !principal.role.is_admin() {
    return Err(CoreError::Authorization(
      "provider administration requires the administrator role".to_string(),
    ));
  }
  Ok(())
}

fn validation_error(errors: validator::ValidationErrors) -> CoreError {
  let fields: Vec<String> = errors.field_errors().keys().map(|k| k.to_string()).collect();
  CoreError::validation_fields("request validation failed", fields)
}

// ---- providers ----

pub async fn list_providers(
  State(state): State<AppState>,
  _user: AuthUser,
) -> Result<impl IntoResponse, LlmError> {
  let providers = state.registry.list().await?;
  let masked: Vec<_> = providers.iter().map(|p| p.masked()).collect();
  Ok(Json(masked))
}

pub async fn get_provider(
  State(state): State<AppState>,
  _user: AuthUser,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, LlmError> {
  let provider = state
    .registry
    .get(&id)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("provider {id}")))?;
  Ok(Json(provider.masked()))
}

pub async fn create_provider(
  State(state): State<AppState>,
  user: AuthUser,
  Json(body): Json<ProviderCreateRequest>,
) -> Result<impl IntoResponse, LlmError> {
  require_admin(&user)?;
  body.validate().map_err(validation_error)?;
  let provider = state.registry.create(body).await?;
  Ok((StatusCode::CREATED, Json(provider.masked())))
}

pub async fn update_provider(
  State(state): State<AppState>,
  user: AuthUser,
  Path(id): Path<String>,
  Json(body): Json<ProviderUpdateRequest>,
) -> Result<impl IntoResponse, LlmError> {
  require_admin(&user)?;
  body.validate().map_err(validation_error)?;
  let provider = state.registry.update(&id, body).await?;
  Ok(Json(provider.masked()))
}

pub async fn delete_provider(
  State(state): State<AppState>,
  user: AuthUser,
  Path(id): Path<String>,
) -> Result<impl IntoResponse, LlmError> {
  require_admin(&user)?;
  state.registry.delete(&id).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct SetDefaultRequest {
  pub purpose: ProviderPurpose,
}

pub async fn set_default_provider(
  State(state): State<AppState>,
  user: AuthUser,
  Path(id): Path<String>,
  Json(body): Json<SetDefaultRequest>,
) -> Result<impl IntoResponse, LlmError> {
  require_admin(&user)?;
  // `both` fans out to the two flags in sequence.
  let provider = match body.purpose {
    ProviderPurpose::Both => {
      state.registry.set_default(&id, ProviderPurpose::Chat).await?;
      state
        .registry
        .set_default(&id, ProviderPurpose::Workflow)
        .await?
    }
    purpose => state.registry.set_default(&id, purpose).await?,
  };
  Ok(Json(provider.masked()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderIdRequest {
  pub provider_id: String,
}

pub async fn test_provider(
  State(state): State<AppState>,
  _user: AuthUser,
  Json(body): Json<ProviderIdRequest>,
) -> Result<impl IntoResponse, LlmError> {
  let (name, latency_ms) = state.dispatcher.test_provider(&body.provider_id).await?;
  Ok(Json(serde_json::json!({
    "success": true,
    "provider": name,
    "latencyMs": latency_ms,
  })))
}

pub async fn discover_models(
  State(state): State<AppState>,
  _user: AuthUser,
  Json(body): Json<ProviderIdRequest>,
) -> Result<impl IntoResponse, LlmError> {
  let models = state.dispatcher.discover_models(&body.provider_id).await?;
  Ok(Json(serde_json::json!({
    "providerId": body.provider_id,
    "models": models,
  })))
}

// ---- chat & workflow ----

pub async fn chat_completions(
  State(state): State<AppState>,
  _user: AuthUser,
  Json(body): Json<ChatRequest>,
) -> Result<impl IntoResponse, LlmError> {
  body.validate().map_err(validation_error)?;

  if body.stream.unwrap_or(false) {
    let session_id = body.session_id.clone().ok_or_else(|| {
      CoreError::validation("streaming requests must carry a sessionId")
    })?;
    let request_id = state
      .dispatcher
      .chat_stream(&body, &session_id, ProviderPurpose::Chat)
      .await?;
    return Ok(
      Json(serde_json::json!({
        "id": request_id,
        "streaming": true,
        "sessionId": session_id,
      }))
      .into_response(),
    );
  }

  let response = state.dispatcher.chat(&body, ProviderPurpose::Chat).await?;
  Ok(Json(response).into_response())
}

pub async fn workflow_completions(
  State(state): State<AppState>,
  _user: AuthUser,
  Json(body): Json<WorkflowRequest>,
) -> Result<impl IntoResponse, LlmError> {
  let response = workflow::run(&state.dispatcher, body).await?;
  Ok(Json(response))
}

// ---- models & usage ----

#[derive(Debug, Default, Deserialize)]
pub struct ModelsQuery {
  pub provider: Option<String>,
}

pub async fn list_models(
  State(state): State<AppState>,
  _user: AuthUser,
  Query(query): Query<ModelsQuery>,
) -> Result<impl IntoResponse, LlmError> {
  let providers = state.dispatcher.active_providers().await;
  let entries: Vec<_> = providers
    .into_iter()
    .filter(|p| {
      query
        .provider
        .as_deref()
        .map(|want| p.id == want || p.name == want)
        .unwrap_or(true)
    })
    .map(|p| {
      serde_json::json!({
        "providerId": p.id,
        "provider": p.name,
        "type": p.provider_type,
        "models": p.models,
      })
    })
    .collect();
  Ok(Json(entries))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuery {
  pub provider_id: Option<String>,
  pub days: Option<u32>,
}

pub async fn usage(
  State(state): State<AppState>,
  _user: AuthUser,
  Query(query): Query<UsageQuery>,
) -> Result<impl IntoResponse, LlmError> {
  let provider_ids = match &query.provider_id {
    Some(id) => vec![id.clone()],
    None => {
      let mut ids: Vec<String> = state
        .registry
        .list()
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();
      ids.push("cache".to_string());
      ids
    }
  };
  let rows = state
    .usage
    .query(&provider_ids, query.days.unwrap_or(7))
    .await?;
  Ok(Json(rows))
}

// ---- templates ----

pub async fn list_templates(
  State(state): State<AppState>,
  _user: AuthUser,
) -> Result<impl IntoResponse, LlmError> {
  Ok(Json(state.templates.list().await?))
}

pub async fn create_template(
  State(state): State<AppState>,
  user: AuthUser,
  Json(body): Json<TemplateCreateRequest>,
) -> Result<impl IntoResponse, LlmError> {
  require_admin(&user)?;
  body.validate().map_err(validation_error)?;
  let template = state.templates.create(body).await?;
  Ok((StatusCode::CREATED, Json(template)))
}

// ---- health ----

pub async fn service_health() -> impl IntoResponse {
  Json(serde_json::json!({
    "status": "healthy",
    "timestamp": chrono::Utc::now().to_rfc3339(),
    "version": env!("CARGO_PKG_VERSION"),
    "service": "llm_server",
  }))
}
