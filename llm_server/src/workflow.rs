//! Workflow dispatch: a chat round that must come back as JSON.
//!
//! The fixed system prompt demands the shape; when the model ignores it the
//! fallback synthesizes a `general_task` result so callers always get the
//! contract shape.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use opshub_core::models::llm::{
  ChatMessage, ChatRequest, ProviderPurpose, TokenUsage, WorkflowResult,
};

use crate::dispatch::Dispatcher;
use crate::error::LlmResult;

const WORKFLOW_SYSTEM_PROMPT: &str = "\
You are a workflow planning assistant. Analyze the user's request and respond \
with ONLY a JSON object, no prose and no code fences, of the shape: \
{\"intent\": string, \"parameters\": object, \"steps\": [string]}. \
The intent names the task category, parameters carry extracted values, and \
steps list the ordered actions to perform.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
  pub prompt: String,
  #[serde(default)]
  pub provider_id: Option<String>,
  #[serde(default)]
  pub model: Option<String>,
  #[serde(default)]
  pub temperature: Option<f64>,
  #[serde(default)]
  pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResponse {
  pub id: String,
  pub model: String,
  pub result: WorkflowResult,
  pub usage: TokenUsage,
  pub provider: String,
  pub timestamp: String,
}

/// Parse the model output; on any parse failure synthesize the fallback.
pub fn parse_workflow_result(content: &str, prompt: &str) -> WorkflowResult {
  let trimmed = content.trim();
  // Models love code fences even when told not to; strip one layer.
  let stripped = trimmed
    .strip_prefix("```json")
    .or_else(|| trimmed.strip_prefix("```"))
    .map(|s| s.trim_end_matches("```").trim())
    .unwrap_or(trimmed);

  if let Ok(result) = serde_json::from_str::<WorkflowResult>(stripped) {
    return result;
  }

  WorkflowResult {
    intent: "general_task".to_string(),
    parameters: serde_json::json!({ "prompt": prompt }),
    steps: vec![
      "analyze_request".to_string(),
      "execute_action".to_string(),
      "return_result".to_string(),
    ],
  }
}

pub async fn run(dispatcher: &Dispatcher, request: WorkflowRequest) -> LlmResult<WorkflowResponse> {
  let chat = ChatRequest {
    messages: vec![
      ChatMessage::system(WORKFLOW_SYSTEM_PROMPT),
      ChatMessage::user(request.prompt.clone()),
    ],
    model: request.model,
    provider_id: request.provider_id.clone(),
    temperature: request.temperature,
    max_tokens: request.max_tokens,
    stream: None,
    session_id: None,
  };

  let response = dispatcher.chat(&chat, ProviderPurpose::Workflow).await?;
  let result = parse_workflow_result(response.content(), &request.prompt);

  Ok(WorkflowResponse {
    id: response.id,
    model: response.model,
    result,
    usage: response.usage,
    provider: request.provider_id.unwrap_or_else(|| "default".to_string()),
    timestamp: Utc::now().to_rfc3339(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn valid_json_parses_through() {
    let content = r#"{"intent":"restart_service","parameters":{"service":"nginx"},"steps":["stop","start"]}"#;
    let result = parse_workflow_result(content, "restart nginx");
    assert_eq!(result.intent, "restart_service");
    assert_eq!(result.steps, vec!["stop", "start"]);
  }

  #[test]
  fn code_fenced_json_still_parses() {
    let content = "```json\n{\"intent\":\"x\",\"parameters\":{},\"steps\":[]}\n```";
    assert_eq!(parse_workflow_result(content, "p").intent, "x");
  }

  #[test]
  fn prose_falls_back_to_general_task() {
    let result = parse_workflow_result("Sure! I'd be happy to help with that.", "do the thing");
    assert_eq!(result.intent, "general_task");
    assert_eq!(result.parameters["prompt"], "do the thing");
    assert_eq!(
      result.steps,
      vec!["analyze_request", "execute_action", "return_result"]
    );
  }
}
