//! Prompt templates: named, versioned-by-update text with `{{var}}` slots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use uuid::Uuid;
use validator::Validate;

use crate::error::LlmResult;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub template: String,
  pub variables: Vec<String>,
  pub category: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
  id: Uuid,
  name: String,
  description: Option<String>,
  template: String,
  variables: Json<Vec<String>>,
  category: String,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl From<TemplateRow> for PromptTemplate {
  fn from(row: TemplateRow) -> Self {
    Self {
      id: row.id.to_string(),
      name: row.name,
      description: row.description,
      template: row.template,
      variables: row.variables.0,
      category: row.category,
      created_at: row.created_at,
      updated_at: row.updated_at,
    }
  }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TemplateCreateRequest {
  #[validate(length(min = 1, max = 255))]
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[validate(length(min = 1))]
  pub template: String,
  #[serde(default)]
  pub variables: Vec<String>,
  #[serde(default = "default_category")]
  pub category: String,
}

fn default_category() -> String {
  "general".to_string()
}

/// Substitute `{{name}}` slots; unknown slots stay verbatim so callers can
/// spot them.
pub fn render(template: &str, variables: &serde_json::Map<String, serde_json::Value>) -> String {
  let mut out = template.to_string();
  for (name, value) in variables {
    let needle = format!("{{{{{name}}}}}");
    let replacement = match value {
      serde_json::Value::String(s) => s.clone(),
      other => other.to_string(),
    };
    out = out.replace(&needle, &replacement);
  }
  out
}

#[derive(Clone)]
pub struct TemplateStore {
  pool: PgPool,
}

impl TemplateStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub async fn list(&self) -> LlmResult<Vec<PromptTemplate>> {
    let rows = sqlx::query_as::<_, TemplateRow>(
      "SELECT * FROM prompt_templates ORDER BY category, name",
    )
    .fetch_all(&self.pool)
    .await?;
    Ok(rows.into_iter().map(PromptTemplate::from).collect())
  }

  pub async fn create(&self, request: TemplateCreateRequest) -> LlmResult<PromptTemplate> {
    let row = sqlx::query_as::<_, TemplateRow>(
      r#"
      INSERT INTO prompt_templates (id, name, description, template, variables, category)
      VALUES ($1, $2, $3, $4, $5, $6)
      RETURNING *
      "#,
    )
    .bind(Uuid::new_v4())
    .bind(&request.name)
    .bind(&request.description)
    .bind(&request.template)
    .bind(Json(&request.variables))
    .bind(&request.category)
    .fetch_one(&self.pool)
    .await?;
    Ok(row.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn render_substitutes_named_slots() {
    let mut vars = serde_json::Map::new();
    vars.insert("host".to_string(), serde_json::json!("db-1"));
    vars.insert("count".to_string(), serde_json::json!(3));
    let out = render("restart {{host}} {{count}} times, then {{missing}}", &vars);
    assert_eq!(out, "restart db-1 3 times, then {{missing}}");
  }
}
