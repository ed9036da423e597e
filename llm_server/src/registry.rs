//! Durable provider registry over Postgres.
//!
//! API keys are sealed before they hit a row and are opened only inside the
//! dispatcher; the read path returns configs with the key omitted. The
//! default flags are maintained two-phase inside one transaction, serialized
//! by an advisory lock so concurrent admins cannot leave two defaults.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use tracing::{info, warn};
use uuid::Uuid;

use opshub_core::models::llm::{
  DefaultFlags, LlmProvider, ProviderConfig, ProviderCreateRequest, ProviderPurpose, ProviderType,
  ProviderUpdateRequest,
};
use opshub_core::CoreError;

use crate::crypto::SecretBox;
use crate::error::{LlmError, LlmResult};

/// One lock id per collection; SetDefault transactions serialize on it.
const DEFAULTS_LOCK_ID: i64 = 0x4C4C4D_50524F56; // "LLM PROV"

#[derive(sqlx::FromRow)]
struct ProviderRow {
  id: Uuid,
  name: String,
  provider_type: String,
  purpose: String,
  config: Json<ProviderConfig>,
  models: Json<Vec<String>>,
  is_active: bool,
  default_for_chat: bool,
  default_for_workflow: bool,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl ProviderRow {
  fn into_provider(self) -> LlmResult<LlmProvider> {
    Ok(LlmProvider {
      id: self.id.to_string(),
      name: self.name,
      provider_type: parse_provider_type(&self.provider_type)?,
      purpose: parse_purpose(&self.purpose)?,
      config: self.config.0,
      models: self.models.0,
      is_active: self.is_active,
      is_default: DefaultFlags {
        for_chat: self.default_for_chat,
        for_workflow: self.default_for_workflow,
      },
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

fn parse_provider_type(raw: &str) -> LlmResult<ProviderType> {
  serde_json::from_value(serde_json::Value::String(raw.to_string()))
    .map_err(|_| CoreError::Internal(format!("unknown provider type '{raw}' in registry")).into())
}

fn parse_purpose(raw: &str) -> LlmResult<ProviderPurpose> {
  serde_json::from_value(serde_json::Value::String(raw.to_string()))
    .map_err(|_| CoreError::Internal(format!("unknown purpose '{raw}' in registry")).into())
}

fn type_str(t: ProviderType) -> &'static str {
  t.as_str()
}

fn purpose_str(p: ProviderPurpose) -> &'static str {
  match p {
    ProviderPurpose::Chat => "chat",
    ProviderPurpose::Workflow => "workflow",
    ProviderPurpose::Both => "both",
  }
}

#[derive(Clone)]
pub struct ProviderRegistry {
  pool: PgPool,
  secrets: SecretBox,
}

impl ProviderRegistry {
  pub fn new(pool: PgPool, secrets: SecretBox) -> Self {
    Self { pool, secrets }
  }

  pub async fn list(&self) -> LlmResult<Vec<LlmProvider>> {
    let rows: Vec<ProviderRow> =
      sqlx::query_as("SELECT * FROM llm_providers ORDER BY created_at")
        .fetch_all(&self.pool)
        .await?;
    rows.into_iter().map(ProviderRow::into_provider).collect()
  }

  pub async fn get(&self, id: &str) -> LlmResult<Option<LlmProvider>> {
    let Ok(uuid) = Uuid::parse_str(id) else {
      return Ok(None);
    };
    let row: Option<ProviderRow> = sqlx::query_as("SELECT * FROM llm_providers WHERE id = $1")
      .bind(uuid)
      .fetch_optional(&self.pool)
      .await?;
    row.map(ProviderRow::into_provider).transpose()
  }

  pub async fn list_by_purpose(&self, purpose: ProviderPurpose) -> LlmResult<Vec<LlmProvider>> {
    let all = self.list().await?;
    Ok(
      all
        .into_iter()
        .filter(|p| match purpose {
          ProviderPurpose::Chat => p.purpose.serves_chat(),
          ProviderPurpose::Workflow => p.purpose.serves_workflow(),
          ProviderPurpose::Both => true,
        })
        .collect(),
    )
  }

  pub async fn get_default(&self, purpose: ProviderPurpose) -> LlmResult<Option<LlmProvider>> {
    let column = match purpose {
      ProviderPurpose::Workflow => "default_for_workflow",
      _ => "default_for_chat",
    };
    let row: Option<ProviderRow> = sqlx::query_as(&format!(
      "SELECT * FROM llm_providers WHERE {column} AND is_active LIMIT 1"
    ))
    .fetch_optional(&self.pool)
    .await?;
    row.map(ProviderRow::into_provider).transpose()
  }

  pub async fn create(&self, request: ProviderCreateRequest) -> LlmResult<LlmProvider> {
    let mut config = request.config;
    if let Some(api_key) = &config.api_key {
      if !SecretBox::is_sealed(api_key) {
        config.api_key = Some(self.secrets.seal(api_key)?);
      }
    }

    let row: ProviderRow = sqlx::query_as(
      r#"
      INSERT INTO llm_providers (id, name, provider_type, purpose, config, models, is_active)
      VALUES ($1, $2, $3, $4, $5, $6, $7)
      RETURNING *
      "#,
    )
    .bind(Uuid::new_v4())
    .bind(&request.name)
    .bind(type_str(request.provider_type))
    .bind(purpose_str(request.purpose))
    .bind(Json(&config))
    .bind(Json(&request.models))
    .bind(request.is_active)
    .fetch_one(&self.pool)
    .await?;
    row.into_provider()
  }

  pub async fn update(&self, id: &str, request: ProviderUpdateRequest) -> LlmResult<LlmProvider> {
    let current = self
      .get(id)
      .await?
      .ok_or_else(|| LlmError::Core(CoreError::NotFound(format!("provider {id}"))))?;

    let config = match request.config {
      Some(mut config) => {
        match &config.api_key {
          // A fresh plaintext key gets sealed; an omitted key keeps the old
          // sealed value so updates do not silently wipe credentials.
          Some(api_key) if !SecretBox::is_sealed(api_key) => {
            config.api_key = Some(self.secrets.seal(api_key)?);
          }
          Some(_) => {}
          None => config.api_key = current.config.api_key.clone(),
        }
        config
      }
      None => current.config.clone(),
    };

    let row: ProviderRow = sqlx::query_as(
      r#"
      UPDATE llm_providers
      SET name = $2,
          purpose = $3,
          config = $4,
          models = $5,
          is_active = $6,
          updated_at = now()
      WHERE id = $1
      RETURNING *
      "#,
    )
    .bind(Uuid::parse_str(id).map_err(|_| {
      LlmError::Core(CoreError::NotFound(format!("provider {id}")))
    })?)
    .bind(request.name.unwrap_or(current.name))
    .bind(purpose_str(request.purpose.unwrap_or(current.purpose)))
    .bind(Json(&config))
    .bind(Json(&request.models.unwrap_or(current.models)))
    .bind(request.is_active.unwrap_or(current.is_active))
    .fetch_one(&self.pool)
    .await?;
    row.into_provider()
  }

  pub async fn delete(&self, id: &str) -> LlmResult<()> {
    let uuid = Uuid::parse_str(id)
      .map_err(|_| LlmError::Core(CoreError::NotFound(format!("provider {id}"))))?;
    let result = sqlx::query("DELETE FROM llm_providers WHERE id = $1")
      .bind(uuid)
      .execute(&self.pool)
      .await?;
    if result.rows_affected() == 0 {
      return Err(CoreError::NotFound(format!("provider {id}")).into());
    }
    Ok(())
  }

  /// Two-phase default swap inside one transaction: clear the flag on every
  /// row, set it on the target. The advisory lock serializes concurrent
  /// admins; the invariant "at most one default per purpose" holds on exit.
  pub async fn set_default(&self, id: &str, purpose: ProviderPurpose) -> LlmResult<LlmProvider> {
    let uuid = Uuid::parse_str(id)
      .map_err(|_| LlmError::Core(CoreError::NotFound(format!("provider {id}"))))?;
    let column = match purpose {
      ProviderPurpose::Workflow => "default_for_workflow",
      _ => "default_for_chat",
    };

    let mut tx = self.pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
      .bind(DEFAULTS_LOCK_ID)
      .execute(&mut *tx)
      .await?;

    sqlx::query(&format!("UPDATE llm_providers SET {column} = FALSE WHERE {column}"))
      .execute(&mut *tx)
      .await?;

    let row: Option<ProviderRow> = sqlx::query_as(&format!(
      "UPDATE llm_providers SET {column} = TRUE, updated_at = now() \
       WHERE id = $1 AND is_active RETURNING *"
    ))
    .bind(uuid)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
      tx.rollback().await?;
      return Err(
        CoreError::validation(format!("provider {id} does not exist or is inactive")).into(),
      );
    };

    tx.commit().await?;
    info!(provider = %id, purpose = purpose_str(purpose), "Default provider switched");
    row.into_provider()
  }

  /// First-start seeding: when the collection is empty and the environment
  /// carries vendor credentials, create providers for them and make the
  /// first one default for both purposes.
  pub async fn bootstrap_from_env(
    &self,
    openai_api_key: Option<&str>,
    anthropic_api_key: Option<&str>,
  ) -> LlmResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM llm_providers")
      .fetch_one(&self.pool)
      .await?;
    if count > 0 {
      return Ok(());
    }

    let mut seeded: Vec<LlmProvider> = Vec::new();
    if let Some(api_key) = openai_api_key {
      let provider = self
        .create(ProviderCreateRequest {
          name: "env-openai".to_string(),
          provider_type: ProviderType::Openai,
          purpose: ProviderPurpose::Both,
          config: ProviderConfig {
            api_key: Some(api_key.to_string()),
            base_url: "https://api.openai.com/v1".to_string(),
            organization: None,
            headers: None,
            timeout_sec: 30,
          },
          models: vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
          is_active: true,
        })
        .await?;
      seeded.push(provider);
    }
    if let Some(api_key) = anthropic_api_key {
      let provider = self
        .create(ProviderCreateRequest {
          name: "env-anthropic".to_string(),
          provider_type: ProviderType::Anthropic,
          purpose: ProviderPurpose::Both,
          config: ProviderConfig {
            api_key: Some(api_key.to_string()),
            base_url: "https://api.anthropic.com".to_string(),
            organization: None,
            headers: None,
            timeout_sec: 45,
          },
          models: vec!["claude-3-5-sonnet-20241022".to_string()],
          is_active: true,
        })
        .await?;
      seeded.push(provider);
    }

    if let Some(first) = seeded.first() {
      if let Err(e) = self.set_default(&first.id, ProviderPurpose::Chat).await {
        warn!("Bootstrap default (chat) failed: {}", e);
      }
      if let Err(e) = self.set_default(&first.id, ProviderPurpose::Workflow).await {
        warn!("Bootstrap default (workflow) failed: {}", e);
      }
      info!(seeded = seeded.len(), "Provider registry bootstrapped from environment");
    }
    Ok(())
  }

  /// Open the sealed key for dispatcher use. Never exposed over HTTP.
  pub fn decrypt_api_key(&self, provider: &LlmProvider) -> LlmResult<Option<String>> {
    match &provider.config.api_key {
      Some(sealed) if SecretBox::is_sealed(sealed) => Ok(Some(self.secrets.open(sealed)?)),
      Some(plain) => Ok(Some(plain.clone())),
      None => Ok(None),
    }
  }
}
