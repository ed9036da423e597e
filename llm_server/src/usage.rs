//! Usage accounting: the append-only request log in Postgres plus daily
//! per-provider counters in Redis under `usage:llm:<provider>:<YYYY-MM-DD>`.

use chrono::{Duration, Utc};
use redis::AsyncCommands;
use serde::Serialize;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use tracing::warn;
use uuid::Uuid;

use opshub_core::models::llm::{LlmRequestLog, RequestStatus};

use crate::error::LlmResult;

const COUNTER_TTL_SECS: i64 = 90 * 24 * 3600;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
  pub date: String,
  pub provider_id: String,
  pub requests: u64,
  pub prompt_tokens: u64,
  pub completion_tokens: u64,
  pub total_tokens: u64,
  pub cost: f64,
}

#[derive(Clone)]
pub struct UsageRecorder {
  pool: PgPool,
  redis: redis::Client,
  prefix: String,
}

impl UsageRecorder {
  pub fn new(pool: PgPool, redis: redis::Client, prefix: impl Into<String>) -> Self {
    Self {
      pool,
      redis,
      prefix: prefix.into(),
    }
  }

  fn counter_key(&self, provider_id: &str, date: &str) -> String {
    format!("{}:usage:llm:{}:{}", self.prefix, provider_id, date)
  }

  /// Append the log row and bump today's counters. Counter trouble is
  /// logged, never surfaced; the log row is the source of truth.
  pub async fn record(&self, log: &LlmRequestLog) -> LlmResult<()> {
    let status = match log.status {
      RequestStatus::Success => "success",
      RequestStatus::Error => "error",
      RequestStatus::Timeout => "timeout",
    };
    sqlx::query(
      r#"
      INSERT INTO llm_request_logs
        (request_id, ts, provider_id, model, input_messages, response, duration_ms, cached, status, error_message)
      VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
      "#,
    )
    .bind(Uuid::parse_str(&log.request_id).unwrap_or_else(|_| Uuid::new_v4()))
    .bind(log.timestamp)
    .bind(&log.provider_id)
    .bind(&log.model)
    .bind(Json(&log.input_messages))
    .bind(log.response.as_ref().map(Json))
    .bind(log.duration_ms as i64)
    .bind(log.cached)
    .bind(status)
    .bind(&log.error_message)
    .execute(&self.pool)
    .await?;

    let date = log.timestamp.format("%Y-%m-%d").to_string();
    let key = self.counter_key(&log.provider_id, &date);
    let (prompt, completion, total, cost) = log
      .response
      .as_ref()
      .map(|r| {
        (
          r.usage.prompt_tokens as i64,
          r.usage.completion_tokens as i64,
          r.usage.total_tokens as i64,
          r.usage.cost,
        )
      })
      .unwrap_or((0, 0, 0, 0.0));

    let result: Result<(), redis::RedisError> = async {
      let mut conn = self.redis.get_multiplexed_async_connection().await?;
      redis::pipe()
        .hincr(&key, "requests", 1)
        .hincr(&key, "prompt_tokens", prompt)
        .hincr(&key, "completion_tokens", completion)
        .hincr(&key, "total_tokens", total)
        .cmd("HINCRBYFLOAT")
        .arg(&key)
        .arg("cost")
        .arg(cost)
        .expire(&key, COUNTER_TTL_SECS)
        .query_async(&mut conn)
        .await
    }
    .await;
    if let Err(e) = result {
      warn!("Usage counter update failed: {}", e);
    }
    Ok(())
  }

  /// Daily usage over the last `days`, optionally narrowed to one provider.
  pub async fn query(
    &self,
    provider_ids: &[String],
    days: u32,
  ) -> LlmResult<Vec<DailyUsage>> {
    let mut conn = self.redis.get_multiplexed_async_connection().await?;
    let mut out = Vec::new();
    let today = Utc::now().date_naive();

    for offset in 0..days.max(1) {
      let date = (today - Duration::days(offset as i64))
        .format("%Y-%m-%d")
        .to_string();
      for provider_id in provider_ids {
        let key = self.counter_key(provider_id, &date);
        let fields: std::collections::HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
          continue;
        }
        let get = |name: &str| {
          fields
            .get(name)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
        };
        out.push(DailyUsage {
          date: date.clone(),
          provider_id: provider_id.clone(),
          requests: get("requests"),
          prompt_tokens: get("prompt_tokens"),
          completion_tokens: get("completion_tokens"),
          total_tokens: get("total_tokens"),
          cost: fields
            .get("cost")
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0),
        });
      }
    }
    Ok(out)
  }
}
