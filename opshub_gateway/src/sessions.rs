//! Server-side session records, keyed by refresh id in Redis.
//!
//! Invariant: a refresh credential is usable iff its session record exists.
//! TTL matches the credential's own expiry, so an evicted record and an
//! expired credential converge on the same answer.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
  pub user_id: String,
  pub refresh_id: String,
  pub created_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ip_address: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct SessionStore {
  client: redis::Client,
  prefix: String,
}

impl SessionStore {
  pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
    Self {
      client,
      prefix: prefix.into(),
    }
  }

  fn session_key(&self, refresh_id: &str) -> String {
    format!("{}:session:{}", self.prefix, refresh_id)
  }

  fn user_index_key(&self, user_id: &str) -> String {
    format!("{}:user_sessions:{}", self.prefix, user_id)
  }

  pub async fn save_refresh(&self, record: &SessionRecord, ttl_secs: u64) -> GatewayResult<()> {
    let mut conn = self.client.get_multiplexed_async_connection().await?;
    let payload = serde_json::to_string(record)?;
    let key = self.session_key(&record.refresh_id);
    let index = self.user_index_key(&record.user_id);
    redis::pipe()
      .set_ex(&key, payload, ttl_secs)
      .sadd(&index, &record.refresh_id)
      .expire(&index, ttl_secs as i64)
      .query_async::<_, ()>(&mut conn)
      .await?;
    Ok(())
  }

  pub async fn lookup_refresh(&self, refresh_id: &str) -> GatewayResult<Option<SessionRecord>> {
    let mut conn = self.client.get_multiplexed_async_connection().await?;
    let raw: Option<String> = conn.get(self.session_key(refresh_id)).await?;
    match raw {
      Some(json) => Ok(Some(serde_json::from_str(&json)?)),
      None => Ok(None),
    }
  }

  /// Idempotent: deleting a missing session is not an error.
  pub async fn delete_refresh(&self, user_id: &str, refresh_id: &str) -> GatewayResult<bool> {
    let mut conn = self.client.get_multiplexed_async_connection().await?;
    let deleted: i64 = conn.del(self.session_key(refresh_id)).await?;
    let _: i64 = conn
      .srem(self.user_index_key(user_id), refresh_id)
      .await?;
    Ok(deleted > 0)
  }

  /// Drop every live session for a user (logout without a refresh id, role
  /// revocation).
  pub async fn delete_all_for_user(&self, user_id: &str) -> GatewayResult<u64> {
    let mut conn = self.client.get_multiplexed_async_connection().await?;
    let index = self.user_index_key(user_id);
    let refresh_ids: Vec<String> = conn.smembers(&index).await?;
    let mut deleted = 0u64;
    for refresh_id in &refresh_ids {
      let n: i64 = conn.del(self.session_key(refresh_id)).await?;
      deleted += n as u64;
    }
    let _: i64 = conn.del(&index).await?;
    Ok(deleted)
  }
}
