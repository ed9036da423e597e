//! Content-addressed response cache.
//!
//! The key is SHA-256 over the canonical JSON of the messages array; the
//! default serde_json map is key-sorted, so equal conversations hash equal
//! regardless of field order at the caller. Values live until TTL; provider
//! config changes clear the whole prefix.

use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tracing::warn;

use opshub_core::models::llm::{ChatMessage, ChatResponse};

use crate::error::LlmResult;

#[derive(Clone)]
pub struct ResponseCache {
  redis: redis::Client,
  prefix: String,
  ttl_secs: u64,
}

/// Canonical cache key for a conversation.
pub fn cache_key(messages: &[ChatMessage]) -> String {
  let canonical: Vec<serde_json::Value> = messages
    .iter()
    .map(|m| {
      serde_json::json!({
        "content": m.content,
        "role": m.role,
      })
    })
    .collect();
  let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
  let mut hasher = Sha256::new();
  hasher.update(&bytes);
  hex::encode(hasher.finalize())
}

impl ResponseCache {
  pub fn new(redis: redis::Client, prefix: impl Into<String>, ttl_secs: u64) -> Self {
    Self {
      redis,
      prefix: prefix.into(),
      ttl_secs,
    }
  }

  fn full_key(&self, key: &str) -> String {
    format!("{}:llm:cache:{}", self.prefix, key)
  }

  /// Miss and cache outage look the same to the caller.
  pub async fn get(&self, key: &str) -> Option<ChatResponse> {
    let result: Result<Option<String>, redis::RedisError> = async {
      let mut conn = self.redis.get_multiplexed_async_connection().await?;
      conn.get(self.full_key(key)).await
    }
    .await;
    match result {
      Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
      Ok(None) => None,
      Err(e) => {
        warn!("Response cache read failed: {}", e);
        None
      }
    }
  }

  pub async fn put(&self, key: &str, response: &ChatResponse) -> LlmResult<()> {
    let mut conn = self.redis.get_multiplexed_async_connection().await?;
    let raw = serde_json::to_string(response)?;
    conn
      .set_ex::<_, _, ()>(self.full_key(key), raw, self.ttl_secs)
      .await?;
    Ok(())
  }

  /// Prefix clear, used when a provider's configuration changes.
  pub async fn clear(&self) {
    let pattern = self.full_key("*");
    let result: Result<(), redis::RedisError> = async {
      let mut conn = self.redis.get_multiplexed_async_connection().await?;
      let mut cursor: u64 = 0;
      loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
          .arg(cursor)
          .arg("MATCH")
          .arg(&pattern)
          .arg("COUNT")
          .arg(200)
          .query_async(&mut conn)
          .await?;
        if !keys.is_empty() {
          let _: i64 = conn.del(keys).await?;
        }
        cursor = next;
        if cursor == 0 {
          break;
        }
      }
      Ok(())
    }
    .await;
    if let Err(e) = result {
      warn!("Response cache clear failed: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use opshub_core::models::llm::ChatRole;

  #[test]
  fn identical_conversations_hash_identically() {
    let a = vec![ChatMessage::user("Hello")];
    let b = vec![ChatMessage::new(ChatRole::User, "Hello".to_string())];
    assert_eq!(cache_key(&a), cache_key(&b));
  }

  #[test]
  fn different_content_or_role_changes_the_key() {
    let base = vec![ChatMessage::user("Hello")];
    assert_ne!(cache_key(&base), cache_key(&[ChatMessage::user("hello")]));
    assert_ne!(
      cache_key(&base),
      cache_key(&[ChatMessage::assistant("Hello")])
    );
  }

  #[test]
  fn key_is_hex_sha256() {
    let key = cache_key(&[ChatMessage::user("x")]);
    assert_eq!(key.len(), 64);
    assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
  }
}
