//! Event-bus adapter.
//!
//! Durable domain events go through JetStream (at-least-once, ordered per
//! subject, and the subject carries the event key). Realtime fan-in frames
//! for the hub use plain core publish. If the bus is unreachable the
//! services still run: publishes are counted and dropped until a background
//! reconnect succeeds.

use async_nats::jetstream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::error::CoreError;
use crate::events::{DomainEvent, WsMessage, TOPIC_DEVICE_EVENTS, TOPIC_LLM_EVENTS};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_INTERVAL: Duration = Duration::from_secs(30);

struct BusInner {
  client: RwLock<Option<async_nats::Client>>,
  jetstream: RwLock<Option<jetstream::Context>>,
  dropped: AtomicU64,
  url: String,
}

#[derive(Clone)]
pub struct EventBus {
  inner: Arc<BusInner>,
}

impl EventBus {
  /// Connect to the bus, or start degraded if it is down. Never fails.
  pub async fn connect(url: impl Into<String>) -> Self {
    let url = url.into();
    let bus = Self {
      inner: Arc::new(BusInner {
        client: RwLock::new(None),
        jetstream: RwLock::new(None),
        dropped: AtomicU64::new(0),
        url,
      }),
    };

    if let Err(e) = bus.try_connect().await {
      warn!(
        "Event bus unreachable at startup ({}); running degraded, publishes will be dropped",
        e
      );
    }
    bus.spawn_reconnect_loop();
    bus
  }

  async fn try_connect(&self) -> anyhow::Result<()> {
    let options = async_nats::ConnectOptions::new()
      .connection_timeout(CONNECT_TIMEOUT)
      .ping_interval(Duration::from_secs(30))
      .max_reconnects(None)
      .reconnect_delay_callback(|attempts: usize| {
        Duration::from_secs(std::cmp::min(2u64.saturating_pow(attempts as u32), 30))
      });

    let client = options.connect(&self.inner.url).await?;
    let js = jetstream::new(client.clone());

    // Durable topic log; one stream per domain topic family.
    for (name, topic) in [
      ("DEVICE_EVENTS", TOPIC_DEVICE_EVENTS),
      ("LLM_EVENTS", TOPIC_LLM_EVENTS),
    ] {
      js.get_or_create_stream(jetstream::stream::Config {
        name: name.to_string(),
        subjects: vec![format!("{topic}.>")],
        ..Default::default()
      })
      .await?;
    }

    info!("Connected to event bus at {}", self.inner.url);
    *self.inner.client.write().await = Some(client);
    *self.inner.jetstream.write().await = Some(js);
    Ok(())
  }

  fn spawn_reconnect_loop(&self) {
    let bus = self.clone();
    tokio::spawn(async move {
      loop {
        tokio::time::sleep(RECONNECT_INTERVAL).await;
        if bus.inner.client.read().await.is_some() {
          continue;
        }
        match bus.try_connect().await {
          Ok(()) => {
            let dropped = bus.inner.dropped.load(Ordering::Relaxed);
            if dropped > 0 {
              warn!("Event bus reconnected; {} events were dropped while degraded", dropped);
            }
          }
          Err(e) => warn!("Event bus reconnect attempt failed: {}", e),
        }
      }
    });
  }

  pub async fn is_connected(&self) -> bool {
    self.inner.client.read().await.is_some()
  }

  pub fn dropped_count(&self) -> u64 {
    self.inner.dropped.load(Ordering::Relaxed)
  }

  /// At-least-once publish to a durable topic. Subject is `{topic}.{key}`,
  /// so ordering holds per key and only per key.
  pub async fn publish(&self, topic: &str, event: &DomainEvent) -> Result<(), CoreError> {
    let payload = serde_json::to_vec(event)?;
    let subject = format!("{}.{}", topic, sanitize_key(&event.key));

    let js = self.inner.jetstream.read().await.clone();
    let Some(js) = js else {
      self.inner.dropped.fetch_add(1, Ordering::Relaxed);
      warn!(
        event_type = %event.event_type,
        "Event bus degraded; dropping event"
      );
      return Err(CoreError::Internal("event bus unavailable".into()));
    };

    let publish = async {
      js.publish(subject, payload.into())
        .await
        .map_err(|e| CoreError::Internal(format!("bus publish failed: {e}")))?
        .await
        .map_err(|e| CoreError::Internal(format!("bus ack failed: {e}")))
        .map(|_| ())
    };

    match tokio::time::timeout(PUBLISH_TIMEOUT, publish).await {
      Ok(result) => result,
      Err(_) => {
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        Err(CoreError::Internal("bus publish timed out".into()))
      }
    }
  }

  /// Fire-and-forget variant for paths where bus failure must never reach
  /// the caller (heartbeats, probe results). Logged and counted only.
  pub async fn publish_or_drop(&self, topic: &str, event: &DomainEvent) {
    if let Err(e) = self.publish(topic, event).await {
      error!(
        event_type = %event.event_type,
        "Dropping domain event: {}", e
      );
    }
  }

  /// Non-durable realtime frame towards the hub's fan-in subjects.
  pub async fn publish_realtime(&self, subject: &str, message: &WsMessage) -> Result<(), CoreError> {
    let payload = serde_json::to_vec(message)?;
    let client = self.inner.client.read().await.clone();
    let Some(client) = client else {
      self.inner.dropped.fetch_add(1, Ordering::Relaxed);
      return Err(CoreError::Internal("event bus unavailable".into()));
    };
    client
      .publish(subject.to_string(), payload.into())
      .await
      .map_err(|e| CoreError::Internal(format!("realtime publish failed: {e}")))
  }

  /// Core subscription for the hub's fan-in side. Each gateway instance
  /// holds its own subscription, so restarts are safe.
  pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, CoreError> {
    let client = self.inner.client.read().await.clone();
    let Some(client) = client else {
      return Err(CoreError::Internal("event bus unavailable".into()));
    };
    info!("Subscribing to subject: {}", subject);
    client
      .subscribe(subject.to_string())
      .await
      .map_err(|e| CoreError::Internal(format!("subscribe failed: {e}")))
  }

  /// Wildcard subscription over a durable topic family (`{topic}.>`).
  pub async fn subscribe_topic(&self, topic: &str) -> Result<async_nats::Subscriber, CoreError> {
    self.subscribe(&format!("{topic}.>")).await
  }

  /// Flush outstanding publishes during graceful shutdown.
  pub async fn flush(&self) {
    if let Some(client) = self.inner.client.read().await.clone() {
      if let Err(e) = client.flush().await {
        warn!("Event bus flush failed during shutdown: {}", e);
      }
    }
  }
}

/// NATS subject tokens must not contain whitespace or structural characters.
fn sanitize_key(key: &str) -> String {
  key
    .chars()
    .map(|c| match c {
      '.' | '*' | '>' | ' ' | '\t' => '_',
      c => c,
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn subject_keys_are_sanitized() {
    assert_eq!(sanitize_key("dev-1"), "dev-1");
    assert_eq!(sanitize_key("a.b c>*"), "a_b_c__");
  }
}
