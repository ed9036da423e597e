//! Device registry facade: catalog CRUD + list cache + event emission.
//!
//! Reads are cached for five minutes under a filter-derived key; any
//! mutation clears the whole list-cache prefix. Events for one device id
//! always leave in mutation order because the bus partitions by key.

use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tracing::warn;

use opshub_core::events::{DeviceEventKind, TOPIC_DEVICE_EVENTS};
use opshub_core::models::device::{
  Device, DeviceCreateRequest, DeviceFilter, DeviceListPage, DeviceUpdateRequest, StatusActor,
};
use opshub_core::{CoreError, DomainEvent, EventBus};

use crate::catalog::CatalogDeviceClient;
use crate::error::DeviceResult;
use crate::probe::ProbeEngine;

const LIST_CACHE_TTL_SECS: u64 = 300;

#[derive(Clone)]
pub struct DeviceRegistry {
  catalog: CatalogDeviceClient,
  redis: redis::Client,
  prefix: String,
  bus: EventBus,
  probe: ProbeEngine,
}

impl DeviceRegistry {
  pub fn new(
    catalog: CatalogDeviceClient,
    redis: redis::Client,
    prefix: impl Into<String>,
    bus: EventBus,
    probe: ProbeEngine,
  ) -> Self {
    Self {
      catalog,
      redis,
      prefix: prefix.into(),
      bus,
      probe,
    }
  }

  fn list_cache_key(&self, filter: &DeviceFilter) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
      "{:?}|{:?}|{:?}|{:?}|{}|{}",
      filter.group_id,
      filter.status,
      filter.device_type,
      filter.tags,
      filter.limit.unwrap_or(50),
      filter.offset.unwrap_or(0),
    ));
    format!(
      "{}:devices:list:{}",
      self.prefix,
      hex::encode(&hasher.finalize()[..16])
    )
  }

  pub async fn list(&self, filter: &DeviceFilter) -> DeviceResult<DeviceListPage> {
    let key = self.list_cache_key(filter);

    // Cache miss or cache outage both fall through to the catalog.
    if let Ok(mut conn) = self.redis.get_multiplexed_async_connection().await {
      if let Ok(Some(raw)) = conn.get::<_, Option<String>>(&key).await {
        if let Ok(page) = serde_json::from_str::<DeviceListPage>(&raw) {
          return Ok(page);
        }
      }
    }

    let mut page = self.catalog.list(filter).await?;
    for device in &mut page.items {
      *device = device.masked();
    }

    if let Ok(mut conn) = self.redis.get_multiplexed_async_connection().await {
      if let Ok(raw) = serde_json::to_string(&page) {
        let _: Result<(), _> = conn.set_ex(&key, raw, LIST_CACHE_TTL_SECS).await;
      }
    }
    Ok(page)
  }

  pub async fn get(&self, id: &str) -> DeviceResult<Device> {
    let device = self
      .catalog
      .get(id)
      .await?
      .ok_or_else(|| CoreError::NotFound(format!("device {id}")))?;
    Ok(device.masked())
  }

  pub async fn create(&self, request: DeviceCreateRequest) -> DeviceResult<Device> {
    let device = self.catalog.create(&request).await?;
    self.invalidate_list_cache().await;
    self
      .bus
      .publish_or_drop(
        TOPIC_DEVICE_EVENTS,
        &DomainEvent::device(
          DeviceEventKind::DeviceCreated,
          device.id.clone(),
          serde_json::to_value(device.masked())?,
        ),
      )
      .await;
    Ok(device.masked())
  }

  pub async fn update(&self, id: &str, request: DeviceUpdateRequest) -> DeviceResult<Device> {
    // Administrative status changes go through the state machine.
    if let Some(target) = request.status {
      let current = self.get(id).await?;
      if !current.status.can_transition(target, StatusActor::Admin) {
        return Err(
          CoreError::validation(format!(
            "illegal status transition {} -> {}",
            current.status.as_str(),
            target.as_str()
          ))
          .into(),
        );
      }
    }

    let device = self.catalog.update(id, &request).await?;
    self.invalidate_list_cache().await;
    self.probe.invalidate_connection_info(id);
    self
      .bus
      .publish_or_drop(
        TOPIC_DEVICE_EVENTS,
        &DomainEvent::device(
          DeviceEventKind::DeviceUpdated,
          device.id.clone(),
          serde_json::to_value(device.masked())?,
        ),
      )
      .await;
    Ok(device.masked())
  }

  pub async fn delete(&self, id: &str) -> DeviceResult<()> {
    self.catalog.delete(id).await?;
    self.invalidate_list_cache().await;
    self.probe.invalidate_connection_info(id);
    self
      .bus
      .publish_or_drop(
        TOPIC_DEVICE_EVENTS,
        &DomainEvent::device(
          DeviceEventKind::DeviceDeleted,
          id.to_string(),
          serde_json::json!({ "deviceId": id }),
        ),
      )
      .await;
    Ok(())
  }

  async fn invalidate_list_cache(&self) {
    let pattern = format!("{}:devices:list:*", self.prefix);
    let result: Result<(), redis::RedisError> = async {
      let mut conn = self.redis.get_multiplexed_async_connection().await?;
      let mut cursor: u64 = 0;
      loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
          .arg(cursor)
          .arg("MATCH")
          .arg(&pattern)
          .arg("COUNT")
          .arg(100)
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
      warn!("Device list cache invalidation failed: {}", e);
    }
  }
}
