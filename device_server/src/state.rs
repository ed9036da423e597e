use std::ops::Deref;
use std::sync::Arc;

use anyhow::Result;

use opshub_core::EventBus;

use crate::catalog::CatalogDeviceClient;
use crate::config::DeviceConfig;
use crate::metrics::InfluxSink;
use crate::probe::ProbeEngine;
use crate::registry::DeviceRegistry;
use crate::status::{HeartbeatPipeline, LiveStatusStore};

#[derive(Clone)]
pub struct AppState {
  inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
  pub config: DeviceConfig,
  pub catalog: CatalogDeviceClient,
  pub registry: DeviceRegistry,
  pub probe: ProbeEngine,
  pub heartbeat: HeartbeatPipeline,
  pub live: LiveStatusStore,
  pub bus: EventBus,
}

impl Deref for AppState {
  type Target = AppStateInner;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

impl AppState {
  pub async fn try_new(config: DeviceConfig) -> Result<Self> {
    let redis = redis::Client::open(config.redis.url())?;
    let catalog = CatalogDeviceClient::new(config.storage_service_url.clone());
    let bus = EventBus::connect(config.bus_url.clone()).await;
    let live = LiveStatusStore::new(redis.clone(), config.redis.key_prefix.clone());
    let metrics = InfluxSink::new(config.influx.clone());

    let probe = ProbeEngine::new(
      config.probe.max_concurrent,
      catalog.clone(),
      live.clone(),
      bus.clone(),
    );
    let registry = DeviceRegistry::new(
      catalog.clone(),
      redis,
      config.redis.key_prefix.clone(),
      bus.clone(),
      probe.clone(),
    );
    let heartbeat = HeartbeatPipeline {
      live: live.clone(),
      bus: bus.clone(),
      metrics,
    };

    Ok(Self {
      inner: Arc::new(AppStateInner {
        config,
        catalog,
        registry,
        probe,
        heartbeat,
        live,
        bus,
      }),
    })
  }
}
