use std::ops::Deref;
use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

use opshub_core::EventBus;

use crate::cache::ResponseCache;
use crate::config::LlmConfig;
use crate::crypto::SecretBox;
use crate::dispatch::Dispatcher;
use crate::registry::ProviderRegistry;
use crate::templates::TemplateStore;
use crate::usage::UsageRecorder;

#[derive(Clone)]
pub struct AppState {
  inner: Arc<AppStateInner>,
}

pub struct AppStateInner {
  pub config: LlmConfig,
  pub db: PgPool,
  pub registry: ProviderRegistry,
  pub cache: ResponseCache,
  pub usage: UsageRecorder,
  pub dispatcher: Dispatcher,
  pub templates: TemplateStore,
  pub bus: EventBus,
}

impl Deref for AppState {
  type Target = AppStateInner;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

impl AppState {
  pub async fn try_new(config: LlmConfig) -> Result<Self> {
    let db = PgPoolOptions::new()
      .max_connections(10)
      .connect(&config.postgres.url())
      .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let redis = redis::Client::open(config.redis.url())?;
    let secrets = SecretBox::new(&config.encryption_key)?;
    let registry = ProviderRegistry::new(db.clone(), secrets);
    let cache = ResponseCache::new(
      redis.clone(),
      config.redis.key_prefix.clone(),
      config.cache_ttl_secs,
    );
    let usage = UsageRecorder::new(db.clone(), redis, config.redis.key_prefix.clone());
    let bus = EventBus::connect(config.bus_url.clone()).await;
    let templates = TemplateStore::new(db.clone());

    registry
      .bootstrap_from_env(
        config.openai_api_key.as_deref(),
        config.anthropic_api_key.as_deref(),
      )
      .await?;

    let dispatcher = Dispatcher::new(
      registry.clone(),
      cache.clone(),
      usage.clone(),
      bus.clone(),
      config.openai_api_key.clone(),
      config.anthropic_api_key.clone(),
    );
    dispatcher.reload().await?;
    dispatcher.spawn_reload_loop();

    Ok(Self {
      inner: Arc::new(AppStateInner {
        config,
        db,
        registry,
        cache,
        usage,
        dispatcher,
        templates,
        bus,
      }),
    })
  }
}
