use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging for a service binary. `RUST_LOG` wins;
/// otherwise the service runs at `info`.
pub fn init(service: &str) {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("info,{service}=info")));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_target(true))
    .init();
}
