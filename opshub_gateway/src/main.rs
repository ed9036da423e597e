use clap::Parser;
use tracing::error;

use opshub_gateway::{serve, GatewayConfig};

#[derive(Parser, Debug)]
#[command(name = "opshub_gateway", about = "OpsHub platform gateway")]
struct Cli {
  /// Path to gateway.yml; defaults to the standard search path.
  #[arg(short, long)]
  config: Option<String>,

  /// Override the listen port.
  #[arg(short, long)]
  port: Option<u16>,
}

#[tokio::main]
async fn main() {
  opshub_core::logging::init("opshub_gateway");
  let cli = Cli::parse();

  let mut config = match GatewayConfig::load(cli.config.as_deref()) {
    Ok(config) => config,
    Err(e) => {
      error!("Configuration invalid: {:#}", e);
      std::process::exit(1);
    }
  };
  if let Some(port) = cli.port {
    config.server.port = port;
  }

  if let Err(e) = serve(config).await {
    error!("Gateway failed: {:#}", e);
    std::process::exit(1);
  }
}
