use clap::Parser;
use tracing::error;

use device_server::{serve, DeviceConfig};

#[derive(Parser, Debug)]
#[command(name = "device_server", about = "OpsHub device management service")]
struct Cli {
  /// Path to device.yml; defaults to the standard search path.
  #[arg(short, long)]
  config: Option<String>,

  /// Override the listen port.
  #[arg(short, long)]
  port: Option<u16>,
}

#[tokio::main]
async fn main() {
  opshub_core::logging::init("device_server");
  let cli = Cli::parse();

  let mut config = match DeviceConfig::load(cli.config.as_deref()) {
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
    error!("Device service failed: {:#}", e);
    std::process::exit(1);
  }
}
