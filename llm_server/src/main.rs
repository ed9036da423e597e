use clap::Parser;
use tracing::error;

use llm_server::{serve, LlmConfig};

#[derive(Parser, Debug)]
#[command(name = "llm_server", about = "OpsHub LLM provider service")]
struct Cli {
  /// Path to llm.yml; defaults to the standard search path.
  #[arg(short, long)]
  config: Option<String>,

  /// Override the listen port.
  #[arg(short, long)]
  port: Option<u16>,
}

#[tokio::main]
async fn main() {
  opshub_core::logging::init("llm_server");
  let cli = Cli::parse();

  let mut config = match LlmConfig::load(cli.config.as_deref()) {
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
    error!("LLM service failed: {:#}", e);
    std::process::exit(1);
  }
}
