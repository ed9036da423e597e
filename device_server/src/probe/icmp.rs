//! L3 reachability preflight: ICMP echo, 5s timeout, 2 attempts.

use std::net::IpAddr;
use std::time::Duration;
use tokio::net::lookup_host;
use tracing::debug;

const ICMP_TIMEOUT: Duration = Duration::from_secs(5);
const ICMP_ATTEMPTS: u32 = 2;

/// `Ok(())` when the host answered an echo; `Err(reason)` otherwise.
pub async fn reachable(host: &str) -> Result<(), String> {
  let ip = resolve(host)
    .await
    .ok_or_else(|| format!("cannot resolve host {host}"))?;

  let payload = [0u8; 16];
  let mut last_error = String::new();
  for attempt in 1..=ICMP_ATTEMPTS {
    match tokio::time::timeout(ICMP_TIMEOUT, surge_ping::ping(ip, &payload)).await {
      Ok(Ok((_packet, rtt))) => {
        debug!(host = %host, rtt_ms = rtt.as_millis() as u64, "ICMP echo answered");
        return Ok(());
      }
      Ok(Err(e)) => {
        last_error = e.to_string();
      }
      Err(_) => {
        last_error = "icmp timeout".to_string();
      }
    }
    debug!(host = %host, attempt, "ICMP echo failed: {}", last_error);
  }
  Err(format!("host {host} unreachable: {last_error}"))
}

async fn resolve(host: &str) -> Option<IpAddr> {
  if let Ok(ip) = host.parse::<IpAddr>() {
    return Some(ip);
  }
  lookup_host((host, 0))
    .await
    .ok()?
    .next()
    .map(|addr| addr.ip())
}
