//! SNMP v2c probe: GET sysDescr (1.3.6.1.2.1.1.1.0).

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::lookup_host;

use opshub_core::models::device::{ConnectionInfo, ProbeErrorCode};

use super::ProbeOutcome;

const SYS_DESCR_OID: &str = "1.3.6.1.2.1.1.1.0";
const SNMP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SNMP_PORT: u16 = 161;

pub async fn probe(info: &ConnectionInfo) -> ProbeOutcome {
  let port = if info.port == 0 {
    DEFAULT_SNMP_PORT
  } else {
    info.port
  };
  let target = resolve(&info.host, port).await.ok_or_else(|| {
    (
      ProbeErrorCode::SnmpUnknownHost,
      format!("cannot resolve {}", info.host),
    )
  })?;

  // Community string rides in the username field; "public" otherwise.
  let community = info
    .username
    .clone()
    .filter(|c| !c.is_empty())
    .unwrap_or_else(|| "public".to_string());

  let oid: csnmp::ObjectIdentifier = SYS_DESCR_OID.parse().map_err(|_| {
    (
      ProbeErrorCode::SnmpConnectionFailed,
      "invalid sysDescr oid".to_string(),
    )
  })?;

  let run = async {
    let client = csnmp::Snmp2cClient::new(
      target,
      community.into_bytes(),
      None,
      Some(SNMP_TIMEOUT),
    )
    .await
    .map_err(|e| {
      (
        ProbeErrorCode::SnmpConnectionFailed,
        format!("snmp client init failed: {e}"),
      )
    })?;

    client.get(oid).await.map_err(|e| {
      let text = e.to_string();
      if text.to_lowercase().contains("timeout") || text.to_lowercase().contains("timed out") {
        (
          ProbeErrorCode::SnmpTimeout,
          format!("snmp get timed out: {text}"),
        )
      } else {
        (
          ProbeErrorCode::SnmpConnectionFailed,
          format!("snmp get failed: {text}"),
        )
      }
    })
  };

  let value = match tokio::time::timeout(SNMP_TIMEOUT, run).await {
    Ok(result) => result?,
    Err(_) => {
      return Err((
        ProbeErrorCode::SnmpTimeout,
        format!("snmp probe exceeded {}s", SNMP_TIMEOUT.as_secs()),
      ));
    }
  };

  Ok(serde_json::json!({
    "sysDescr": format!("{value:?}"),
  }))
}

async fn resolve(host: &str, port: u16) -> Option<SocketAddr> {
  if let Ok(addr) = format!("{host}:{port}").parse::<SocketAddr>() {
    return Some(addr);
  }
  lookup_host((host, port)).await.ok()?.next()
}
