//! HTTP(S) probe: GET `/`, any status below 500 counts as reachable.
//! Self-signed certificates are expected on device management interfaces.

use std::time::Duration;

use opshub_core::models::device::{ConnectionInfo, ConnectionProtocol, ProbeErrorCode};

use super::ProbeOutcome;

pub async fn probe(info: &ConnectionInfo) -> ProbeOutcome {
  let timeout = Duration::from_secs(info.timeout_sec.max(1));
  let scheme = match info.protocol {
    ConnectionProtocol::Https => "https",
    _ => "http",
  };
  let url = format!("{scheme}://{}:{}/", info.host, info.port);

  let client = reqwest::Client::builder()
    .timeout(timeout)
    .connect_timeout(timeout)
    .danger_accept_invalid_certs(true)
    .build()
    .map_err(|e| {
      (
        ProbeErrorCode::HttpConnectionFailed,
        format!("client build failed: {e}"),
      )
    })?;

  let mut request = client.get(&url);
  let basic_auth = match (&info.username, &info.password) {
    (Some(username), Some(password)) => {
      request = request.basic_auth(username, Some(password));
      true
    }
    _ => false,
  };

  let response = request.send().await.map_err(|e| {
    if e.is_timeout() {
      (
        ProbeErrorCode::HttpTimeout,
        format!("http probe timed out after {}s", timeout.as_secs()),
      )
    } else if e.is_connect() {
      (
        ProbeErrorCode::HttpConnectionRefused,
        format!("connection refused by {url}"),
      )
    } else {
      (
        ProbeErrorCode::HttpConnectionFailed,
        format!("http probe failed: {e}"),
      )
    }
  })?;

  let status = response.status();
  let server = response
    .headers()
    .get("server")
    .and_then(|v| v.to_str().ok())
    .map(str::to_string);

  if basic_auth && (status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN)
  {
    return Err((
      ProbeErrorCode::HttpAuthFailed,
      format!("credentials rejected with {status}"),
    ));
  }
  if status.as_u16() >= 500 {
    return Err((
      ProbeErrorCode::HttpConnectionFailed,
      format!("endpoint answered {status}"),
    ));
  }

  Ok(serde_json::json!({
    "statusCode": status.as_u16(),
    "server": server,
  }))
}
