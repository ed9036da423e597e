//! SSH probe: connect, authenticate, run two read-only diagnostics.

use ssh2::Session;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use opshub_core::models::device::{ConnectionInfo, ProbeErrorCode};

use super::ProbeOutcome;

pub async fn probe(info: &ConnectionInfo) -> ProbeOutcome {
  let timeout = Duration::from_secs(info.timeout_sec.max(1));
  if !info.has_credentials() {
    return Err((
      ProbeErrorCode::SshAuthFailed,
      "no password or private key configured".to_string(),
    ));
  }

  let info = info.clone();
  let blocking = tokio::task::spawn_blocking(move || probe_blocking(&info, timeout));

  match tokio::time::timeout(timeout, blocking).await {
    Ok(Ok(outcome)) => outcome,
    Ok(Err(join_error)) => Err((
      ProbeErrorCode::SshConnectionFailed,
      format!("probe task failed: {join_error}"),
    )),
    Err(_) => Err((
      ProbeErrorCode::SshTimeout,
      format!("ssh probe exceeded {}s", timeout.as_secs()),
    )),
  }
}

fn probe_blocking(info: &ConnectionInfo, timeout: Duration) -> ProbeOutcome {
  let addr = (info.host.as_str(), info.port)
    .to_socket_addrs()
    .map_err(|e| {
      (
        ProbeErrorCode::SshConnectionFailed,
        format!("cannot resolve {}: {e}", info.host),
      )
    })?
    .next()
    .ok_or_else(|| {
      (
        ProbeErrorCode::SshConnectionFailed,
        format!("no address for {}", info.host),
      )
    })?;

  let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| match e.kind() {
    std::io::ErrorKind::ConnectionRefused => (
      ProbeErrorCode::SshConnectionRefused,
      format!("connection refused by {addr}"),
    ),
    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => (
      ProbeErrorCode::SshTimeout,
      format!("tcp connect to {addr} timed out"),
    ),
    _ => (
      ProbeErrorCode::SshConnectionFailed,
      format!("tcp connect failed: {e}"),
    ),
  })?;

  let mut session = Session::new().map_err(|e| {
    (
      ProbeErrorCode::SshConnectionFailed,
      format!("session init failed: {e}"),
    )
  })?;
  session.set_tcp_stream(tcp);
  session.set_timeout(timeout.as_millis() as u32);
  session.handshake().map_err(|e| {
    (
      ProbeErrorCode::SshConnectionFailed,
      format!("ssh handshake failed: {e}"),
    )
  })?;

  let username = info.username.as_deref().unwrap_or("root");
  let auth_result = match (&info.password, &info.private_key) {
    (Some(password), _) => session.userauth_password(username, password),
    (None, Some(key)) => session.userauth_pubkey_memory(username, None, key, None),
    (None, None) => unreachable!("credential presence checked upstream"),
  };
  if let Err(e) = auth_result {
    return Err((
      ProbeErrorCode::SshAuthFailed,
      format!("authentication failed: {e}"),
    ));
  }
  if !session.authenticated() {
    return Err((
      ProbeErrorCode::SshAuthFailed,
      "authentication rejected".to_string(),
    ));
  }

  // Two read-only diagnostics; nothing here mutates the target.
  let banner = exec(&session, "uname -sr")?;
  let uptime = exec(&session, "uptime")?;

  Ok(serde_json::json!({
    "serverInfo": banner.trim(),
    "uptime": uptime.trim(),
  }))
}

fn exec(session: &Session, command: &str) -> Result<String, (ProbeErrorCode, String)> {
  let mut channel = session.channel_session().map_err(|e| {
    (
      ProbeErrorCode::SshConnectionFailed,
      format!("channel open failed: {e}"),
    )
  })?;
  channel.exec(command).map_err(|e| {
    (
      ProbeErrorCode::SshConnectionFailed,
      format!("exec '{command}' failed: {e}"),
    )
  })?;
  let mut output = String::new();
  channel.read_to_string(&mut output).map_err(|e| {
    (
      ProbeErrorCode::SshConnectionFailed,
      format!("read of '{command}' output failed: {e}"),
    )
  })?;
  let _ = channel.wait_close();
  Ok(output)
}
