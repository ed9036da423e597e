//! One WebSocket connection: handshake auth, reader/writer loop pair.

use axum::{
  extract::{
    ws::{Message, WebSocket, WebSocketUpgrade},
    State,
  },
  http::HeaderMap,
  response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use opshub_core::middlewares::TokenVerifier;
use opshub_core::{CoreError, Principal, WsMessage, WsMessageType};

use super::{ConnectionHandle, Hub, OutboundQueue, OUTBOUND_QUEUE_CAPACITY};
use crate::state::AppState;

const READ_TIMEOUT: Duration = Duration::from_secs(60);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const FIRST_FRAME_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
  Auth { token: String },
  Subscribe { rooms: Vec<String> },
  Unsubscribe { rooms: Vec<String> },
  Ping,
}

/// `GET /ws`. The credential arrives either as a bearer header, via the
/// `Sec-WebSocket-Protocol` slot, or as a first `{"type":"auth"}` frame.
/// Header auth failures reject before the upgrade is accepted.
pub async fn ws_handler(
  ws: WebSocketUpgrade,
  State(state): State<AppState>,
  headers: HeaderMap,
) -> Response {
  let principal = match handshake_token(&headers) {
    Some(token) => match state.verify_access_token(&token) {
      Ok(principal) => Some(principal),
      Err(e) => return e.into_response(),
    },
    None => None,
  };

  ws.on_upgrade(move |socket| handle_socket(socket, state, principal))
}

fn handshake_token(headers: &HeaderMap) -> Option<String> {
  if let Some(value) = headers
    .get("authorization")
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
  {
    return Some(value.to_string());
  }
  // Browsers cannot set Authorization on WebSocket upgrades; the token rides
  // in the subprotocol list as `access_token, <credential>`.
  headers
    .get("sec-websocket-protocol")
    .and_then(|v| v.to_str().ok())
    .and_then(|v| {
      let mut parts = v.split(',').map(str::trim);
      match (parts.next(), parts.next()) {
        (Some("access_token"), Some(token)) => Some(token.to_string()),
        (Some(token), None) if !token.is_empty() => Some(token.to_string()),
        _ => None,
      }
    })
}

async fn handle_socket(mut socket: WebSocket, state: AppState, principal: Option<Principal>) {
  // First-frame auth path for clients that could not set a header.
  let principal = match principal {
    Some(principal) => principal,
    None => match first_frame_auth(&mut socket, &state).await {
      Some(principal) => principal,
      None => {
        let _ = socket.close().await;
        return;
      }
    },
  };

  let connection_id = Uuid::new_v4().to_string();
  let queue = OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY);
  let handle = ConnectionHandle {
    id: connection_id.clone(),
    user_id: principal.id.clone(),
    queue: queue.clone(),
  };

  let hub = state.hub.clone();
  hub.register(handle);
  hub.join(&connection_id, &format!("user:{}", principal.id));
  hub.join(&connection_id, &format!("session:{connection_id}"));

  let hello = WsMessage::new(
    WsMessageType::ConnectionStatus,
    serde_json::json!({
      "status": "connected",
      "sessionId": connection_id,
      "serverTime": chrono::Utc::now().to_rfc3339(),
    }),
  )
  .with_session_id(connection_id.clone());
  queue.push(hello);

  let (mut sender, mut receiver) = socket.split();

  // Writer loop: owns the socket sink; everything reaches it via the queue.
  let writer_queue = queue.clone();
  let writer = tokio::spawn(async move {
    while let Some(message) = writer_queue.pop().await {
      let text = match serde_json::to_string(&message) {
        Ok(text) => text,
        Err(e) => {
          warn!("Failed to serialize outbound frame: {}", e);
          continue;
        }
      };
      let send = tokio::time::timeout(WRITE_TIMEOUT, sender.send(Message::Text(text.into())));
      match send.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
          debug!("WebSocket send failed: {}", e);
          break;
        }
        Err(_) => {
          warn!("WebSocket write timed out");
          break;
        }
      }
    }
    let _ = sender.close().await;
  });

  // Reader loop: subscriptions and pings, with an idle timeout.
  loop {
    let frame = match tokio::time::timeout(READ_TIMEOUT, receiver.next()).await {
      Ok(Some(Ok(frame))) => frame,
      Ok(Some(Err(e))) => {
        debug!(connection = %connection_id, "WebSocket receive error: {}", e);
        break;
      }
      Ok(None) => break,
      Err(_) => {
        info!(connection = %connection_id, "WebSocket idle past read timeout");
        break;
      }
    };

    match frame {
      Message::Text(text) => {
        let Ok(client_frame) = serde_json::from_str::<ClientFrame>(&text) else {
          debug!(connection = %connection_id, "Ignoring unparseable client frame");
          continue;
        };
        match client_frame {
          ClientFrame::Ping => {
            queue.push(WsMessage::new(WsMessageType::Pong, serde_json::json!({})));
          }
          ClientFrame::Subscribe { rooms } => {
            for room in rooms {
              if Hub::is_subscribable(&room) {
                hub.join(&connection_id, &room);
              } else {
                debug!(connection = %connection_id, room = %room, "Subscription refused");
              }
            }
          }
          ClientFrame::Unsubscribe { rooms } => {
            for room in rooms {
              hub.leave(&connection_id, &room);
            }
          }
          // Already authenticated; a second auth frame is a no-op.
          ClientFrame::Auth { .. } => {}
        }
      }
      Message::Close(_) => break,
      Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
    }
  }

  hub.unregister(&connection_id);
  queue.close();
  writer.abort();
}

async fn first_frame_auth(socket: &mut WebSocket, state: &AppState) -> Option<Principal> {
  let frame = tokio::time::timeout(FIRST_FRAME_AUTH_TIMEOUT, socket.recv())
    .await
    .ok()??
    .ok()?;
  let Message::Text(text) = frame else {
    return None;
  };
  let Ok(ClientFrame::Auth { token }) = serde_json::from_str::<ClientFrame>(&text) else {
    warn!("First WebSocket frame was not an auth frame");
    return None;
  };
  match state.verify_access_token(&token) {
    Ok(principal) => Some(principal),
    Err(CoreError::Authentication { .. }) => {
      warn!("WebSocket first-frame auth rejected");
      None
    }
    Err(e) => {
      warn!("WebSocket auth failed: {}", e);
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::HeaderValue;

  #[test]
  fn bearer_header_wins() {
    let mut headers = HeaderMap::new();
    headers.insert("authorization", HeaderValue::from_static("Bearer tok-1"));
    assert_eq!(handshake_token(&headers).as_deref(), Some("tok-1"));
  }

  #[test]
  fn subprotocol_carries_the_token() {
    let mut headers = HeaderMap::new();
    headers.insert(
      "sec-websocket-protocol",
      HeaderValue::from_static("access_token, tok-2"),
    );
    assert_eq!(handshake_token(&headers).as_deref(), Some("tok-2"));

    let mut bare = HeaderMap::new();
    bare.insert("sec-websocket-protocol", HeaderValue::from_static("tok-3"));
    assert_eq!(handshake_token(&bare).as_deref(), Some("tok-3"));
  }

  #[test]
  fn no_token_defers_to_first_frame() {
    assert!(handshake_token(&HeaderMap::new()).is_none());
  }
}
