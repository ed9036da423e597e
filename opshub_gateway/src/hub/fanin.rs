//! Bus fan-in: internal realtime topics feeding the hub.
//!
//! Routing precedence per frame: explicit session target, then explicit user
//! target, then resource rooms derived from the message type, then the
//! broadcast channels.

use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use opshub_core::events::{
  TOPIC_CHAT_RESPONSES, TOPIC_DEVICE_STATUS, TOPIC_METRICS_UPDATES, TOPIC_SYSTEM_ALERTS,
  TOPIC_WORKFLOW_UPDATES,
};
use opshub_core::{WsMessage, WsMessageType};

use super::Hub;
use crate::state::AppState;

const FANIN_TOPICS: &[&str] = &[
  TOPIC_WORKFLOW_UPDATES,
  TOPIC_METRICS_UPDATES,
  TOPIC_DEVICE_STATUS,
  TOPIC_CHAT_RESPONSES,
  TOPIC_SYSTEM_ALERTS,
];

const RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(30);

/// Subscribe to every fan-in topic and pump frames into the hub. Topics that
/// cannot be subscribed (bus degraded) are retried until they stick.
pub fn spawn_fanin(state: AppState) {
  for topic in FANIN_TOPICS {
    let state = state.clone();
    tokio::spawn(async move {
      loop {
        match state.bus.subscribe(topic).await {
          Ok(mut subscriber) => {
            info!(topic = %topic, "Fan-in subscription established");
            while let Some(message) = subscriber.next().await {
              match serde_json::from_slice::<WsMessage>(&message.payload) {
                Ok(frame) => {
                  route_frame(&state.hub, frame);
                }
                Err(e) => {
                  debug!(topic = %topic, "Discarding unparseable fan-in frame: {}", e);
                }
              }
            }
            warn!(topic = %topic, "Fan-in subscription ended; resubscribing");
          }
          Err(e) => {
            debug!(topic = %topic, "Fan-in subscribe failed ({}), retrying", e);
          }
        }
        tokio::time::sleep(RESUBSCRIBE_INTERVAL).await;
      }
    });
  }
}

/// Deliver one frame to its rooms; returns how many connections got it.
pub fn route_frame(hub: &Hub, frame: WsMessage) -> usize {
  if let Some(session_id) = frame.metadata.session_id.clone() {
    return hub.send_to_room(&format!("session:{session_id}"), &frame);
  }
  if let Some(user_id) = frame.metadata.user_id.clone() {
    return hub.send_to_user(&user_id, &frame);
  }

  match frame.message_type {
    WsMessageType::DeviceStatus => {
      let mut delivered = 0;
      if let Some(device_id) = frame.payload.get("deviceId").and_then(|v| v.as_str()) {
        delivered += hub.send_to_room(&format!("device:{device_id}"), &frame);
      }
      delivered + hub.send_to_room("devices", &frame)
    }
    WsMessageType::WorkflowProgress | WsMessageType::ExecutionUpdate => {
      match frame.payload.get("workflowId").and_then(|v| v.as_str()) {
        Some(workflow_id) => hub.send_to_room(&format!("workflow:{workflow_id}"), &frame),
        None => 0,
      }
    }
    WsMessageType::MetricUpdate => hub.send_to_room("metrics", &frame),
    // Untargeted alerts are global.
    WsMessageType::Alert => hub.broadcast(&frame),
    // Chat responses without a session target have nowhere sane to go.
    WsMessageType::ChatResponse => 0,
    _ => 0,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::hub::{ConnectionHandle, OutboundQueue};

  fn hub_with(conn: &str, user: &str, rooms: &[&str]) -> Hub {
    let hub = Hub::new();
    hub.register(ConnectionHandle {
      id: conn.into(),
      user_id: user.into(),
      queue: OutboundQueue::new(16),
    });
    for room in rooms {
      hub.join(conn, room);
    }
    hub
  }

  #[test]
  fn session_target_beats_everything() {
    let hub = hub_with("c-1", "u-1", &["session:c-1", "user:u-1"]);
    let frame = WsMessage::new(WsMessageType::ChatResponse, serde_json::json!({}))
      .with_session_id("c-1")
      .with_user_id("u-2");
    assert_eq!(route_frame(&hub, frame), 1);
  }

  #[test]
  fn user_target_reaches_the_user_room() {
    let hub = hub_with("c-1", "u-1", &["user:u-1"]);
    let frame =
      WsMessage::new(WsMessageType::ExecutionUpdate, serde_json::json!({})).with_user_id("u-1");
    assert_eq!(route_frame(&hub, frame), 1);
  }

  #[test]
  fn device_status_reaches_device_room_and_channel() {
    let hub = hub_with("c-1", "u-1", &["device:dev-9", "devices"]);
    let frame = WsMessage::new(
      WsMessageType::DeviceStatus,
      serde_json::json!({"deviceId": "dev-9"}),
    );
    // Same connection in both rooms: one delivery per room.
    assert_eq!(route_frame(&hub, frame), 2);
  }

  #[test]
  fn untargeted_chat_response_is_dropped() {
    let hub = hub_with("c-1", "u-1", &["user:u-1"]);
    let frame = WsMessage::new(WsMessageType::ChatResponse, serde_json::json!({}));
    assert_eq!(route_frame(&hub, frame), 0);
  }

  #[test]
  fn alerts_are_global() {
    let hub = hub_with("c-1", "u-1", &[]);
    let frame = WsMessage::new(WsMessageType::Alert, serde_json::json!({"level": "critical"}));
    assert_eq!(route_frame(&hub, frame), 1);
  }
}
