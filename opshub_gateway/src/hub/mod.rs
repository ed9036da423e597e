//! Realtime hub: connection registry, rooms and fan-out.
//!
//! Per-connection state is owned by that connection's reader/writer loops;
//! every cross-connection operation goes through the bounded outbound queue,
//! never another connection's socket.

mod connection;
mod fanin;

pub use connection::ws_handler;
pub use fanin::spawn_fanin;

use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{info, warn};

use opshub_core::{Priority, WsMessage, WsMessageType};

pub const OUTBOUND_QUEUE_CAPACITY: usize = 1024;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
  Enqueued,
  /// Queue was full; the oldest low-priority frame was evicted to make room.
  DroppedLow,
  /// Queue full with nothing evictable: the connection is marked for
  /// disconnect.
  Overflow,
  Closed,
}

/// Bounded outbound queue. Overflow policy: evict the oldest low-priority
/// frame first; if none exists the connection is beyond saving and gets
/// closed.
pub struct OutboundQueue {
  inner: Mutex<VecDeque<WsMessage>>,
  notify: Notify,
  closed: AtomicBool,
  capacity: usize,
}

impl OutboundQueue {
  pub fn new(capacity: usize) -> Arc<Self> {
    Arc::new(Self {
      inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
      notify: Notify::new(),
      closed: AtomicBool::new(false),
      capacity,
    })
  }

  pub fn push(&self, message: WsMessage) -> PushOutcome {
    if self.closed.load(Ordering::Acquire) {
      return PushOutcome::Closed;
    }
    let outcome = {
      let mut queue = match self.inner.lock() {
        Ok(queue) => queue,
        Err(_) => return PushOutcome::Closed,
      };
      if queue.len() >= self.capacity {
        let low_idx = queue
          .iter()
          .position(|m| m.priority() == Priority::Low);
        match low_idx {
          Some(idx) => {
            queue.remove(idx);
            queue.push_back(message);
            PushOutcome::DroppedLow
          }
          None => {
            self.closed.store(true, Ordering::Release);
            PushOutcome::Overflow
          }
        }
      } else {
        queue.push_back(message);
        PushOutcome::Enqueued
      }
    };
    self.notify.notify_one();
    outcome
  }

  /// Wait for the next frame. `None` once the queue is closed and drained.
  pub async fn pop(&self) -> Option<WsMessage> {
    loop {
      let notified = self.notify.notified();
      {
        let mut queue = self.inner.lock().ok()?;
        if let Some(message) = queue.pop_front() {
          return Some(message);
        }
        if self.closed.load(Ordering::Acquire) {
          return None;
        }
      }
      notified.await;
    }
  }

  pub fn close(&self) {
    self.closed.store(true, Ordering::Release);
    self.notify.notify_one();
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.inner.lock().map(|q| q.len()).unwrap_or(0)
  }
}

#[derive(Clone)]
pub struct ConnectionHandle {
  pub id: String,
  pub user_id: String,
  pub queue: Arc<OutboundQueue>,
}

/// Connection registry and room index. Cloning shares the maps.
#[derive(Clone, Default)]
pub struct Hub {
  connections: Arc<DashMap<String, ConnectionHandle>>,
  rooms: Arc<DashMap<String, HashSet<String>>>,
  conn_rooms: Arc<DashMap<String, HashSet<String>>>,
}

impl Hub {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, handle: ConnectionHandle) {
    info!(connection = %handle.id, user = %handle.user_id, "Hub connection registered");
    self.connections.insert(handle.id.clone(), handle);
  }

  pub fn unregister(&self, connection_id: &str) {
    if let Some((_, handle)) = self.connections.remove(connection_id) {
      handle.queue.close();
    }
    if let Some((_, rooms)) = self.conn_rooms.remove(connection_id) {
      for room in rooms {
        if let Some(mut members) = self.rooms.get_mut(&room) {
          members.remove(connection_id);
        }
      }
    }
    info!(connection = %connection_id, "Hub connection released");
  }

  pub fn join(&self, connection_id: &str, room: &str) {
    self
      .rooms
      .entry(room.to_string())
      .or_default()
      .insert(connection_id.to_string());
    self
      .conn_rooms
      .entry(connection_id.to_string())
      .or_default()
      .insert(room.to_string());
  }

  pub fn leave(&self, connection_id: &str, room: &str) {
    if let Some(mut members) = self.rooms.get_mut(room) {
      members.remove(connection_id);
    }
    if let Some(mut rooms) = self.conn_rooms.get_mut(connection_id) {
      rooms.remove(room);
    }
  }

  /// Rooms a client may SUBSCRIBE to. `user:` and `session:` memberships are
  /// assigned by the server, never requested.
  pub fn is_subscribable(room: &str) -> bool {
    room.starts_with("device:")
      || room.starts_with("workflow:")
      || matches!(room, "alerts" | "metrics" | "devices")
  }

  pub fn send_to_room(&self, room: &str, message: &WsMessage) -> usize {
    let Some(members) = self.rooms.get(room) else {
      return 0;
    };
    let member_ids: Vec<String> = members.iter().cloned().collect();
    drop(members);

    let mut delivered = 0;
    for id in member_ids {
      if self.enqueue_to(&id, message.clone()) {
        delivered += 1;
      }
    }
    delivered
  }

  pub fn send_to_user(&self, user_id: &str, message: &WsMessage) -> usize {
    self.send_to_room(&format!("user:{user_id}"), message)
  }

  pub fn broadcast(&self, message: &WsMessage) -> usize {
    let ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
    let mut delivered = 0;
    for id in ids {
      if self.enqueue_to(&id, message.clone()) {
        delivered += 1;
      }
    }
    delivered
  }

  fn enqueue_to(&self, connection_id: &str, message: WsMessage) -> bool {
    let Some(handle) = self.connections.get(connection_id).map(|e| e.value().clone()) else {
      return false;
    };
    match handle.queue.push(message) {
      PushOutcome::Enqueued => true,
      PushOutcome::DroppedLow => {
        warn!(connection = %connection_id, "Outbound queue full; dropped a low-priority frame");
        true
      }
      PushOutcome::Overflow => {
        warn!(connection = %connection_id, "Outbound queue hard overflow; disconnecting");
        self.unregister(connection_id);
        false
      }
      PushOutcome::Closed => false,
    }
  }

  pub fn connection_count(&self) -> usize {
    self.connections.len()
  }

  /// Graceful shutdown: a final `connection_status` frame, then close every
  /// queue so the writer loops drain and hang up.
  pub fn close_all(&self) {
    let farewell = WsMessage::new(
      WsMessageType::ConnectionStatus,
      serde_json::json!({ "status": "disconnected" }),
    );
    self.broadcast(&farewell);
    for entry in self.connections.iter() {
      entry.value().queue.close();
    }
  }
}

/// Server heartbeat towards every connection, every 30 seconds.
pub fn spawn_heartbeat(hub: Hub) {
  tokio::spawn(async move {
    let mut interval =
      tokio::time::interval(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
      interval.tick().await;
      let message = WsMessage::new(
        WsMessageType::Heartbeat,
        serde_json::json!({
          "serverTime": chrono::Utc::now().to_rfc3339(),
          "activeConnections": hub.connection_count(),
          "systemStatus": "healthy",
        }),
      );
      hub.broadcast(&message);
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frame(priority: Priority) -> WsMessage {
    WsMessage::new(WsMessageType::Alert, serde_json::json!({})).with_priority(priority)
  }

  #[test]
  fn queue_evicts_oldest_low_priority_first() {
    let queue = OutboundQueue::new(2);
    assert_eq!(queue.push(frame(Priority::Low)), PushOutcome::Enqueued);
    assert_eq!(queue.push(frame(Priority::Normal)), PushOutcome::Enqueued);
    // Full: the low frame goes, the new one lands.
    assert_eq!(queue.push(frame(Priority::High)), PushOutcome::DroppedLow);
    assert_eq!(queue.len(), 2);
  }

  #[test]
  fn queue_hard_overflow_closes() {
    let queue = OutboundQueue::new(2);
    queue.push(frame(Priority::Normal));
    queue.push(frame(Priority::High));
    assert_eq!(queue.push(frame(Priority::Normal)), PushOutcome::Overflow);
    assert!(queue.is_closed());
    assert_eq!(queue.push(frame(Priority::Normal)), PushOutcome::Closed);
  }

  #[tokio::test]
  async fn pop_drains_then_ends_after_close() {
    let queue = OutboundQueue::new(8);
    queue.push(frame(Priority::Normal));
    queue.close();
    assert!(queue.pop().await.is_some());
    assert!(queue.pop().await.is_none());
  }

  #[test]
  fn subscribable_rooms_are_the_allowed_prefixes() {
    assert!(Hub::is_subscribable("device:dev-1"));
    assert!(Hub::is_subscribable("workflow:wf-9"));
    assert!(Hub::is_subscribable("alerts"));
    assert!(Hub::is_subscribable("metrics"));
    assert!(Hub::is_subscribable("devices"));
    assert!(!Hub::is_subscribable("user:u-1"));
    assert!(!Hub::is_subscribable("session:abc"));
    assert!(!Hub::is_subscribable("random"));
  }

  #[test]
  fn unregister_releases_room_memberships() {
    let hub = Hub::new();
    let queue = OutboundQueue::new(8);
    hub.register(ConnectionHandle {
      id: "c-1".into(),
      user_id: "u-1".into(),
      queue,
    });
    hub.join("c-1", "user:u-1");
    hub.join("c-1", "device:dev-1");
    assert_eq!(hub.send_to_room("device:dev-1", &frame(Priority::Normal)), 1);

    hub.unregister("c-1");
    assert_eq!(hub.send_to_room("device:dev-1", &frame(Priority::Normal)), 0);
    assert_eq!(hub.connection_count(), 0);
  }

  #[test]
  fn send_to_user_targets_the_user_room() {
    let hub = Hub::new();
    let queue = OutboundQueue::new(8);
    hub.register(ConnectionHandle {
      id: "c-1".into(),
      user_id: "u-7".into(),
      queue: queue.clone(),
    });
    hub.join("c-1", "user:u-7");
    assert_eq!(hub.send_to_user("u-7", &frame(Priority::Normal)), 1);
    assert_eq!(hub.send_to_user("someone-else", &frame(Priority::Normal)), 0);
    assert_eq!(queue.len(), 1);
  }
}
