//! Fan-out of state changes to live subscribers. The manager owns the
//! connection set; sends happen outside the lock so a blocking subscriber
//! can never deadlock the rest.

pub mod commands;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    events::{Event, EventPayload},
    pomodoro::PomodoroStatus,
    storage::entities::ActivitySessionEntity,
    tracker::TrackerStatus,
};

/// One live duplex channel to a subscriber. Implementations are transport
/// specific; the manager only ever sends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriberConnection: Send + Sync + 'static {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}

pub type ConnectionId = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowInfoData {
    pub active_app: Option<Arc<str>>,
    pub window_title: Option<Arc<str>>,
}

/// Everything the daemon ever writes to a subscriber, discriminated by a
/// flat `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    InitialStatus {
        timestamp: DateTime<Utc>,
        focus: TrackerStatus,
        pomodoro: PomodoroStatus,
    },
    StatusUpdate {
        timestamp: DateTime<Utc>,
        focus: TrackerStatus,
        pomodoro: PomodoroStatus,
    },
    FocusUpdate {
        timestamp: DateTime<Utc>,
        data: TrackerStatus,
    },
    WindowChanged {
        timestamp: DateTime<Utc>,
        data: WindowInfoData,
    },
    ActivityLogged {
        timestamp: DateTime<Utc>,
        data: ActivitySessionEntity,
    },
    PomodoroUpdate {
        timestamp: DateTime<Utc>,
        data: PomodoroStatus,
    },
    CommandResponse {
        command: String,
        success: bool,
        message: String,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl OutboundMessage {
    /// Wire form of a bus event. Every pomodoro event kind collapses into
    /// the one `pomodoro_update` message subscribers know.
    pub fn from_event(event: &Event) -> OutboundMessage {
        let timestamp = event.timestamp;
        match &event.payload {
            EventPayload::FocusStatusChanged(status) => OutboundMessage::FocusUpdate {
                timestamp,
                data: status.clone(),
            },
            EventPayload::WindowChanged { app, title } => OutboundMessage::WindowChanged {
                timestamp,
                data: WindowInfoData {
                    active_app: app.clone(),
                    window_title: title.clone(),
                },
            },
            EventPayload::ActivityLogged(session) => OutboundMessage::ActivityLogged {
                timestamp,
                data: session.clone(),
            },
            EventPayload::PomodoroStarted(status)
            | EventPayload::PomodoroPaused(status)
            | EventPayload::PomodoroCompleted(status)
            | EventPayload::PomodoroPhaseChanged(status)
            | EventPayload::PomodoroTick(status) => OutboundMessage::PomodoroUpdate {
                timestamp,
                data: status.clone(),
            },
        }
    }
}

/// Connection registry with safe concurrent fan-out.
pub struct BroadcastManager {
    connections: Mutex<HashMap<ConnectionId, Arc<dyn SubscriberConnection>>>,
    next_id: AtomicU64,
}

impl Default for BroadcastManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastManager {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn connect(&self, connection: Arc<dyn SubscriberConnection>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut connections = self.connections.lock().await;
        connections.insert(id, connection);
        info!("Subscriber {id} connected. Total connections: {}", connections.len());
        id
    }

    /// Idempotent; disconnecting an unknown id does nothing.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut connections = self.connections.lock().await;
        if connections.remove(&id).is_some() {
            info!("Subscriber {id} disconnected. Total connections: {}", connections.len());
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Sends to every live connection. The set is snapshotted under the
    /// lock and the sends happen outside it, so a subscriber that blocks or
    /// re-enters disconnect can't wedge the manager. Connections whose send
    /// fails are removed in a second locked pass.
    pub async fn broadcast(&self, message: &OutboundMessage) {
        let snapshot = {
            let connections = self.connections.lock().await;
            if connections.is_empty() {
                return;
            }
            connections
                .iter()
                .map(|(id, connection)| (*id, connection.clone()))
                .collect::<Vec<_>>()
        };

        let mut failed = Vec::new();
        for (id, connection) in snapshot {
            if let Err(e) = connection.send(message).await {
                warn!("Broadcast to subscriber {id} failed: {e:?}");
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut connections = self.connections.lock().await;
            for id in &failed {
                connections.remove(id);
            }
            info!(
                "Removed {} dead subscribers. Active: {}",
                failed.len(),
                connections.len()
            );
        }
    }

    /// Direct send to one subscriber; a failed send disconnects it.
    pub async fn send_to_one(&self, id: ConnectionId, message: &OutboundMessage) -> bool {
        let connection = self.connections.lock().await.get(&id).cloned();
        let Some(connection) = connection else {
            debug!("Dropping message for unknown subscriber {id}");
            return false;
        };

        match connection.send(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Send to subscriber {id} failed: {e:?}");
                self.disconnect(id).await;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use chrono::TimeZone;

    use super::*;

    fn error_message() -> OutboundMessage {
        OutboundMessage::Error {
            message: "test".into(),
        }
    }

    fn ok_connection(times: usize) -> MockSubscriberConnection {
        let mut connection = MockSubscriberConnection::new();
        connection.expect_send().times(times).returning(|_| Ok(()));
        connection
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_set_is_noop() {
        let manager = BroadcastManager::new();
        manager.broadcast(&error_message()).await;
        assert_eq!(manager.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let manager = BroadcastManager::new();
        manager.connect(Arc::new(ok_connection(1))).await;
        manager.connect(Arc::new(ok_connection(1))).await;

        manager.broadcast(&error_message()).await;
        assert_eq!(manager.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_failing_connection_is_pruned() {
        let manager = BroadcastManager::new();
        let mut broken = MockSubscriberConnection::new();
        broken.expect_send().returning(|_| Err(anyhow!("gone")));
        manager.connect(Arc::new(broken)).await;
        manager.connect(Arc::new(ok_connection(2))).await;

        manager.broadcast(&error_message()).await;
        assert_eq!(manager.connection_count().await, 1);

        // The healthy connection keeps receiving.
        manager.broadcast(&error_message()).await;
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let manager = BroadcastManager::new();
        let id = manager.connect(Arc::new(ok_connection(0))).await;
        manager.disconnect(id).await;
        manager.disconnect(id).await;
        manager.disconnect(9999).await;
        assert_eq!(manager.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_to_one_disconnects_on_failure() {
        let manager = BroadcastManager::new();
        let mut broken = MockSubscriberConnection::new();
        broken.expect_send().returning(|_| Err(anyhow!("gone")));
        let id = manager.connect(Arc::new(broken)).await;

        assert!(!manager.send_to_one(id, &error_message()).await);
        assert_eq!(manager.connection_count().await, 0);
        assert!(!manager.send_to_one(id, &error_message()).await);
    }

    #[test]
    fn test_messages_carry_flat_type_discriminator() {
        let timestamp = Utc.with_ymd_and_hms(2018, 7, 4, 9, 0, 0).unwrap();
        let value = serde_json::to_value(OutboundMessage::Pong { timestamp }).unwrap();
        assert_eq!(value["type"], "pong");

        let value = serde_json::to_value(OutboundMessage::CommandResponse {
            command: "ping".into(),
            success: true,
            message: "ok".into(),
        })
        .unwrap();
        assert_eq!(value["type"], "command_response");
        assert_eq!(value["success"], true);
    }
}
