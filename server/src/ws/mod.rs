pub mod actor;
pub mod events;
pub mod handler;
pub mod protocol;

use axum::extract::ws::{CloseFrame, Message as WsMessage};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use events::{Outbound, ServerEvent};

/// Sender half of a connection's outbound channel.
pub type ConnectionSender = mpsc::UnboundedSender<Outbound>;

/// Close code sent to a connection replaced by a newer login of the same user.
pub const CLOSE_SUPERSEDED: u16 = 4000;

/// Handle to one live connection. Cloning is cheap; identity is the `id`,
/// never the user, so a stale handle can always be told apart from its
/// replacement.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    sender: ConnectionSender,
}

impl ConnectionHandle {
    /// Create a handle plus the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::now_v7(),
            connected_at: Utc::now(),
            sender: tx,
        };
        (handle, rx)
    }

    /// Queue an event. Returns false if the connection is already gone.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.sender.send(Outbound::Event(event)).is_ok()
    }

    /// Queue a raw control frame (ping, pong, close).
    pub fn send_frame(&self, frame: WsMessage) -> bool {
        self.sender.send(Outbound::Frame(frame)).is_ok()
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.send_frame(WsMessage::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })));
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Result of a registration.
#[derive(Debug)]
pub struct RegisterOutcome {
    /// True when the user was not online before, i.e. the presence set grew.
    pub joined: bool,
    /// Prior handle for the same user that this registration replaced.
    pub evicted: Option<ConnectionHandle>,
}

/// Connection registry: at most one live connection per user.
///
/// Backed by a DashMap so register/unregister/lookup from independent
/// connection tasks never need an outer lock. Lookups clone the handle out so
/// no shard guard is held while pushing.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: DashMap<String, ConnectionHandle>,
}

pub type ConnectionRegistry = Arc<Registry>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> ConnectionRegistry {
    Arc::new(Registry::default())
}

impl Registry {
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) -> RegisterOutcome {
        let handle_id = handle.id;
        let previous = self.sessions.insert(user_id.to_string(), handle);

        let outcome = match previous {
            None => RegisterOutcome {
                joined: true,
                evicted: None,
            },
            // Re-registering the same connection is not a replacement
            Some(prev) if prev.id == handle_id => RegisterOutcome {
                joined: false,
                evicted: None,
            },
            Some(prev) => RegisterOutcome {
                joined: false,
                evicted: Some(prev),
            },
        };

        tracing::debug!(
            user_id = %user_id,
            connection_id = %handle_id,
            joined = outcome.joined,
            replaced = outcome.evicted.is_some(),
            "Connection registered"
        );
        outcome
    }

    /// Remove the session only if it still points at `connection_id`.
    /// Returns whether anything was removed.
    pub fn unregister(&self, user_id: &str, connection_id: Uuid) -> bool {
        let removed = self
            .sessions
            .remove_if(user_id, |_, current| current.id == connection_id)
            .is_some();

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            removed,
            "Connection unregistered"
        );
        removed
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.sessions.get(user_id).map(|entry| entry.value().clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.sessions.contains_key(user_id)
    }

    /// Sorted snapshot of online user ids.
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Push an event to one user. Returns true if it was queued on a live
    /// connection; a dead handle counts as offline.
    pub fn send_to_user(&self, user_id: &str, event: ServerEvent) -> bool {
        match self.lookup(user_id) {
            Some(handle) => handle.push(event),
            None => false,
        }
    }

    /// Push an event to every live connection.
    pub fn broadcast(&self, event: &ServerEvent) {
        let handles: Vec<ConnectionHandle> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            let _ = handle.push(event.clone());
        }
    }
}
