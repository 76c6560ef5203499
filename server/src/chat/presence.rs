//! Presence tracking and broadcast.
//!
//! The online set is never stored separately: it is read from the connection
//! registry and pushed in full (not as a diff) to every live connection when
//! membership changes.

use axum::{extract::State, Json};
use chrono::Utc;

use crate::auth::middleware::Claims;
use crate::db::run_blocking;
use crate::state::AppState;
use crate::ws::events::{LastSeenUpdate, ServerEvent};
use crate::ws::{ConnectionHandle, ConnectionRegistry, CLOSE_SUPERSEDED};

/// Broadcast the current online set to every live connection.
pub fn broadcast_online_users(registry: &ConnectionRegistry) {
    let users = registry.online_users();
    tracing::debug!(online = users.len(), "Broadcasting online users");
    registry.broadcast(&ServerEvent::OnlineUsers(users));
}

/// Register a connection for `user_id` and publish the change.
///
/// A replaced connection is closed so it cannot linger receiving nothing.
/// When membership did not change only the new connection gets a snapshot.
pub fn join(state: &AppState, user_id: &str, handle: &ConnectionHandle) {
    let outcome = state.connections.register(user_id, handle.clone());

    if let Some(evicted) = outcome.evicted {
        tracing::info!(
            user_id = %user_id,
            old_connection = %evicted.id,
            new_connection = %handle.id,
            "Closing superseded connection"
        );
        evicted.close(CLOSE_SUPERSEDED, "Superseded by a newer connection");
    }

    if outcome.joined {
        broadcast_online_users(&state.connections);
    } else {
        handle.push(ServerEvent::OnlineUsers(state.connections.online_users()));
    }
}

/// Tear down the session for a closing connection.
///
/// Does nothing if the registry already points at a newer connection for the
/// user. Otherwise: broadcast the online set, persist last-seen, then announce
/// it. Returns whether the session was removed.
pub async fn leave(state: &AppState, user_id: &str, handle: &ConnectionHandle) -> bool {
    if !state.connections.unregister(user_id, handle.id) {
        tracing::debug!(
            user_id = %user_id,
            connection_id = %handle.id,
            "Stale disconnect ignored"
        );
        return false;
    }

    broadcast_online_users(&state.connections);

    let last_seen_at = Utc::now();
    let uid = user_id.to_string();
    if let Err(e) = run_blocking(&state.store, move |store| {
        store.update_user_last_seen(&uid, last_seen_at)
    })
    .await
    {
        tracing::warn!(user_id = %user_id, error = %e, "Failed to persist last seen");
    }

    state
        .connections
        .broadcast(&ServerEvent::LastSeenUpdate(LastSeenUpdate {
            user_id: user_id.to_string(),
            last_seen_at,
        }));
    true
}

// --- REST endpoint handlers ---

/// GET /api/presence
/// Currently online user ids. JWT auth required.
pub async fn get_presence(State(state): State<AppState>, _claims: Claims) -> Json<Vec<String>> {
    Json(state.connections.online_users())
}
