//! Helpers shared by the unit tests.

use std::time::Duration;
use tokio::sync::mpsc;

use crate::db::{init_memory_db, DbPool, SqliteStore};
use crate::state::AppState;
use crate::ws::events::{Outbound, ServerEvent};
use crate::ws::ConnectionHandle;

pub const TEST_SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

/// State over a fresh in-memory database. The pool is returned so tests can
/// break the schema to simulate store failures.
pub fn test_state() -> (AppState, DbPool) {
    let db = init_memory_db().expect("in-memory db");
    let state = AppState::new(
        SqliteStore::shared(db.clone()),
        TEST_SECRET.to_vec(),
        Duration::from_secs(30),
    );
    (state, db)
}

/// Register `user_id` directly in the registry, bypassing presence broadcast.
pub fn connect(
    state: &AppState,
    user_id: &str,
) -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
    let (handle, rx) = ConnectionHandle::channel();
    state.connections.register(user_id, handle.clone());
    (handle, rx)
}

/// Everything queued so far, control frames skipped.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(out) = rx.try_recv() {
        if let Outbound::Event(event) = out {
            events.push(event);
        }
    }
    events
}
