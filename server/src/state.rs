use std::sync::Arc;
use std::time::Duration;

use crate::db::SharedStore;
use crate::voice::calls::CallRegistry;
use crate::ws::{new_connection_registry, ConnectionRegistry};

/// Shared application state passed to all handlers via axum State extractor
/// and to every realtime component.
#[derive(Clone)]
pub struct AppState {
    /// Durable record store (SQLite in this binary)
    pub store: SharedStore,
    /// Live connection per user
    pub connections: ConnectionRegistry,
    /// Outstanding call invitations keyed by callee
    pub calls: Arc<CallRegistry>,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
}

impl AppState {
    pub fn new(store: SharedStore, jwt_secret: Vec<u8>, call_timeout: Duration) -> Self {
        Self {
            store,
            connections: new_connection_registry(),
            calls: Arc::new(CallRegistry::new(call_timeout)),
            jwt_secret,
        }
    }
}
