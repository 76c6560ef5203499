//! Typing indicators: best-effort pass-through, nothing stored.
//!
//! Clients send `stopTyping` after their own inactivity timeout, so the server
//! keeps no timers here.

use crate::ws::events::{ServerEvent, TypingRequest, TypingStatus};
use crate::ws::ConnectionRegistry;

/// Forward a typing signal. Returns whether it reached a live connection.
pub fn relay_typing(
    registry: &ConnectionRegistry,
    acting_user: &str,
    req: &TypingRequest,
    is_typing: bool,
) -> bool {
    if req.from_user_id != acting_user {
        tracing::debug!(
            user_id = %acting_user,
            claimed = %req.from_user_id,
            "Dropping typing signal with mismatched sender"
        );
        return false;
    }
    registry.send_to_user(
        &req.to_user_id,
        ServerEvent::TypingStatus(TypingStatus {
            from_user_id: req.from_user_id.clone(),
            is_typing,
        }),
    )
}
