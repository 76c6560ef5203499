//! Emoji reactions on direct messages: one reaction per user per message.
//!
//! After every change the whole merged message is pushed to both parties, so
//! clients re-render counts from a complete list instead of merging deltas.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::db::models::Message;
use crate::db::run_blocking;
use crate::error::RealtimeError;
use crate::state::AppState;
use crate::ws::events::{ReactRequest, ServerEvent};

/// Maximum emoji length in bytes.
const MAX_EMOJI_LENGTH: usize = 64;

/// Set the acting user's reaction on a message and republish the message.
pub async fn react(
    state: &AppState,
    acting_user: &str,
    req: ReactRequest,
) -> Result<Message, RealtimeError> {
    if req.user_id != acting_user {
        return Err(RealtimeError::unauthorized(
            "userID does not match the connected user",
        ));
    }
    let emoji = req.emoji.trim().to_string();
    if emoji.is_empty() {
        return Err(RealtimeError::invalid("emoji is required"));
    }
    if emoji.len() > MAX_EMOJI_LENGTH {
        return Err(RealtimeError::invalid("emoji too long"));
    }

    let id = req.message_id.clone();
    let message = run_blocking(&state.store, move |store| store.load_message(&id))
        .await?
        .ok_or(RealtimeError::NotFound("message"))?;

    if message.sender_id != acting_user && message.receiver_id != acting_user {
        return Err(RealtimeError::unauthorized(
            "only conversation participants can react",
        ));
    }

    // Load, merge and write run under one store lock
    let (id, user_id, new_emoji) = (message.id, acting_user.to_string(), emoji.clone());
    let message = run_blocking(&state.store, move |store| {
        store.set_reaction(&id, &user_id, &new_emoji)
    })
    .await?
    .ok_or(RealtimeError::NotFound("message"))?;

    let event = ServerEvent::MessageReactionUpdated(message.clone());
    state
        .connections
        .send_to_user(&message.receiver_id, event.clone());
    if message.sender_id != message.receiver_id {
        state.connections.send_to_user(&message.sender_id, event);
    }

    tracing::debug!(
        message_id = %message.id,
        user_id = %acting_user,
        emoji = %emoji,
        reactions = message.reactions.len(),
        "Reaction updated"
    );
    Ok(message)
}

// --- REST endpoint handlers ---

#[derive(Debug, Deserialize)]
pub struct ReactBody {
    pub emoji: String,
}

/// PUT /api/messages/{message_id}/react
/// Same as the `reactToMessage` event, for clients acting over REST.
pub async fn react_rest(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Json(body): Json<ReactBody>,
) -> Result<Json<Message>, RealtimeError> {
    let req = ReactRequest {
        message_id,
        user_id: claims.sub.clone(),
        emoji: body.emoji,
    };
    Ok(Json(react(&state, &claims.sub, req).await?))
}
