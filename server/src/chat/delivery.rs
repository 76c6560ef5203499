//! Message delivery tracking: `Sent → Delivered → Seen`.
//!
//! A message is always persisted before anything is pushed. `delivered` is
//! decided once, at send time, from whether the receiver has a live session;
//! reconnecting later never backfills it. `seen` only moves on an explicit
//! acknowledgement from the receiver.

use chrono::Utc;
use uuid::Uuid;

use crate::db::models::{Message, MessageFlags, MessageType};
use crate::db::run_blocking;
use crate::error::RealtimeError;
use crate::state::AppState;
use crate::ws::events::{MessageAck, MessageSeenRequest, SendMessageRequest, ServerEvent};

/// Maximum message content length (chars).
pub const MAX_CONTENT_LENGTH: usize = 4000;

fn non_empty(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

/// Validate a send request and build the record to persist.
fn build_message(sender_id: &str, req: SendMessageRequest) -> Result<Message, RealtimeError> {
    if req.sender_id != sender_id {
        return Err(RealtimeError::unauthorized(
            "senderID does not match the connected user",
        ));
    }
    let receiver_id = req.receiver_id.trim().to_string();
    if receiver_id.is_empty() {
        return Err(RealtimeError::invalid("receiverID is required"));
    }

    let content = non_empty(req.content);
    let media = non_empty(req.media);
    let shared_post_ref = req
        .shared_post_ref
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(RealtimeError::invalid("content too long"));
    }
    match req.message_type {
        MessageType::Post if shared_post_ref.is_none() => {
            return Err(RealtimeError::invalid("post messages require sharedPostRef"));
        }
        MessageType::Post => {}
        _ if content.is_empty() && media.is_empty() => {
            return Err(RealtimeError::invalid("content or media required"));
        }
        _ => {}
    }

    Ok(Message {
        id: Uuid::now_v7().to_string(),
        sender_id: sender_id.to_string(),
        receiver_id,
        content,
        media,
        message_type: req.message_type,
        // Only post shares carry a post reference
        shared_post_ref: if req.message_type == MessageType::Post {
            shared_post_ref
        } else {
            None
        },
        delivered: false,
        seen: false,
        reactions: Vec::new(),
        created_at: Utc::now(),
    })
}

/// Persist a new message and deliver it if the receiver is online.
///
/// Returns the stored record as it stands after the send.
pub async fn send_message(
    state: &AppState,
    sender_id: &str,
    req: SendMessageRequest,
) -> Result<Message, RealtimeError> {
    let message = build_message(sender_id, req)?;

    let record = message.clone();
    run_blocking(&state.store, move |store| store.save_message(&record)).await?;

    let Some(receiver) = state.connections.lookup(&message.receiver_id) else {
        tracing::debug!(
            message_id = %message.id,
            receiver_id = %message.receiver_id,
            "Receiver offline, message stored for later"
        );
        return Ok(message);
    };

    let id = message.id.clone();
    let delivered = run_blocking(&state.store, move |store| {
        store.update_message_flags(&id, MessageFlags::delivered())
    })
    .await?
    .ok_or(RealtimeError::NotFound("message"))?;

    if !receiver.push(ServerEvent::ReceiveMessage(delivered.clone())) {
        // Receiver went away mid-push; the record already says delivered
        tracing::debug!(message_id = %delivered.id, "Receiver closed during delivery");
    }
    state.connections.send_to_user(
        &delivered.sender_id,
        ServerEvent::MessageDelivered(MessageAck {
            message_id: delivered.id.clone(),
        }),
    );

    tracing::debug!(
        message_id = %delivered.id,
        sender_id = %delivered.sender_id,
        receiver_id = %delivered.receiver_id,
        "Message delivered"
    );
    Ok(delivered)
}

/// Apply the receiver's seen acknowledgement.
///
/// Repeated acks are no-ops. The sender hears `messageSeen` only on the first
/// transition.
pub async fn mark_seen(
    state: &AppState,
    acting_user: &str,
    req: MessageSeenRequest,
) -> Result<Message, RealtimeError> {
    let id = req.message_id.clone();
    let message = run_blocking(&state.store, move |store| store.load_message(&id))
        .await?
        .ok_or(RealtimeError::NotFound("message"))?;

    if message.receiver_id != acting_user {
        return Err(RealtimeError::unauthorized(
            "only the receiver can acknowledge a message",
        ));
    }
    if message.seen {
        return Ok(message);
    }

    let id = message.id.clone();
    let updated = run_blocking(&state.store, move |store| {
        store.update_message_flags(&id, MessageFlags::seen())
    })
    .await?
    .ok_or(RealtimeError::NotFound("message"))?;

    state.connections.send_to_user(
        &updated.sender_id,
        ServerEvent::MessageSeen(MessageAck {
            message_id: updated.id.clone(),
        }),
    );
    Ok(updated)
}

/// Full conversation between two users, oldest first. Never touches flags.
pub async fn conversation(
    state: &AppState,
    user_id: &str,
    other_id: &str,
) -> Result<Vec<Message>, RealtimeError> {
    let (a, b) = (user_id.to_string(), other_id.to_string());
    Ok(run_blocking(&state.store, move |store| store.load_conversation(&a, &b)).await?)
}

/// Newest message between two users, if any.
pub async fn last_message(
    state: &AppState,
    user_id: &str,
    other_id: &str,
) -> Result<Option<Message>, RealtimeError> {
    let (a, b) = (user_id.to_string(), other_id.to_string());
    Ok(run_blocking(&state.store, move |store| store.load_last_message(&a, &b)).await?)
}

/// Remove a message. Either participant may delete it.
pub async fn delete_message(
    state: &AppState,
    acting_user: &str,
    message_id: &str,
) -> Result<(), RealtimeError> {
    let id = message_id.to_string();
    let message = run_blocking(&state.store, move |store| store.load_message(&id))
        .await?
        .ok_or(RealtimeError::NotFound("message"))?;

    if message.sender_id != acting_user && message.receiver_id != acting_user {
        return Err(RealtimeError::unauthorized(
            "only conversation participants can delete a message",
        ));
    }

    let id = message.id.clone();
    if !run_blocking(&state.store, move |store| store.delete_message(&id)).await? {
        return Err(RealtimeError::NotFound("message"));
    }
    tracing::debug!(message_id = %message.id, user_id = %acting_user, "Message deleted");
    Ok(())
}
