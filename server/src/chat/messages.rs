//! REST endpoints over the durable message record.
//! Fetching is read-only: it never advances delivered/seen.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::chat::delivery;
use crate::db::models::Message;
use crate::error::RealtimeError;
use crate::state::AppState;
use crate::ws::events::SendMessageRequest;

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageResponse {
    pub last_message: Option<Message>,
}

/// POST /api/messages
/// Same as the `sendMessage` event. `senderID` may be omitted; it defaults to
/// the caller.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(mut body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), RealtimeError> {
    if body.sender_id.is_empty() {
        body.sender_id = claims.sub.clone();
    }
    let message = delivery::send_message(&state, &claims.sub, body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /api/messages/conversation/{user_id}
/// Both directions between the caller and `user_id`, oldest first.
pub async fn get_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Path(other_id): Path<String>,
) -> Result<Json<ConversationResponse>, RealtimeError> {
    let messages = delivery::conversation(&state, &claims.sub, &other_id).await?;
    Ok(Json(ConversationResponse { messages }))
}

/// GET /api/messages/last/{user_id}
/// Most recent message exchanged with `user_id`, if any.
pub async fn get_last_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(other_id): Path<String>,
) -> Result<Json<LastMessageResponse>, RealtimeError> {
    let last_message = delivery::last_message(&state, &claims.sub, &other_id).await?;
    Ok(Json(LastMessageResponse { last_message }))
}

/// DELETE /api/messages/{message_id}
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
) -> Result<StatusCode, RealtimeError> {
    delivery::delete_message(&state, &claims.sub, &message_id).await?;
    Ok(StatusCode::OK)
}
