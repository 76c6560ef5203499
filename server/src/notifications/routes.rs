//! REST endpoints for notifications. Everything is scoped to the caller.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db::models::{Notification, NotificationType};
use crate::error::RealtimeError;
use crate::notifications::fanout::{self, NotifyRequest};
use crate::state::AppState;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    #[serde(rename = "recipientID")]
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    #[serde(default)]
    pub related_post_ref: Option<String>,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}

#[derive(Debug, Serialize)]
pub struct AffectedResponse {
    pub affected: usize,
}

// --- Handlers ---

/// POST /api/notifications
/// Raise a notification from the caller to `recipientID`.
/// 201 with the record, or 204 when suppressed as a self-notification.
pub async fn create_notification(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateNotificationRequest>,
) -> Result<Response, RealtimeError> {
    let created = fanout::notify(
        &state,
        NotifyRequest {
            recipient_id: body.recipient_id,
            sender_id: claims.sub,
            kind: body.kind,
            related_post_ref: body.related_post_ref,
            text: body.text,
        },
    )
    .await?;

    Ok(match created {
        Some(notification) => (StatusCode::CREATED, Json(notification)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// GET /api/notifications
/// Newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<NotificationListResponse>, RealtimeError> {
    let notifications = fanout::list(&state, &claims.sub, false).await?;
    Ok(Json(NotificationListResponse { notifications }))
}

/// GET /api/notifications/unread
pub async fn list_unread(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<NotificationListResponse>, RealtimeError> {
    let notifications = fanout::list(&state, &claims.sub, true).await?;
    Ok(Json(NotificationListResponse { notifications }))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UnreadCountResponse>, RealtimeError> {
    let unread_count = fanout::unread_count(&state, &claims.sub).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

/// PUT /api/notifications/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<Notification>, RealtimeError> {
    Ok(Json(fanout::mark_read(&state, &claims.sub, &id).await?))
}

/// PUT /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<AffectedResponse>, RealtimeError> {
    let affected = fanout::mark_all_read(&state, &claims.sub).await?;
    Ok(Json(AffectedResponse { affected }))
}

/// DELETE /api/notifications/{id}
pub async fn delete_notification(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<StatusCode, RealtimeError> {
    fanout::delete(&state, &claims.sub, &id).await?;
    Ok(StatusCode::OK)
}

/// DELETE /api/notifications
pub async fn delete_all(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<AffectedResponse>, RealtimeError> {
    let affected = fanout::delete_all(&state, &claims.sub).await?;
    Ok(Json(AffectedResponse { affected }))
}
