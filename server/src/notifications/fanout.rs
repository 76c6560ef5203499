//! Notification creation, dedup and live push, plus the recipient-scoped
//! read/delete mutations.

use chrono::Utc;
use uuid::Uuid;

use crate::db::models::{Notification, NotificationFilter, NotificationType};
use crate::db::run_blocking;
use crate::error::RealtimeError;
use crate::state::AppState;
use crate::ws::events::ServerEvent;

/// A domain event that should notify someone.
#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub recipient_id: String,
    pub sender_id: String,
    pub kind: NotificationType,
    pub related_post_ref: Option<String>,
    pub text: String,
}

/// Create (or, for a repeated like, reuse) a notification and push it live.
///
/// Returns `None` for self-notifications, which are never stored.
pub async fn notify(
    state: &AppState,
    req: NotifyRequest,
) -> Result<Option<Notification>, RealtimeError> {
    let recipient_id = req.recipient_id.trim().to_string();
    if recipient_id.is_empty() {
        return Err(RealtimeError::invalid("recipientID is required"));
    }
    let text = req.text.trim().to_string();
    if text.is_empty() {
        return Err(RealtimeError::invalid("text is required"));
    }
    if recipient_id == req.sender_id {
        return Ok(None);
    }

    let related_post_ref = req.related_post_ref.filter(|p| !p.trim().is_empty());

    // Likes collapse onto one record per (recipient, sender, post)
    let dedup = (req.kind == NotificationType::Like).then(|| NotificationFilter {
        recipient_id: recipient_id.clone(),
        sender_id: req.sender_id.clone(),
        kind: NotificationType::Like,
        related_post_ref: related_post_ref.clone(),
    });

    let notification = Notification {
        id: Uuid::now_v7().to_string(),
        recipient_id,
        sender_id: req.sender_id,
        kind: req.kind,
        related_post_ref,
        text,
        is_read: false,
        created_at: Utc::now(),
    };

    let record = notification.clone();
    let existing = run_blocking(&state.store, move |store| match dedup {
        Some(filter) => store.save_notification_unless_duplicate(&record, &filter),
        None => store.save_notification(&record).map(|()| None),
    })
    .await?;
    if let Some(existing) = existing {
        tracing::debug!(
            notification_id = %existing.id,
            recipient_id = %existing.recipient_id,
            "Duplicate like notification suppressed"
        );
        return Ok(Some(existing));
    }

    let pushed = state.connections.send_to_user(
        &notification.recipient_id,
        ServerEvent::NewNotification(notification.clone()),
    );
    tracing::debug!(
        notification_id = %notification.id,
        recipient_id = %notification.recipient_id,
        kind = notification.kind.as_str(),
        pushed,
        "Notification created"
    );
    Ok(Some(notification))
}

/// Load a notification and check it belongs to `recipient_id`.
async fn owned_notification(
    state: &AppState,
    recipient_id: &str,
    id: &str,
) -> Result<Notification, RealtimeError> {
    let nid = id.to_string();
    let notification = run_blocking(&state.store, move |store| store.load_notification(&nid))
        .await?
        .ok_or(RealtimeError::NotFound("notification"))?;
    if notification.recipient_id != recipient_id {
        return Err(RealtimeError::unauthorized(
            "notification belongs to another user",
        ));
    }
    Ok(notification)
}

pub async fn mark_read(
    state: &AppState,
    recipient_id: &str,
    id: &str,
) -> Result<Notification, RealtimeError> {
    let mut notification = owned_notification(state, recipient_id, id).await?;
    let nid = notification.id.clone();
    run_blocking(&state.store, move |store| store.mark_notification_read(&nid)).await?;
    notification.is_read = true;
    Ok(notification)
}

pub async fn mark_all_read(state: &AppState, recipient_id: &str) -> Result<usize, RealtimeError> {
    let rid = recipient_id.to_string();
    Ok(run_blocking(&state.store, move |store| store.mark_all_read(&rid)).await?)
}

pub async fn delete(state: &AppState, recipient_id: &str, id: &str) -> Result<(), RealtimeError> {
    let notification = owned_notification(state, recipient_id, id).await?;
    let deleted =
        run_blocking(&state.store, move |store| store.delete_notification(&notification.id))
            .await?;
    if !deleted {
        // Raced with another delete
        return Err(RealtimeError::NotFound("notification"));
    }
    Ok(())
}

pub async fn delete_all(state: &AppState, recipient_id: &str) -> Result<usize, RealtimeError> {
    let rid = recipient_id.to_string();
    Ok(run_blocking(&state.store, move |store| store.delete_all_notifications(&rid)).await?)
}

pub async fn list(
    state: &AppState,
    recipient_id: &str,
    unread_only: bool,
) -> Result<Vec<Notification>, RealtimeError> {
    let rid = recipient_id.to_string();
    Ok(run_blocking(&state.store, move |store| {
        store.list_notifications(&rid, unread_only)
    })
    .await?)
}

pub async fn unread_count(state: &AppState, recipient_id: &str) -> Result<u64, RealtimeError> {
    let rid = recipient_id.to_string();
    Ok(run_blocking(&state.store, move |store| store.count_unread(&rid)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{connect, drain, test_state};

    fn request(kind: NotificationType, post: Option<&str>) -> NotifyRequest {
        NotifyRequest {
            recipient_id: "bob".to_string(),
            sender_id: "alice".to_string(),
            kind,
            related_post_ref: post.map(str::to_string),
            text: "alice interacted with your post".to_string(),
        }
    }

    #[tokio::test]
    async fn test_like_is_deduplicated() {
        let (state, _db) = test_state();
        let first = notify(&state, request(NotificationType::Like, Some("p1")))
            .await
            .unwrap()
            .unwrap();
        let second = notify(&state, request(NotificationType::Like, Some("p1")))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(list(&state, "bob", false).await.unwrap().len(), 1);

        // A different post is a different like
        notify(&state, request(NotificationType::Like, Some("p2")))
            .await
            .unwrap();
        assert_eq!(list(&state, "bob", false).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_likes_store_one_record() {
        let (state, _db) = test_state();
        let (_b, mut rx_b) = connect(&state, "bob");

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move {
                    notify(&state, request(NotificationType::Like, Some("p1")))
                        .await
                        .unwrap()
                        .unwrap()
                })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().id);
        }

        let stored = list(&state, "bob", false).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(ids.iter().all(|id| *id == stored[0].id));
        assert_eq!(drain(&mut rx_b).len(), 1, "only the created like is pushed");
    }

    #[tokio::test]
    async fn test_comments_always_create() {
        let (state, _db) = test_state();
        notify(&state, request(NotificationType::Comment, Some("p1")))
            .await
            .unwrap();
        notify(&state, request(NotificationType::Comment, Some("p1")))
            .await
            .unwrap();
        assert_eq!(list(&state, "bob", false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_self_notification_is_not_stored() {
        let (state, _db) = test_state();
        let mut req = request(NotificationType::Follow, None);
        req.recipient_id = "alice".to_string();
        assert!(notify(&state, req).await.unwrap().is_none());
        assert!(list(&state, "alice", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_online_recipient_gets_push_duplicate_does_not() {
        let (state, _db) = test_state();
        let (_b, mut rx_b) = connect(&state, "bob");

        let created = notify(&state, request(NotificationType::Like, Some("p1")))
            .await
            .unwrap()
            .unwrap();
        notify(&state, request(NotificationType::Like, Some("p1")))
            .await
            .unwrap();

        assert_eq!(drain(&mut rx_b), vec![ServerEvent::NewNotification(created)]);
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let (state, _db) = test_state();
        let mut no_text = request(NotificationType::Comment, None);
        no_text.text = " ".to_string();
        assert!(matches!(
            notify(&state, no_text).await,
            Err(RealtimeError::InvalidInput(_))
        ));

        let mut no_recipient = request(NotificationType::Comment, None);
        no_recipient.recipient_id = String::new();
        assert!(matches!(
            notify(&state, no_recipient).await,
            Err(RealtimeError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_mutations_are_scoped_to_recipient() {
        let (state, _db) = test_state();
        let created = notify(&state, request(NotificationType::Comment, None))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            mark_read(&state, "carol", &created.id).await,
            Err(RealtimeError::Unauthorized(_))
        ));
        assert!(matches!(
            delete(&state, "carol", &created.id).await,
            Err(RealtimeError::Unauthorized(_))
        ));
        assert!(matches!(
            mark_read(&state, "bob", "missing").await,
            Err(RealtimeError::NotFound(_))
        ));

        assert!(mark_read(&state, "bob", &created.id).await.unwrap().is_read);
        assert_eq!(unread_count(&state, "bob").await.unwrap(), 0);

        delete(&state, "bob", &created.id).await.unwrap();
        assert!(matches!(
            delete(&state, "bob", &created.id).await,
            Err(RealtimeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_bulk_operations() {
        let (state, _db) = test_state();
        for _ in 0..3 {
            notify(&state, request(NotificationType::Comment, None))
                .await
                .unwrap();
        }
        assert_eq!(unread_count(&state, "bob").await.unwrap(), 3);
        assert_eq!(mark_all_read(&state, "bob").await.unwrap(), 3);
        assert!(list(&state, "bob", true).await.unwrap().is_empty());
        assert_eq!(delete_all(&state, "bob").await.unwrap(), 3);
        assert_eq!(delete_all(&state, "bob").await.unwrap(), 0);
    }
}
