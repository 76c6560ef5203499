//! Persistence contract consumed by the realtime core, plus its SQLite backing.
//!
//! Every method is synchronous. Async callers go through [`run_blocking`], which
//! moves the call onto the blocking pool so no store I/O ever runs on a
//! connection task or while registry state is borrowed.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use std::sync::Arc;

use super::models::{
    Message, MessageFlags, MessageType, Notification, NotificationFilter, NotificationType,
    Reaction, UserProfile,
};
use super::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("database lock poisoned")]
    LockPoisoned,
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Durable record operations. Implemented by [`SqliteStore`]; any other backend
/// (a document database, a remote service) plugs in behind the same trait.
pub trait Store: Send + Sync {
    fn save_message(&self, message: &Message) -> Result<(), StoreError>;
    fn load_message(&self, id: &str) -> Result<Option<Message>, StoreError>;
    /// Raise the given flags and return the updated record, or `None` if the id
    /// does not resolve.
    fn update_message_flags(
        &self,
        id: &str,
        flags: MessageFlags,
    ) -> Result<Option<Message>, StoreError>;
    fn save_reactions(&self, id: &str, reactions: &[Reaction]) -> Result<(), StoreError>;
    /// Load, replace `user_id`'s reaction and write back as one atomic step.
    /// Returns the updated record, or `None` if the id does not resolve.
    fn set_reaction(
        &self,
        id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Option<Message>, StoreError>;
    fn delete_message(&self, id: &str) -> Result<bool, StoreError>;
    /// All messages exchanged between two users, oldest first.
    fn load_conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>, StoreError>;
    fn load_last_message(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<Message>, StoreError>;

    fn save_notification(&self, notification: &Notification) -> Result<(), StoreError>;
    /// Insert `notification` unless a record matching `filter` exists, as one
    /// atomic step. Returns the existing record when nothing was inserted.
    fn save_notification_unless_duplicate(
        &self,
        notification: &Notification,
        filter: &NotificationFilter,
    ) -> Result<Option<Notification>, StoreError>;
    fn find_notification(
        &self,
        filter: &NotificationFilter,
    ) -> Result<Option<Notification>, StoreError>;
    fn load_notification(&self, id: &str) -> Result<Option<Notification>, StoreError>;
    /// Newest first.
    fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>, StoreError>;
    fn count_unread(&self, recipient_id: &str) -> Result<u64, StoreError>;
    fn mark_notification_read(&self, id: &str) -> Result<bool, StoreError>;
    fn mark_all_read(&self, recipient_id: &str) -> Result<usize, StoreError>;
    fn delete_notification(&self, id: &str) -> Result<bool, StoreError>;
    fn delete_all_notifications(&self, recipient_id: &str) -> Result<usize, StoreError>;

    fn find_user(&self, id: &str) -> Result<Option<UserProfile>, StoreError>;
    fn update_user_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn Store>;

/// Run a store call on the blocking pool.
pub async fn run_blocking<T, F>(store: &SharedStore, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&dyn Store) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

/// [`Store`] backed by the shared SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn shared(db: DbPool) -> SharedStore {
        Arc::new(Self::new(db))
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, media, message_type, \
     shared_post_ref, delivered, seen, reactions, created_at";

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, sender_id, kind, related_post_ref, text, is_read, created_at";

fn format_time(at: &DateTime<Utc>) -> String {
    // Fixed width so lexical order in SQL matches time order
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn bad_enum(idx: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown enum value '{}'", raw).into(),
    )
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let message_type: String = row.get(5)?;
    let reactions: String = row.get(9)?;
    let reactions: Vec<Reaction> = serde_json::from_str(&reactions)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

    Ok(Message {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        media: row.get(4)?,
        message_type: MessageType::from_str(&message_type)
            .ok_or_else(|| bad_enum(5, &message_type))?,
        shared_post_ref: row.get(6)?,
        delivered: row.get(7)?,
        seen: row.get(8)?,
        reactions,
        created_at: parse_time(10, row.get(10)?)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    let kind: String = row.get(3)?;
    Ok(Notification {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        sender_id: row.get(2)?,
        kind: NotificationType::from_str(&kind).ok_or_else(|| bad_enum(3, &kind))?,
        related_post_ref: row.get(4)?,
        text: row.get(5)?,
        is_read: row.get(6)?,
        created_at: parse_time(7, row.get(7)?)?,
    })
}

fn load_message_with(conn: &Connection, id: &str) -> Result<Option<Message>, StoreError> {
    let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
    Ok(conn
        .query_row(&sql, rusqlite::params![id], message_from_row)
        .optional()?)
}

fn insert_notification(conn: &Connection, notification: &Notification) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO notifications (id, recipient_id, sender_id, kind, related_post_ref,
                                    text, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            notification.id,
            notification.recipient_id,
            notification.sender_id,
            notification.kind.as_str(),
            notification.related_post_ref,
            notification.text,
            notification.is_read,
            format_time(&notification.created_at),
        ],
    )?;
    Ok(())
}

fn find_notification_with(
    conn: &Connection,
    filter: &NotificationFilter,
) -> Result<Option<Notification>, StoreError> {
    // IS instead of = so a NULL post reference matches NULL
    let sql = format!(
        "SELECT {} FROM notifications
         WHERE recipient_id = ?1 AND sender_id = ?2 AND kind = ?3 AND related_post_ref IS ?4
         ORDER BY created_at ASC LIMIT 1",
        NOTIFICATION_COLUMNS
    );
    Ok(conn
        .query_row(
            &sql,
            rusqlite::params![
                filter.recipient_id,
                filter.sender_id,
                filter.kind.as_str(),
                filter.related_post_ref,
            ],
            notification_from_row,
        )
        .optional()?)
}

impl Store for SqliteStore {
    fn save_message(&self, message: &Message) -> Result<(), StoreError> {
        let reactions = serde_json::to_string(&message.reactions)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content, media, message_type,
                                   shared_post_ref, delivered, seen, reactions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                message.id,
                message.sender_id,
                message.receiver_id,
                message.content,
                message.media,
                message.message_type.as_str(),
                message.shared_post_ref,
                message.delivered,
                message.seen,
                reactions,
                format_time(&message.created_at),
            ],
        )?;
        Ok(())
    }

    fn load_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let conn = self.conn()?;
        load_message_with(&conn, id)
    }

    fn update_message_flags(
        &self,
        id: &str,
        flags: MessageFlags,
    ) -> Result<Option<Message>, StoreError> {
        let conn = self.conn()?;
        // OR keeps both flags monotonic: a false argument never clears a true column
        let rows = conn.execute(
            "UPDATE messages SET delivered = (delivered OR ?2), seen = (seen OR ?3) WHERE id = ?1",
            rusqlite::params![id, flags.delivered, flags.seen],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        load_message_with(&conn, id)
    }

    fn save_reactions(&self, id: &str, reactions: &[Reaction]) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(reactions)?;
        let conn = self.conn()?;
        conn.execute(
            "UPDATE messages SET reactions = ?2 WHERE id = ?1",
            rusqlite::params![id, encoded],
        )?;
        Ok(())
    }

    fn set_reaction(
        &self,
        id: &str,
        user_id: &str,
        emoji: &str,
    ) -> Result<Option<Message>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let Some(mut message) = load_message_with(&tx, id)? else {
            return Ok(None);
        };
        message.set_reaction(user_id, emoji);
        let encoded = serde_json::to_string(&message.reactions)?;
        tx.execute(
            "UPDATE messages SET reactions = ?2 WHERE id = ?1",
            rusqlite::params![id, encoded],
        )?;
        tx.commit()?;
        Ok(Some(message))
    }

    fn delete_message(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM messages WHERE id = ?1", rusqlite::params![id])?;
        Ok(rows > 0)
    }

    fn load_conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at ASC, id ASC",
            MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(rusqlite::params![user_a, user_b], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    fn load_last_message(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<Message>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY created_at DESC, id DESC LIMIT 1",
            MESSAGE_COLUMNS
        );
        Ok(conn
            .query_row(&sql, rusqlite::params![user_a, user_b], message_from_row)
            .optional()?)
    }

    fn save_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let conn = self.conn()?;
        insert_notification(&conn, notification)
    }

    fn save_notification_unless_duplicate(
        &self,
        notification: &Notification,
        filter: &NotificationFilter,
    ) -> Result<Option<Notification>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if let Some(existing) = find_notification_with(&tx, filter)? {
            return Ok(Some(existing));
        }
        insert_notification(&tx, notification)?;
        tx.commit()?;
        Ok(None)
    }

    fn find_notification(
        &self,
        filter: &NotificationFilter,
    ) -> Result<Option<Notification>, StoreError> {
        let conn = self.conn()?;
        find_notification_with(&conn, filter)
    }

    fn load_notification(&self, id: &str) -> Result<Option<Notification>, StoreError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS);
        Ok(conn
            .query_row(&sql, rusqlite::params![id], notification_from_row)
            .optional()?)
    }

    fn list_notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>, StoreError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM notifications
             WHERE recipient_id = ?1 AND (?2 = 0 OR is_read = 0)
             ORDER BY created_at DESC, id DESC",
            NOTIFICATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let notifications = stmt
            .query_map(
                rusqlite::params![recipient_id, unread_only],
                notification_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(notifications)
    }

    fn count_unread(&self, recipient_id: &str) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
            rusqlite::params![recipient_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn mark_notification_read(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1",
            rusqlite::params![id],
        )?;
        Ok(rows > 0)
    }

    fn mark_all_read(&self, recipient_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1 AND is_read = 0",
            rusqlite::params![recipient_id],
        )?)
    }

    fn delete_notification(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM notifications WHERE id = ?1",
            rusqlite::params![id],
        )?;
        Ok(rows > 0)
    }

    fn delete_all_notifications(&self, recipient_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM notifications WHERE recipient_id = ?1",
            rusqlite::params![recipient_id],
        )?)
    }

    fn find_user(&self, id: &str) -> Result<Option<UserProfile>, StoreError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, username, profile_pic, last_seen_at FROM users WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    let last_seen: Option<String> = row.get(3)?;
                    Ok(UserProfile {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        profile_pic: row.get(2)?,
                        last_seen_at: last_seen.map(|raw| parse_time(3, raw)).transpose()?,
                    })
                },
            )
            .optional()?)
    }

    fn update_user_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, last_seen_at) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET last_seen_at = excluded.last_seen_at",
            rusqlite::params![id, format_time(&at)],
        )?;
        Ok(())
    }
}
