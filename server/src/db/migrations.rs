use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Initial schema

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    username TEXT,
    profile_pic TEXT,
    last_seen_at TEXT
);

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    sender_id TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    media TEXT NOT NULL DEFAULT '',
    message_type TEXT NOT NULL DEFAULT 'text',
    shared_post_ref TEXT,
    delivered INTEGER NOT NULL DEFAULT 0,
    seen INTEGER NOT NULL DEFAULT 0,
    reactions TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE INDEX idx_messages_pair ON messages(sender_id, receiver_id, created_at);

CREATE TABLE notifications (
    id TEXT PRIMARY KEY,
    recipient_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    related_post_ref TEXT,
    text TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_notifications_recipient ON notifications(recipient_id, created_at);
CREATE INDEX idx_notifications_dedup ON notifications(recipient_id, sender_id, kind, related_post_ref);
",
        ),
        M::up(
            "-- Migration 2: At most one like per recipient, sender and post

CREATE UNIQUE INDEX idx_notifications_like_once
    ON notifications(recipient_id, sender_id, COALESCE(related_post_ref, ''))
    WHERE kind = 'like';
",
        ),
    ])
}
