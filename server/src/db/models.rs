//! Record types owned by the store.
//! Serialized field names are the wire names the UI layer consumes.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of payload a direct message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    File,
    Post,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
            Self::Post => "post",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "file" => Some(Self::File),
            "post" => Some(Self::Post),
            _ => None,
        }
    }
}

/// One user's reaction on a message. At most one per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub emoji: String,
}

/// Direct message between two users (messages table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(rename = "senderID")]
    pub sender_id: String,
    #[serde(rename = "receiverID")]
    pub receiver_id: String,
    pub content: String,
    pub media: String,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_post_ref: Option<String>,
    pub delivered: bool,
    pub seen: bool,
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Replace `user_id`'s reaction (if any) with `emoji`. Latest wins.
    pub fn set_reaction(&mut self, user_id: &str, emoji: &str) {
        self.reactions.retain(|r| r.user_id != user_id);
        self.reactions.push(Reaction {
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
        });
    }
}

/// Flags to raise on a message. A `false` field leaves the stored value alone,
/// so an update can never move a message backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    pub delivered: bool,
    pub seen: bool,
}

impl MessageFlags {
    pub fn delivered() -> Self {
        Self {
            delivered: true,
            seen: false,
        }
    }

    /// Seen implies delivered.
    pub fn seen() -> Self {
        Self {
            delivered: true,
            seen: true,
        }
    }
}

/// Domain event a notification was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Like,
    Comment,
    Share,
    Follow,
    Message,
    Mention,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Comment => "comment",
            Self::Share => "share",
            Self::Follow => "follow",
            Self::Message => "message",
            Self::Mention => "mention",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "comment" => Some(Self::Comment),
            "share" => Some(Self::Share),
            "follow" => Some(Self::Follow),
            "message" => Some(Self::Message),
            "mention" => Some(Self::Mention),
            _ => None,
        }
    }
}

/// Notification record (notifications table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "recipientID")]
    pub recipient_id: String,
    #[serde(rename = "senderID")]
    pub sender_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub related_post_ref: Option<String>,
    pub text: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Exact-match lookup used by the like dedup policy.
/// `related_post_ref = None` matches rows with no post reference.
#[derive(Debug, Clone)]
pub struct NotificationFilter {
    pub recipient_id: String,
    pub sender_id: String,
    pub kind: NotificationType,
    pub related_post_ref: Option<String>,
}

/// Profile fields this server reads from the user store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: Option<String>,
    pub profile_pic: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
}
