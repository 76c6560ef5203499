//! JSON wire protocol: every frame is `{"event": <name>, "data": <payload>}`.

use axum::extract::ws::Message as WsMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::{Message, MessageType, Notification};

// --- Inbound ---

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Join(String),
    SendMessage(SendMessageRequest),
    MessageSeen(MessageSeenRequest),
    ReactToMessage(ReactRequest),
    Typing(TypingRequest),
    StopTyping(TypingRequest),
    CallInvite(CallInviteRequest),
    CallAccept(CallResponseRequest),
    CallReject(CallResponseRequest),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::SendMessage(_) => "sendMessage",
            Self::MessageSeen(_) => "messageSeen",
            Self::ReactToMessage(_) => "reactToMessage",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stopTyping",
            Self::CallInvite(_) => "callInvite",
            Self::CallAccept(_) => "callAccept",
            Self::CallReject(_) => "callReject",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(rename = "senderID", default)]
    pub sender_id: String,
    #[serde(rename = "receiverID", default)]
    pub receiver_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub shared_post_ref: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageSeenRequest {
    #[serde(rename = "messageID")]
    pub message_id: String,
    /// Informational; the seen ack is always routed to the stored sender.
    #[serde(rename = "receiverID", default)]
    pub receiver_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactRequest {
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(default)]
    pub emoji: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypingRequest {
    #[serde(rename = "fromUserID")]
    pub from_user_id: String,
    #[serde(rename = "toUserID")]
    pub to_user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Voice,
    Video,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInviteRequest {
    #[serde(rename = "callerID")]
    pub caller_id: String,
    #[serde(rename = "calleeID")]
    pub callee_id: String,
    pub call_kind: CallKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallResponseRequest {
    #[serde(rename = "callerID")]
    pub caller_id: String,
    #[serde(rename = "calleeID")]
    pub callee_id: String,
}

// --- Outbound ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    OnlineUsers(Vec<String>),
    ReceiveMessage(Message),
    MessageDelivered(MessageAck),
    MessageSeen(MessageAck),
    MessageReactionUpdated(Message),
    NewNotification(Notification),
    TypingStatus(TypingStatus),
    IncomingCall(IncomingCall),
    CallAccepted(CallAccepted),
    CallRejected(CallRejected),
    CallFailed(CallFailed),
    LastSeenUpdate(LastSeenUpdate),
    Error(ErrorEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAck {
    #[serde(rename = "messageID")]
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    #[serde(rename = "fromUserID")]
    pub from_user_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingCall {
    #[serde(rename = "callerID")]
    pub caller_id: String,
    pub caller_name: Option<String>,
    pub caller_profile_pic: Option<String>,
    pub call_kind: CallKind,
    #[serde(rename = "roomID")]
    pub room_id: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAccepted {
    #[serde(rename = "calleeID")]
    pub callee_id: String,
    pub call_kind: CallKind,
    #[serde(rename = "roomID")]
    pub room_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectReason {
    Declined,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRejected {
    #[serde(rename = "calleeID")]
    pub callee_id: String,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallFailureReason {
    Offline,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFailed {
    #[serde(rename = "calleeID")]
    pub callee_id: String,
    pub reason: CallFailureReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastSeenUpdate {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Name of the inbound event that failed, empty if the frame did not parse.
    pub event: String,
    pub code: u16,
    pub message: String,
}

/// What a connection's writer task consumes: protocol events, or raw control
/// frames (ping, close) that bypass JSON encoding.
#[derive(Debug)]
pub enum Outbound {
    Event(ServerEvent),
    Frame(WsMessage),
}
