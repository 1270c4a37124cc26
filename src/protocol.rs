//! Named-event wire protocol spoken over the live channel.
//!
//! Every frame is a JSON text message `{"event": "<name>", "data": <payload>}`.
//! Outbound events are modelled by [`ClientEvent`], inbound ones by
//! [`ServerEvent`]; the registry itself only sees raw [`Frame`]s so handlers
//! can subscribe to any name, including the local lifecycle events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SyncError;
use crate::models::{Message, Notification};

// ── Inbound event names ─────────────────────────────────────────────────────
pub const NEW_MESSAGE: &str = "new_message";
pub const MESSAGE_DELETED: &str = "message_deleted";
pub const MESSAGE_ERROR: &str = "message_error";
pub const USER_TYPING: &str = "user_typing";
pub const USER_STOP_TYPING: &str = "user_stop_typing";
pub const NEW_NOTIFICATION: &str = "new_notification";
pub const UNREAD_COUNT: &str = "unread_count";

/// Every inbound event name the server may push.
pub const SERVER_EVENTS: [&str; 7] = [
    NEW_MESSAGE,
    MESSAGE_DELETED,
    MESSAGE_ERROR,
    USER_TYPING,
    USER_STOP_TYPING,
    NEW_NOTIFICATION,
    UNREAD_COUNT,
];

// ── Local lifecycle events, dispatched by the connection manager ────────────
pub const CONNECT: &str = "connect";
pub const DISCONNECT: &str = "disconnect";
pub const RECONNECT_FAILED: &str = "reconnect_failed";

/// One raw frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self { event: event.into(), data }
    }

    pub fn to_text(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(|e| SyncError::decode(&self.event, &e))
    }

    pub fn from_text(text: &str) -> Result<Self, SyncError> {
        serde_json::from_str(text).map_err(|e| SyncError::decode("<frame>", &e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRef {
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessagePayload {
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    /// Temporary id of the optimistic entry; the server echoes it on `new_message`.
    pub client_id: String,
}

/// Events the client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinConversations(Vec<String>),
    SendMessage(SendMessagePayload),
    Typing(ConversationRef),
    StopTyping(ConversationRef),
    MarkRead(ConversationRef),
}

impl ClientEvent {
    pub fn typing(conversation_id: impl Into<String>) -> Self {
        ClientEvent::Typing(ConversationRef { conversation_id: conversation_id.into() })
    }

    pub fn stop_typing(conversation_id: impl Into<String>) -> Self {
        ClientEvent::StopTyping(ConversationRef { conversation_id: conversation_id.into() })
    }

    pub fn mark_read(conversation_id: impl Into<String>) -> Self {
        ClientEvent::MarkRead(ConversationRef { conversation_id: conversation_id.into() })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinConversations(_) => "join_conversations",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::StopTyping(_) => "stop_typing",
            ClientEvent::MarkRead(_) => "mark_read",
        }
    }

    pub fn to_frame(&self) -> Result<Frame, SyncError> {
        serde_json::to_value(self)
            .and_then(serde_json::from_value)
            .map_err(|e| SyncError::decode(self.name(), &e))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeleted {
    pub message_id: String,
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPayload {
    pub conversation_id: String,
    pub user_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCountPayload {
    pub count: u64,
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(Message),
    MessageDeleted(MessageDeleted),
    MessageError(MessageError),
    UserTyping(TypingPayload),
    UserStopTyping(TypingPayload),
    NewNotification(Notification),
    UnreadCount(UnreadCountPayload),
}

impl ServerEvent {
    pub fn from_frame(event: &str, data: &Value) -> Result<Self, SyncError> {
        let tagged = serde_json::json!({ "event": event, "data": data });
        serde_json::from_value(tagged).map_err(|e| SyncError::decode(event, &e))
    }

    pub fn to_frame(&self) -> Result<Frame, SyncError> {
        serde_json::to_value(self)
            .and_then(serde_json::from_value)
            .map_err(|e| SyncError::decode("server_event", &e))
    }
}
