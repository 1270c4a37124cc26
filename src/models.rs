use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// The authenticated user the engine acts for, supplied by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    pub full_name: Option<String>,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, full_name: Option<String>) -> Self {
        Self { id: id.into(), full_name }
    }

    pub fn author(&self) -> Author {
        Author {
            id: self.id.clone(),
            full_name: self.full_name.clone(),
            avatar_url: None,
        }
    }
}

/// Snapshot of a message author at the time the payload was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(rename = "type", default = "default_conversation_kind")]
    pub kind: ConversationKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub participants: Vec<Author>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_unread: bool,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub last_read_at: Option<DateTime<Utc>>,
}

fn default_conversation_kind() -> ConversationKind {
    ConversationKind::Direct
}

impl Conversation {
    pub fn new(id: impl Into<String>, kind: ConversationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            avatar_url: None,
            participants: Vec::new(),
            last_message_at: None,
            has_unread: false,
            is_muted: false,
            last_read_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Audio,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Audio => "audio",
            MessageType::System => "system",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-confirmed message as delivered by REST or the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sender: Option<Author>,
    /// Correlation token echoed back from the `send_message` that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Maximum accepted length of a text message body, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 8000;

/// What the local user asked to send.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub reply_to_id: Option<String>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Text messages need a non-blank body within [`MAX_MESSAGE_LENGTH`];
    /// media messages need a media url.
    pub fn validate(&self) -> Result<(), SyncError> {
        match self.message_type {
            MessageType::Text | MessageType::System => {
                let content = self.content.as_deref().unwrap_or_default();
                if content.trim().is_empty() {
                    return Err(SyncError::EmptyField { field_name: "content".to_string() });
                }
                let length = content.chars().count();
                if length > MAX_MESSAGE_LENGTH {
                    return Err(SyncError::FieldTooLong {
                        field_name: "content".to_string(),
                        max_length: MAX_MESSAGE_LENGTH,
                        actual_length: length,
                    });
                }
            }
            MessageType::Image | MessageType::Audio => {
                if self.media_url.as_deref().is_none_or(|u| u.trim().is_empty()) {
                    return Err(SyncError::EmptyField { field_name: "media_url".to_string() });
                }
            }
        }
        Ok(())
    }
}

/// Client-assigned identity of a message that has not been confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(String);

impl TempId {
    pub fn generate(now: DateTime<Utc>) -> Self {
        Self(format!("temp-{}-{}", now.timestamp_millis(), uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TempId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    #[serde(default, alias = "hasMore")]
    pub has_more: bool,
    #[serde(default, alias = "nextCursor")]
    pub next_cursor: Option<String>,
}

impl MessagePage {
    pub fn empty() -> Self {
        Self { messages: Vec::new(), has_more: false, next_cursor: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    pub count: u64,
}

/// Uniform `{success, data, message?}` envelope returned by every REST endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// `success:false` and a missing payload both become a recoverable
    /// [`SyncError::Request`].
    pub fn into_result(self, endpoint: &str) -> Result<T, SyncError> {
        if !self.success {
            let message = self.message.unwrap_or_else(|| "request was not successful".to_string());
            return Err(SyncError::request(endpoint, None, message));
        }
        self.data
            .ok_or_else(|| SyncError::request(endpoint, None, "response envelope carried no data"))
    }

    /// Like [`into_result`](Self::into_result) for endpoints without a payload.
    pub fn ensure_success(self, endpoint: &str) -> Result<(), SyncError> {
        if self.success {
            Ok(())
        } else {
            let message = self.message.unwrap_or_else(|| "request was not successful".to_string());
            Err(SyncError::request(endpoint, None, message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_decodes_with_optional_fields_missing() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "conversation_id": "c1",
            "sender_id": "u1",
            "content": "hi",
            "created_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(msg.message_type, MessageType::Text);
        assert!(!msg.is_deleted);
        assert_eq!(msg.client_id, None);
    }

    #[test]
    fn page_accepts_camel_case_pagination_fields() {
        let page: MessagePage = serde_json::from_value(serde_json::json!({
            "messages": [],
            "hasMore": true,
            "nextCursor": "9"
        }))
        .unwrap();
        assert!(page.has_more);
        assert_eq!(page.next_cursor.as_deref(), Some("9"));
    }

    #[test]
    fn unsuccessful_envelope_is_a_request_error() {
        let resp: ApiResponse<Vec<Notification>> = serde_json::from_value(serde_json::json!({
            "success": false,
            "message": "Session expired"
        }))
        .unwrap();
        let err = resp.into_result("/api/notifications").unwrap_err();
        assert!(err.is_request());
        assert!(err.to_string().contains("Session expired"));
    }

    #[test]
    fn validation_rejects_blank_and_oversized_text() {
        assert!(OutgoingMessage::text("   ").validate().unwrap_err().is_validation());
        let long = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(matches!(
            OutgoingMessage::text(long).validate(),
            Err(SyncError::FieldTooLong { actual_length, .. }) if actual_length == MAX_MESSAGE_LENGTH + 1
        ));
        assert!(OutgoingMessage::text("hello").validate().is_ok());
    }

    #[test]
    fn media_messages_require_a_url() {
        let draft = OutgoingMessage { message_type: MessageType::Image, ..Default::default() };
        assert!(draft.validate().is_err());
    }

    #[test]
    fn temp_ids_are_unique_for_the_same_instant() {
        let now = Utc::now();
        let a = TempId::generate(now);
        let b = TempId::generate(now);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("temp-"));
    }

    #[test]
    fn message_type_uses_lowercase_wire_names() {
        let decoded: MessageType = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(decoded, MessageType::Image);
        assert_eq!(serde_json::to_string(&MessageType::System).unwrap(), "\"system\"");
        assert!(serde_json::from_str::<MessageType>("\"video\"").is_err());
    }
}
