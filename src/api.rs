use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use crate::errors::SyncError;
use crate::models::{
    ApiResponse, Conversation, Message, MessagePage, Notification, OutgoingMessage, UnreadCount,
};

/// The REST collaborator. Every call returns a typed outcome; an envelope
/// with `success:false` becomes [`SyncError::Request`].
#[async_trait]
pub trait RestApi: Send + Sync + 'static {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, SyncError>;

    async fn create_conversation(&self, peer_id: &str) -> Result<Conversation, SyncError>;

    /// Newest-first page ending before `cursor` (or the newest page).
    async fn list_messages(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<MessagePage, SyncError>;

    async fn send_message(
        &self,
        conversation_id: &str,
        message: &OutgoingMessage,
    ) -> Result<Message, SyncError>;

    async fn delete_message(&self, message_id: &str) -> Result<(), SyncError>;

    async fn list_notifications(&self) -> Result<Vec<Notification>, SyncError>;

    async fn unread_notification_count(&self) -> Result<u64, SyncError>;

    async fn mark_notification_read(&self, notification_id: &str) -> Result<(), SyncError>;

    async fn mark_all_notifications_read(&self) -> Result<(), SyncError>;
}

#[derive(Serialize)]
struct CreateConversationBody<'a> {
    participant_id: &'a str,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    message_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_id: Option<&'a str>,
}

/// [`RestApi`] over HTTP with a bearer credential.
#[derive(Clone)]
pub struct HttpRestApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRestApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    /// Sends the request and decodes the `{success, data, message?}` envelope.
    async fn envelope<T: DeserializeOwned>(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<ApiResponse<T>, SyncError> {
        let resp = request.send().await.map_err(|e| {
            error!("Request to {path} failed: {e}");
            SyncError::request(path, None, format!("Network error: {e}"))
        })?;

        let status = resp.status();
        let envelope = resp.json::<ApiResponse<T>>().await.map_err(|e| {
            SyncError::request(path, Some(status.as_u16()), format!("Parse error: {e}"))
        })?;
        if !status.is_success() {
            let message = envelope
                .message
                .unwrap_or_else(|| format!("Server error: {status}"));
            return Err(SyncError::request(path, Some(status.as_u16()), message));
        }
        debug!(%path, status = status.as_u16(), "Request succeeded");
        Ok(envelope)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        request: RequestBuilder,
    ) -> Result<T, SyncError> {
        self.envelope(path, request).await?.into_result(path)
    }

    /// For endpoints whose envelope carries no meaningful data.
    async fn call_empty(&self, path: &str, request: RequestBuilder) -> Result<(), SyncError> {
        self.envelope::<serde_json::Value>(path, request)
            .await?
            .ensure_success(path)
    }
}

#[async_trait]
impl RestApi for HttpRestApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, SyncError> {
        let path = "/api/messages/conversations";
        self.call(path, self.request(Method::GET, path)).await
    }

    async fn create_conversation(&self, peer_id: &str) -> Result<Conversation, SyncError> {
        let path = "/api/messages/conversations";
        let request = self
            .request(Method::POST, path)
            .json(&CreateConversationBody { participant_id: peer_id });
        self.call(path, request).await
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<MessagePage, SyncError> {
        let path = format!("/api/messages/conversations/{conversation_id}/messages");
        let mut request = self
            .request(Method::GET, &path)
            .query(&[("limit", limit.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        self.call(&path, request).await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        message: &OutgoingMessage,
    ) -> Result<Message, SyncError> {
        let path = format!("/api/messages/conversations/{conversation_id}/messages");
        let body = SendMessageBody {
            content: message.content.as_deref(),
            message_type: message.message_type.as_str(),
            media_url: message.media_url.as_deref(),
            reply_to_id: message.reply_to_id.as_deref(),
        };
        let request = self.request(Method::POST, &path).json(&body);
        self.call(&path, request).await
    }

    async fn delete_message(&self, message_id: &str) -> Result<(), SyncError> {
        let path = format!("/api/messages/{message_id}");
        self.call_empty(&path, self.request(Method::DELETE, &path)).await
    }

    async fn list_notifications(&self) -> Result<Vec<Notification>, SyncError> {
        let path = "/api/notifications";
        self.call(path, self.request(Method::GET, path)).await
    }

    async fn unread_notification_count(&self) -> Result<u64, SyncError> {
        let path = "/api/notifications/unread-count";
        self.call::<UnreadCount>(path, self.request(Method::GET, path))
            .await
            .map(|c| c.count)
    }

    async fn mark_notification_read(&self, notification_id: &str) -> Result<(), SyncError> {
        let path = format!("/api/notifications/{notification_id}/read");
        self.call_empty(&path, self.request(Method::PUT, &path)).await
    }

    async fn mark_all_notifications_read(&self) -> Result<(), SyncError> {
        let path = "/api/notifications/read-all";
        self.call_empty(path, self.request(Method::PUT, path)).await
    }
}
