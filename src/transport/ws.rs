use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use super::{Channel, Transport};
use crate::errors::SyncError;
use crate::protocol::Frame;

/// WebSocket transport speaking JSON text frames.
///
/// The bearer credential travels in the `Authorization` header of the
/// upgrade request.
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, credential: &str) -> Result<Channel, SyncError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SyncError::connection(format!("Invalid url {}: {e}", self.url)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|e| SyncError::connection(format!("Invalid credential: {e}")))?;
        request.headers_mut().insert("Authorization", bearer);

        let (stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SyncError::connection(format!("Failed to connect to {}: {e}", self.url)))?;
        let (mut writer, mut reader) = stream.split();

        let (outgoing, mut out_rx) = mpsc::unbounded_channel::<Frame>();
        let (in_tx, incoming) = mpsc::unbounded_channel::<Frame>();

        // Writer task: forward outgoing frames to the socket
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match frame.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Skipping unserializable frame: {e}");
                        continue;
                    }
                };
                if writer.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = writer.close().await;
        });

        // Reader task: decode text frames; dropping `in_tx` signals closure
        tokio::spawn(async move {
            while let Some(msg) = reader.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => match Frame::from_text(text.as_str()) {
                        Ok(frame) => {
                            if in_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring malformed frame: {e}"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("WebSocket receive error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Channel { outgoing, incoming })
    }
}
