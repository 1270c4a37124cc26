pub mod connection;
pub mod memory;
pub mod registry;
pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::SyncError;
use crate::protocol::{ClientEvent, Frame};

pub use connection::{ConnectionManager, ReconnectPolicy};
pub use registry::{Subscription, SubscriptionRegistry};

/// Lifecycle of the session's single live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        })
    }
}

/// An established bidirectional channel.
///
/// The channel is considered closed once `incoming` yields `None`.
pub struct Channel {
    pub outgoing: mpsc::UnboundedSender<Frame>,
    pub incoming: mpsc::UnboundedReceiver<Frame>,
}

/// Opens channels to the server. Implemented over WebSockets for production
/// and in memory for tests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, credential: &str) -> Result<Channel, SyncError>;
}

/// Anything that can put an outbound event on the wire, best-effort.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: &ClientEvent) -> bool;
}

impl EventSink for ConnectionManager {
    fn emit(&self, event: &ClientEvent) -> bool {
        ConnectionManager::emit(self, event)
    }
}
