//! In-process transport used to drive the engine without a server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Channel, Transport};
use crate::errors::SyncError;
use crate::protocol::{ClientEvent, Frame, ServerEvent};

/// The server's end of one opened [`Channel`].
pub struct ServerEnd {
    pub credential: String,
    to_client: Option<mpsc::UnboundedSender<Frame>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl ServerEnd {
    /// Pushes a raw frame to the client. Returns `false` once closed.
    pub fn push(&self, frame: Frame) -> bool {
        self.to_client
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    pub fn push_event(&self, event: &ServerEvent) -> bool {
        match event.to_frame() {
            Ok(frame) => self.push(frame),
            Err(_) => false,
        }
    }

    /// Everything the client emitted so far.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Waits for the next frame the client emits.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        self.drain()
            .into_iter()
            .filter_map(|f| serde_json::from_value(serde_json::json!({ "event": f.event, "data": f.data })).ok())
            .collect()
    }

    /// Simulates the network dropping the connection.
    pub fn close(&mut self) {
        self.to_client = None;
    }
}

#[derive(Default)]
struct Script {
    outcomes: VecDeque<Result<(), SyncError>>,
    opened: Vec<ServerEnd>,
    attempts: usize,
}

/// A [`Transport`] whose handshakes succeed unless a failure was scripted.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    script: Arc<Mutex<Script>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next handshake fail with `error`.
    pub fn fail_next(&self, error: SyncError) {
        self.lock().outcomes.push_back(Err(error));
    }

    /// Number of handshakes attempted so far.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Takes the server end of the most recently opened channel.
    pub fn take_server_end(&self) -> Option<ServerEnd> {
        self.lock().opened.pop()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, credential: &str) -> Result<Channel, SyncError> {
        let mut script = self.lock();
        script.attempts += 1;
        if let Some(Err(e)) = script.outcomes.pop_front() {
            return Err(e);
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        script.opened.push(ServerEnd {
            credential: credential.to_string(),
            to_client: Some(to_client),
            from_client,
        });
        Ok(Channel { outgoing, incoming })
    }
}
