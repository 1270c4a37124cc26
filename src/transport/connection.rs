//! Session-wide connection lifecycle: connect, disconnect, bounded reconnect.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::registry::{Subscription, SubscriptionRegistry};
use super::{Channel, ConnectionState, Transport};
use crate::config::SyncConfig;
use crate::errors::SyncError;
use crate::protocol::{self, ClientEvent, Frame};

/// Fixed-delay, bounded retry policy applied to the initial handshake and
/// whenever an established channel drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { delay: Duration::from_millis(1000), max_attempts: 5 }
    }
}

impl From<&SyncConfig> for ReconnectPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self { delay: config.reconnect_delay, max_attempts: config.reconnect_attempts }
    }
}

type PendingConnect = Shared<BoxFuture<'static, Result<(), SyncError>>>;

#[derive(Default)]
struct Link {
    outgoing: Option<mpsc::UnboundedSender<Frame>>,
    pending: Option<PendingConnect>,
    credential: Option<String>,
    /// Bumped by every `connect` and `disconnect`; tasks carrying an older
    /// value stop touching the link.
    generation: u64,
    pump: Option<JoinHandle<()>>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    registry: SubscriptionRegistry,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Link>,
}

/// Owns the session's single live channel and multiplexes its named events
/// to the [`SubscriptionRegistry`].
///
/// Cloning is cheap; every clone drives the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: SubscriptionRegistry,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                registry,
                policy,
                state,
                link: Mutex::new(Link::default()),
            }),
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    pub fn subscribe(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.registry.subscribe(event, handler)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Opens the channel with `credential`.
    ///
    /// Resolves immediately when already connected. Concurrent callers share
    /// one handshake and observe the same outcome. While an automatic
    /// reconnect is running this waits for it to settle instead of racing it.
    pub async fn connect(&self, credential: &str) -> Result<(), SyncError> {
        let pending = {
            let mut link = self.inner.lock_link();
            match self.state() {
                ConnectionState::Connected if link.outgoing.is_some() => return Ok(()),
                ConnectionState::Reconnecting => None,
                _ => Some(match &link.pending {
                    Some(pending) => pending.clone(),
                    None => {
                        link.generation += 1;
                        link.credential = Some(credential.to_string());
                        let attempt = Inner::establish(
                            Arc::clone(&self.inner),
                            credential.to_string(),
                            link.generation,
                        )
                        .boxed()
                        .shared();
                        link.pending = Some(attempt.clone());
                        attempt
                    }
                }),
            }
        };

        match pending {
            Some(attempt) => attempt.await,
            None => self.settled().await,
        }
    }

    async fn settled(&self) -> Result<(), SyncError> {
        let mut rx = self.watch_state();
        let state = rx
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Disconnected))
            .await
            .map(|s| *s)
            .unwrap_or(ConnectionState::Disconnected);
        match state {
            ConnectionState::Connected => Ok(()),
            _ => Err(SyncError::connection("Reconnect attempts exhausted")),
        }
    }

    /// Tears down the channel and cancels any reconnect in progress.
    pub fn disconnect(&self) {
        let (pump, was_live) = {
            let mut link = self.inner.lock_link();
            link.generation += 1;
            link.pending = None;
            link.credential = None;
            let was_live = link.outgoing.take().is_some();
            (link.pump.take(), was_live)
        };
        if let Some(pump) = pump {
            pump.abort();
        }
        self.inner.set_state(ConnectionState::Disconnected);
        if was_live {
            info!("Disconnected");
            self.inner.registry.dispatch(protocol::DISCONNECT, &Value::Null);
        }
    }

    /// Best-effort send. Returns `true` if the frame was handed to a live
    /// channel; otherwise it is dropped.
    pub fn emit(&self, event: &ClientEvent) -> bool {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = event.name(), "Cannot encode outbound event: {e}");
                return false;
            }
        };
        let link = self.inner.lock_link();
        match &link.outgoing {
            Some(tx) if self.is_connected() => tx.send(frame).is_ok(),
            _ => {
                debug!(event = event.name(), "Not connected; dropping outbound event");
                false
            }
        }
    }
}

impl Inner {
    fn lock_link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    async fn establish(
        inner: Arc<Inner>,
        credential: String,
        generation: u64,
    ) -> Result<(), SyncError> {
        inner.set_state(ConnectionState::Connecting);
        let max_attempts = inner.policy.max_attempts;
        let mut retries = 0;
        let result = loop {
            info!(retries, "Connecting");
            match inner.transport.open(&credential).await {
                Ok(channel) => break Ok(channel),
                Err(e) if retries < max_attempts => {
                    retries += 1;
                    warn!(attempt = retries, max_attempts, "Handshake failed, retrying: {e}");
                    tokio::time::sleep(inner.policy.delay).await;
                    if inner.lock_link().generation != generation {
                        return Err(SyncError::connection("Connection attempt was cancelled"));
                    }
                }
                Err(e) => break Err(e),
            }
        };

        let outcome = {
            let mut link = inner.lock_link();
            if link.generation != generation {
                // A disconnect() overtook this handshake.
                return Err(SyncError::connection("Connection attempt was cancelled"));
            }
            link.pending = None;
            match result {
                Ok(channel) => {
                    inner.attach(&mut link, channel, generation);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        match &outcome {
            Ok(()) => inner.announce_connected(),
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                error!("Connection failed: {e}");
            }
        }
        outcome
    }

    /// Binds a fresh channel to the durable registry. Must run before
    /// `Connected` is published so no handler misses the first event.
    fn attach(self: &Arc<Self>, link: &mut Link, channel: Channel, generation: u64) {
        let Channel { outgoing, incoming } = channel;
        link.outgoing = Some(outgoing);
        link.pump = Some(tokio::spawn(Inner::pump(Arc::clone(self), incoming, generation)));
    }

    fn announce_connected(&self) {
        self.set_state(ConnectionState::Connected);
        info!(subscriptions = self.registry.len(), "Connected");
        self.registry.dispatch(protocol::CONNECT, &Value::Null);
    }

    async fn pump(inner: Arc<Inner>, mut incoming: mpsc::UnboundedReceiver<Frame>, generation: u64) {
        while let Some(frame) = incoming.recv().await {
            inner.registry.dispatch(&frame.event, &frame.data);
        }
        Inner::channel_closed(inner, generation).await;
    }

    async fn channel_closed(inner: Arc<Inner>, generation: u64) {
        {
            let mut link = inner.lock_link();
            if link.generation != generation {
                return;
            }
            link.outgoing = None;
            link.pump = None;
        }
        warn!("Connection lost; reconnecting");
        inner.set_state(ConnectionState::Reconnecting);
        inner.registry.dispatch(protocol::DISCONNECT, &Value::Null);

        let max_attempts = inner.policy.max_attempts;
        for attempt in 1..=max_attempts {
            tokio::time::sleep(inner.policy.delay).await;

            let credential = {
                let link = inner.lock_link();
                if link.generation != generation {
                    return;
                }
                link.credential.clone()
            };
            let Some(credential) = credential else {
                return;
            };

            info!(attempt, max_attempts, "Reconnecting");
            match inner.transport.open(&credential).await {
                Ok(channel) => {
                    {
                        let mut link = inner.lock_link();
                        if link.generation != generation {
                            return;
                        }
                        inner.attach(&mut link, channel, generation);
                    }
                    inner.announce_connected();
                    return;
                }
                Err(e) => warn!(attempt, "Reconnect attempt failed: {e}"),
            }
        }

        {
            let link = inner.lock_link();
            if link.generation != generation {
                return;
            }
        }
        inner.set_state(ConnectionState::Disconnected);
        error!(attempts = max_attempts, "Giving up on reconnecting");
        inner
            .registry
            .dispatch(protocol::RECONNECT_FAILED, &json!({ "attempts": max_attempts }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ServerEvent, UnreadCountPayload};
    use crate::transport::memory::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(transport: &MemoryTransport, max_attempts: u32) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(transport.clone()),
            SubscriptionRegistry::new(),
            ReconnectPolicy { delay: Duration::from_millis(100), max_attempts },
        )
    }

    async fn wait_for(manager: &ConnectionManager, target: ConnectionState) {
        let mut rx = manager.watch_state();
        rx.wait_for(|s| *s == target).await.unwrap();
    }

    fn unread(count: u64) -> ServerEvent {
        ServerEvent::UnreadCount(UnreadCountPayload { count })
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, 3);

        let (a, b) = tokio::join!(manager.connect("token"), manager.connect("token"));
        assert!(a.is_ok() && b.is_ok());
        manager.connect("token").await.unwrap();

        assert_eq!(transport.attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(transport.take_server_end().unwrap().credential, "token");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handshake_reports_connection_error_after_retries() {
        let transport = MemoryTransport::new();
        for _ in 0..4 {
            transport.fail_next(SyncError::connection("401 Unauthorized"));
        }
        let manager = manager(&transport, 3);

        let err = manager.connect("bad").await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(transport.attempts(), 4);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_succeeds_on_a_later_attempt() {
        let transport = MemoryTransport::new();
        transport.fail_next(SyncError::connection("refused"));
        transport.fail_next(SyncError::connection("refused"));
        let manager = manager(&transport, 3);

        manager.connect("token").await.unwrap();
        assert_eq!(transport.attempts(), 3);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(transport.take_server_end().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_handshake_retries() {
        let transport = MemoryTransport::new();
        for _ in 0..4 {
            transport.fail_next(SyncError::connection("refused"));
        }
        let manager = manager(&transport, 3);

        let attempt = tokio::spawn({
            let manager = manager.clone();
            async move { manager.connect("token").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.disconnect();

        assert!(attempt.await.unwrap().is_err());
        assert_eq!(transport.attempts(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn emit_after_disconnect_is_a_noop() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, 3);
        assert!(!manager.emit(&ClientEvent::typing("c1")));

        manager.connect("token").await.unwrap();
        let mut server = transport.take_server_end().unwrap();
        assert!(manager.emit(&ClientEvent::typing("c1")));
        assert_eq!(server.drain_events(), vec![ClientEvent::typing("c1")]);

        manager.disconnect();
        assert!(!manager.emit(&ClientEvent::typing("c1")));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn all_subscriptions_survive_a_reconnect() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, 3);
        let hits: Vec<Arc<AtomicUsize>> = (0..4).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        for hit in &hits {
            let hit = Arc::clone(hit);
            manager.subscribe(protocol::UNREAD_COUNT, move |_| {
                hit.fetch_add(1, Ordering::SeqCst);
            });
        }

        manager.connect("token").await.unwrap();
        let mut first = transport.take_server_end().unwrap();
        first.close();
        wait_for(&manager, ConnectionState::Reconnecting).await;
        wait_for(&manager, ConnectionState::Connected).await;

        let second = transport.take_server_end().unwrap();
        assert!(second.push_event(&unread(2)));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.attempts(), 2);
        for hit in &hits {
            assert_eq!(hit.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_bounded_attempts() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, 2);
        let failed = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failed);
        manager.subscribe(protocol::RECONNECT_FAILED, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect("token").await.unwrap();
        transport.fail_next(SyncError::connection("down"));
        transport.fail_next(SyncError::connection("down"));
        transport.take_server_end().unwrap().close();

        wait_for(&manager, ConnectionState::Reconnecting).await;
        wait_for(&manager, ConnectionState::Disconnected).await;
        assert_eq!(transport.attempts(), 3);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert!(manager.connect("token").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_a_pending_reconnect() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, 5);
        manager.connect("token").await.unwrap();
        transport.take_server_end().unwrap().close();
        wait_for(&manager, ConnectionState::Reconnecting).await;

        manager.disconnect();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_during_reconnect_waits_for_it() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, 3);
        manager.connect("token").await.unwrap();
        transport.take_server_end().unwrap().close();
        wait_for(&manager, ConnectionState::Reconnecting).await;

        manager.connect("token").await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test]
    async fn lifecycle_events_are_dispatched() {
        let transport = MemoryTransport::new();
        let manager = manager(&transport, 3);
        let connects = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&connects);
        manager.subscribe(protocol::CONNECT, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect("token").await.unwrap();
        manager.disconnect();
        manager.connect("token").await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }
}
