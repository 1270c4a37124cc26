//! Typing presence in both directions.
//!
//! [`TypingCoordinator`] throttles the local user's outbound `typing` signals
//! and guarantees a trailing `stop_typing`. [`TypingIndicators`] tracks who is
//! typing remotely, one slot per conversation, expiring silently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::protocol::{ClientEvent, TypingPayload};
use crate::transport::EventSink;

struct Burst {
    last_emitted: Instant,
    generation: u64,
    stop_timer: JoinHandle<()>,
}

#[derive(Default)]
struct Bursts {
    next_generation: u64,
    active: HashMap<String, Burst>,
}

fn lock(bursts: &Mutex<Bursts>) -> MutexGuard<'_, Bursts> {
    bursts.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outbound typing state, owned by whoever owns the conversation views.
///
/// Timers are conversation scoped; dropping the coordinator cancels all of
/// them without emitting anything.
pub struct TypingCoordinator {
    sink: Arc<dyn EventSink>,
    debounce: Duration,
    quiet_window: Duration,
    bursts: Arc<Mutex<Bursts>>,
}

impl TypingCoordinator {
    pub fn new(sink: Arc<dyn EventSink>, debounce: Duration, quiet_window: Duration) -> Self {
        Self {
            sink,
            debounce,
            quiet_window,
            bursts: Arc::new(Mutex::new(Bursts::default())),
        }
    }

    pub fn is_typing(&self, conversation_id: &str) -> bool {
        lock(&self.bursts).active.contains_key(conversation_id)
    }

    /// Records user activity in `conversation_id`.
    ///
    /// Emits `typing` unless one went out within the debounce window, and
    /// (re)arms the trailing timer that emits `stop_typing` once the user has
    /// been quiet for the full window.
    pub fn notify_typing(&self, conversation_id: &str) {
        let now = Instant::now();
        let mut bursts = lock(&self.bursts);
        bursts.next_generation += 1;
        let generation = bursts.next_generation;

        let previous = bursts.active.remove(conversation_id);
        let last_emitted = match &previous {
            Some(burst) if now.duration_since(burst.last_emitted) < self.debounce => burst.last_emitted,
            _ => {
                self.sink.emit(&ClientEvent::typing(conversation_id));
                now
            }
        };
        if let Some(burst) = previous {
            burst.stop_timer.abort();
        }

        let stop_timer = tokio::spawn(trailing_stop(
            Arc::clone(&self.bursts),
            Arc::clone(&self.sink),
            conversation_id.to_string(),
            generation,
            self.quiet_window,
        ));
        bursts.active.insert(
            conversation_id.to_string(),
            Burst { last_emitted, generation, stop_timer },
        );
    }

    /// Ends the burst now, e.g. right after the message was sent.
    /// Returns `false` if the user was not marked typing.
    pub fn stop_typing(&self, conversation_id: &str) -> bool {
        let removed = lock(&self.bursts).active.remove(conversation_id);
        match removed {
            Some(burst) => {
                burst.stop_timer.abort();
                self.sink.emit(&ClientEvent::stop_typing(conversation_id));
                true
            }
            None => false,
        }
    }

    /// Cancels the timer for a conversation view that went away, without
    /// emitting. The remote side expires the signal on its own.
    pub fn clear(&self, conversation_id: &str) {
        if let Some(burst) = lock(&self.bursts).active.remove(conversation_id) {
            burst.stop_timer.abort();
        }
    }

    pub fn dispose(&self) {
        for (_, burst) in lock(&self.bursts).active.drain() {
            burst.stop_timer.abort();
        }
    }
}

impl Drop for TypingCoordinator {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn trailing_stop(
    bursts: Arc<Mutex<Bursts>>,
    sink: Arc<dyn EventSink>,
    conversation_id: String,
    generation: u64,
    quiet_window: Duration,
) {
    tokio::time::sleep(quiet_window).await;
    let expired = {
        let mut bursts = lock(&bursts);
        match bursts.active.get(&conversation_id) {
            Some(burst) if burst.generation == generation => {
                bursts.active.remove(&conversation_id);
                true
            }
            _ => false,
        }
    };
    if expired {
        debug!(%conversation_id, "Typing went quiet");
        sink.emit(&ClientEvent::stop_typing(conversation_id));
    }
}

/// Someone else typing in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingIndicator {
    pub user_id: String,
    pub full_name: Option<String>,
    expires_at: Instant,
}

/// Inbound typing state: one slot per conversation, last writer wins.
#[derive(Debug, Clone)]
pub struct TypingIndicators {
    local_user_id: String,
    ttl: Duration,
    slots: HashMap<String, TypingIndicator>,
}

impl TypingIndicators {
    pub fn new(local_user_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            ttl,
            slots: HashMap::new(),
        }
    }

    /// Returns `true` if the slot changed. The local user's own echoes are
    /// ignored.
    pub fn on_typing(&mut self, payload: TypingPayload, now: Instant) -> bool {
        if payload.user_id == self.local_user_id {
            return false;
        }
        self.slots.insert(
            payload.conversation_id,
            TypingIndicator {
                user_id: payload.user_id,
                full_name: payload.full_name,
                expires_at: now + self.ttl,
            },
        );
        true
    }

    /// Clears the slot only if it belongs to the user who stopped.
    pub fn on_stop(&mut self, payload: &TypingPayload) -> bool {
        match self.slots.get(&payload.conversation_id) {
            Some(slot) if slot.user_id == payload.user_id => {
                self.slots.remove(&payload.conversation_id);
                true
            }
            _ => false,
        }
    }

    pub fn current(&self, conversation_id: &str, now: Instant) -> Option<&TypingIndicator> {
        self.slots
            .get(conversation_id)
            .filter(|slot| slot.expires_at > now)
    }

    /// Drops expired slots and returns the conversations they belonged to.
    pub fn prune(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.slots.remove(id);
        }
        expired
    }

    pub fn clear(&mut self, conversation_id: &str) {
        self.slots.remove(conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ClientEvent>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<ClientEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl EventSink for Recorder {
        fn emit(&self, event: &ClientEvent) -> bool {
            self.events.lock().unwrap().push(event.clone());
            true
        }
    }

    fn coordinator() -> (Arc<Recorder>, TypingCoordinator) {
        let recorder = Arc::new(Recorder::default());
        let coordinator = TypingCoordinator::new(
            recorder.clone(),
            Duration::from_millis(1000),
            Duration::from_millis(2000),
        );
        (recorder, coordinator)
    }

    fn typing(user: &str) -> TypingPayload {
        TypingPayload {
            conversation_id: "C1".to_string(),
            user_id: user.to_string(),
            full_name: Some(format!("User {user}")),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_period_emits_exactly_one_stop() {
        let (recorder, coordinator) = coordinator();
        coordinator.notify_typing("C1");
        assert_eq!(recorder.take(), vec![ClientEvent::typing("C1")]);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(recorder.take(), vec![ClientEvent::stop_typing("C1")]);
        assert!(!coordinator.is_typing("C1"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(recorder.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_within_debounce_emit_once() {
        let (recorder, coordinator) = coordinator();
        for _ in 0..5 {
            coordinator.notify_typing("C1");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(recorder.take(), vec![ClientEvent::typing("C1")]);

        // Still typing past the debounce window: refresh the signal.
        tokio::time::sleep(Duration::from_millis(600)).await;
        coordinator.notify_typing("C1");
        assert_eq!(recorder.take(), vec![ClientEvent::typing("C1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn continued_typing_defers_the_stop() {
        let (recorder, coordinator) = coordinator();
        coordinator.notify_typing("C1");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        coordinator.notify_typing("C1");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!recorder.take().contains(&ClientEvent::stop_typing("C1")));

        tokio::time::sleep(Duration::from_millis(600)).await;
        let stops = recorder
            .take()
            .into_iter()
            .filter(|e| *e == ClientEvent::stop_typing("C1"))
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_trailing_timer() {
        let (recorder, coordinator) = coordinator();
        coordinator.notify_typing("C1");
        assert!(coordinator.stop_typing("C1"));
        assert!(!coordinator.stop_typing("C1"));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            recorder.take(),
            vec![ClientEvent::typing("C1"), ClientEvent::stop_typing("C1")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clearing_a_closed_view_emits_nothing() {
        let (recorder, coordinator) = coordinator();
        coordinator.notify_typing("C1");
        coordinator.notify_typing("C2");
        recorder.take();

        coordinator.clear("C1");
        drop(coordinator);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn remote_typing_is_last_writer_wins() {
        let now = Instant::now();
        let mut indicators = TypingIndicators::new("me", Duration::from_secs(2));
        indicators.on_typing(typing("alice"), now);
        indicators.on_typing(typing("bob"), now);
        assert_eq!(indicators.current("C1", now).unwrap().user_id, "bob");

        // Alice stopping does not clear Bob's slot.
        assert!(!indicators.on_stop(&typing("alice")));
        assert!(indicators.on_stop(&typing("bob")));
        assert!(indicators.current("C1", now).is_none());
        assert!(!indicators.on_stop(&typing("bob")));
    }

    #[test]
    fn remote_typing_expires_without_refresh() {
        let now = Instant::now();
        let mut indicators = TypingIndicators::new("me", Duration::from_secs(2));
        indicators.on_typing(typing("alice"), now);
        assert!(indicators.current("C1", now + Duration::from_millis(1999)).is_some());
        assert!(indicators.current("C1", now + Duration::from_millis(2000)).is_none());
        assert_eq!(indicators.prune(now + Duration::from_secs(3)), vec!["C1"]);
    }

    #[test]
    fn own_typing_echo_is_ignored() {
        let now = Instant::now();
        let mut indicators = TypingIndicators::new("me", Duration::from_secs(2));
        assert!(!indicators.on_typing(typing("me"), now));
        assert!(indicators.current("C1", now).is_none());
    }
}
