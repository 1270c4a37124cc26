use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, warn};

/// Callback invoked with the raw JSON payload of an event.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    next_id: u64,
    by_event: HashMap<String, Vec<(u64, Handler)>>,
}

/// Durable mapping from event name to handlers.
///
/// The registry outlives any single channel: the connection manager attaches
/// each new channel to it, so handlers registered before a connection exists,
/// or before a reconnect, keep receiving events.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    handlers: Arc<Mutex<Handlers>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `handler` for `event`; the returned capability removes exactly it.
    pub fn subscribe(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let event = event.into();
        let mut handlers = self.lock();
        handlers.next_id += 1;
        let id = handlers.next_id;
        handlers
            .by_event
            .entry(event.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            registry: self.clone(),
            event,
            id,
        }
    }

    /// Like [`subscribe`](Self::subscribe) but decodes the payload first.
    /// Payloads that fail to decode are logged and not delivered.
    pub fn subscribe_typed<T>(
        &self,
        event: impl Into<String>,
        handler: impl Fn(T) + Send + Sync + 'static,
    ) -> Subscription
    where
        T: DeserializeOwned + 'static,
    {
        let event = event.into();
        let name = event.clone();
        self.subscribe(event, move |data| match T::deserialize(data) {
            Ok(payload) => handler(payload),
            Err(e) => warn!(event = %name, "Dropping undecodable payload: {e}"),
        })
    }

    /// Invokes every handler for `event` in registration order.
    ///
    /// Handlers run on a snapshot taken before the first call, so a handler
    /// may subscribe or unsubscribe without deadlocking. A panicking handler
    /// is logged and does not stop the remaining ones.
    pub fn dispatch(&self, event: &str, data: &Value) -> usize {
        let snapshot: Vec<Handler> = match self.lock().by_event.get(event) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(data))).is_err() {
                error!(%event, "Event handler panicked");
            }
        }
        snapshot.len()
    }

    /// Number of live handlers across all events.
    pub fn len(&self) -> usize {
        self.lock().by_event.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.lock().by_event.get(event).map_or(0, Vec::len)
    }

    fn remove(&self, event: &str, id: u64) -> bool {
        let mut handlers = self.lock();
        let Some(list) = handlers.by_event.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.by_event.remove(event);
        }
        removed
    }
}

/// Capability returned by [`SubscriptionRegistry::subscribe`].
///
/// Dropping it leaves the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription {
    registry: SubscriptionRegistry,
    event: String,
    id: u64,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Removes this handler. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        self.registry.remove(&self.event, self.id)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &Value| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn unsubscribe_removes_only_its_own_handler() {
        let registry = SubscriptionRegistry::new();
        let (a_count, a) = counter();
        let (b_count, b) = counter();
        let sub_a = registry.subscribe("new_message", a);
        let _sub_b = registry.subscribe("new_message", b);

        assert!(sub_a.unsubscribe());
        assert!(!sub_a.unsubscribe());
        registry.dispatch("new_message", &json!({}));

        assert_eq!(a_count.load(Ordering::SeqCst), 0);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handler_count("new_message"), 1);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            registry.subscribe("unread_count", move |_| order.lock().unwrap().push(tag));
        }
        assert_eq!(registry.dispatch("unread_count", &json!({"count": 1})), 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn panicking_handler_does_not_block_the_rest() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("typing", |_| panic!("handler bug"));
        let (count, h) = counter();
        registry.subscribe("typing", h);

        registry.dispatch("typing", &json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_dispatch() {
        let registry = SubscriptionRegistry::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let sub = registry.subscribe("connect", move |_| {
            if let Some(sub) = inner.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        registry.dispatch("connect", &Value::Null);
        assert!(registry.is_empty());
    }

    #[test]
    fn typed_subscription_skips_bad_payloads() {
        #[derive(serde::Deserialize)]
        struct Count {
            count: u64,
        }
        let registry = SubscriptionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        registry.subscribe_typed("unread_count", move |c: Count| s.lock().unwrap().push(c.count));

        registry.dispatch("unread_count", &json!({"count": "many"}));
        registry.dispatch("unread_count", &json!({"count": 4}));
        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }
}
