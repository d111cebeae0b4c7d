//! In-process event bus (C2) — token-keyed publish/subscribe with
//! wildcard fan-out.
//!
//! One mutex guards the subscriber map. `publish` snapshots the callback
//! set for a key while holding the lock, then runs every callback
//! **outside** the lock, so a slow subscriber cannot stall a concurrent
//! `subscribe`/`unsubscribe`. Each callback's failure is caught and
//! logged; it never prevents the remaining callbacks from running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::domain::ForwardEvent;

/// Key under which a callback subscribed to every token's events.
pub const WILDCARD: &str = "*";

/// A registered subscriber callback. Returns `Err` on failure — the bus
/// logs it and moves on to the next subscriber.
pub type Callback = Arc<dyn Fn(&ForwardEvent) -> anyhow::Result<()> + Send + Sync>;

/// Opaque handle returned by `subscribe`, used to remove that exact
/// registration later. Replaces identity-comparison of closures (not
/// meaningful in Rust) with an explicit handle, per the bus's
/// callback-set-to-handle redesign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    callback: Callback,
}

/// Token-keyed, in-process publish/subscribe hub.
///
/// Owns no worker pool — delivery happens synchronously on the
/// publisher's execution context.
pub struct EventBus {
    subscribers: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback for events on `key` (a token id, or
    /// [`WILDCARD`] for every event). Idempotent in the sense that
    /// subscribing twice yields two independent subscriptions, each with
    /// its own id.
    pub fn subscribe(&self, key: impl Into<String>, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscribers.lock().expect("event bus mutex poisoned");
        subs.entry(key.into()).or_default().push(Entry { id, callback });
        id
    }

    /// Remove a specific subscription. Idempotent — removing an id that's
    /// already gone is a no-op. Removing the last callback for a key
    /// removes the key entirely.
    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) {
        let mut subs = self.subscribers.lock().expect("event bus mutex poisoned");
        if let Some(list) = subs.get_mut(key) {
            list.retain(|e| e.id != id);
            if list.is_empty() {
                subs.remove(key);
            }
        }
    }

    /// Clear one key, or the whole bus if `key` is `None`. Returns the
    /// number of subscriptions cleared.
    pub fn unsubscribe_all(&self, key: Option<&str>) -> usize {
        let mut subs = self.subscribers.lock().expect("event bus mutex poisoned");
        match key {
            Some(key) => subs.remove(key).map_or(0, |list| list.len()),
            None => {
                let cleared = subs.values().map(Vec::len).sum();
                subs.clear();
                cleared
            }
        }
    }

    /// Publish an event to every callback registered for
    /// `event.token_id`, plus every callback registered for the wildcard
    /// key. Callbacks run in registration order; this never raises to the
    /// publisher regardless of subscriber behavior.
    pub fn publish(&self, event: &ForwardEvent) {
        let callbacks: Vec<Callback> = {
            let subs = self.subscribers.lock().expect("event bus mutex poisoned");
            let mut out = Vec::new();
            if let Some(list) = subs.get(event.token_id.as_str()) {
                out.extend(list.iter().map(|e| e.callback.clone()));
            }
            if event.token_id != WILDCARD {
                if let Some(list) = subs.get(WILDCARD) {
                    out.extend(list.iter().map(|e| e.callback.clone()));
                }
            }
            out
        };

        for callback in callbacks {
            if let Err(err) = callback(event) {
                error!(
                    token_id = %event.token_id,
                    event_type = %event.event_type,
                    error = %err,
                    "forward event callback failed"
                );
            }
        }
    }

    /// Total number of live subscriptions, across all keys.
    pub fn subscriber_count(&self) -> usize {
        let subs = self.subscribers.lock().expect("event bus mutex poisoned");
        subs.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn event(token_id: &str) -> ForwardEvent {
        ForwardEvent::new(token_id.to_string(), "book", json!({}))
    }

    #[test]
    fn publish_delivers_to_token_and_wildcard_subscribers() {
        let bus = EventBus::new();
        let token_hits = Arc::new(AtomicUsize::new(0));
        let wildcard_hits = Arc::new(AtomicUsize::new(0));

        let t = token_hits.clone();
        bus.subscribe(
            "T1",
            Arc::new(move |_| {
                t.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let w = wildcard_hits.clone();
        bus.subscribe(
            WILDCARD,
            Arc::new(move |_| {
                w.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.publish(&event("T1"));
        bus.publish(&event("T2"));

        assert_eq!(token_hits.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard_hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_callback_does_not_block_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe("T1", Arc::new(|_| anyhow::bail!("boom")));
        let h = hits.clone();
        bus.subscribe(
            "T1",
            Arc::new(move |_| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        bus.publish(&event("T1"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_only_the_targeted_subscription() {
        let bus = EventBus::new();
        let id_a = bus.subscribe("T1", Arc::new(|_| Ok(())));
        let _id_b = bus.subscribe("T1", Arc::new(|_| Ok(())));

        bus.unsubscribe("T1", id_a);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_all_clears_single_key() {
        let bus = EventBus::new();
        bus.subscribe("T1", Arc::new(|_| Ok(())));
        bus.subscribe("T2", Arc::new(|_| Ok(())));

        let cleared = bus.unsubscribe_all(Some("T1"));
        assert_eq!(cleared, 1);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_all_with_no_key_clears_everything() {
        let bus = EventBus::new();
        bus.subscribe("T1", Arc::new(|_| Ok(())));
        bus.subscribe("T2", Arc::new(|_| Ok(())));

        let cleared = bus.unsubscribe_all(None);
        assert_eq!(cleared, 2);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
