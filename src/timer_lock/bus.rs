use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::timer_lock::event::TimerEvent;

/// Receiver of timer lifecycle events
///
/// `on_event` runs synchronously on the publishing path, so implementations
/// must return quickly and hand any slow work (process spawns, I/O) to a
/// background task. Publishing back into the bus from `on_event` is not
/// supported.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: &TimerEvent);

    /// Name used in logs
    fn name(&self) -> &'static str {
        "subscriber"
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    subscriber: Weak<dyn Subscriber>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

/// In-process publish/subscribe fan-out for [`TimerEvent`]s
///
/// Subscribers are held weakly: the bus never keeps a subscriber alive, and a
/// dropped subscriber is pruned on the next publish. Delivery happens in
/// registration order on the caller's thread.
#[derive(Default)]
pub struct EventBus {
    registry: Mutex<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber
    ///
    /// Subscribing the same instance twice returns the existing id.
    pub fn subscribe(&self, subscriber: &Arc<dyn Subscriber>) -> SubscriptionId {
        let mut registry = self.lock();

        let existing = registry
            .entries
            .iter()
            .find(|e| std::ptr::addr_eq(e.subscriber.as_ptr(), Arc::as_ptr(subscriber)));
        if let Some(entry) = existing {
            return entry.id;
        }

        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.entries.push(Entry {
            id,
            subscriber: Arc::downgrade(subscriber),
        });

        tracing::debug!("Subscribed {} to timer events", subscriber.name());
        id
    }

    /// Remove a subscriber; unknown ids are ignored
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().entries.retain(|e| e.id != id);
    }

    /// Number of registered subscribers that are still alive
    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.subscriber.strong_count() > 0)
            .count()
    }

    /// Deliver an event to every subscriber registered at the time of the call
    ///
    /// Subscribers added while delivery is in progress do not see this event.
    /// A subscriber removed while delivery is in progress is skipped if it has
    /// not been reached yet.
    pub fn publish(&self, event: &TimerEvent) {
        let snapshot: Vec<(SubscriptionId, Weak<dyn Subscriber>)> = self
            .lock()
            .entries
            .iter()
            .map(|e| (e.id, e.subscriber.clone()))
            .collect();

        let mut saw_dead = false;

        for (id, weak) in snapshot {
            if !self.is_registered(id) {
                continue;
            }

            match weak.upgrade() {
                Some(subscriber) => subscriber.on_event(event),
                None => saw_dead = true,
            }
        }

        if saw_dead {
            self.lock().entries.retain(|e| e.subscriber.strong_count() > 0);
        }
    }

    fn is_registered(&self, id: SubscriptionId) -> bool {
        self.lock().entries.iter().any(|e| e.id == id)
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
