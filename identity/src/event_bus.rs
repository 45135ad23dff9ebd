//! # Event Bus
//!
//! Priority-ordered, in-process pub/sub for [`IdentityEvent`]. Delivery is
//! asynchronous relative to the publisher - `publish` spawns one task per
//! registered subscriber via `tokio::spawn` and returns immediately, per
//! spec.md §4.F / §9 ("event bus is async-but-in-process": no message
//! broker, no cross-process delivery, but the caller never blocks waiting
//! on a subscriber). One subscriber's panic or error is isolated from every
//! other.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{EventFilter, IdentityEvent};

/// A registered listener. Implementations should be cheap and fast;
/// anything slow (an outbound HTTP call, a database write) should hand off
/// to its own task rather than block the dispatch loop.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn handle(&self, event: &IdentityEvent);
}

struct Subscription {
    id: Uuid,
    priority: i32,
    filter: EventFilter,
    subscriber: Arc<dyn EventSubscriber>,
}

/// Thread-safe registry of subscriptions, shared by every realm's services
/// via `Arc<EventBus>`.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for one event kind, or every kind via
    /// [`EventFilter::All`]. Higher `priority` values are dispatched first
    /// (spec.md §4.F: "decreasing priority order"). Returns an id that
    /// [`EventBus::unsubscribe`] accepts - spec.md's "unsubscribe(subscriber)"
    /// wording assumes reference-identity semantics Rust's `Arc<dyn Trait>`
    /// doesn't give us cheaply, so this crate hands back a token instead.
    pub fn subscribe(
        &self,
        filter: EventFilter,
        priority: i32,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let mut subs = self.subscriptions.write();
        subs.push(Subscription {
            id,
            priority,
            filter,
            subscriber,
        });
        subs.sort_by_key(|s| std::cmp::Reverse(s.priority));
        id
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscriptions.write().retain(|s| s.id != id);
    }

    /// Dispatches `event` to every matching subscriber. `publish` itself
    /// returns immediately (spec.md §4.F: "publish returns immediately") by
    /// spawning a single task that then drains the matching subscribers in
    /// priority order - a single event's delivery order is otherwise
    /// unenforceable once subscribers run as independent
    /// concurrently-scheduled tasks (spec.md §5: "Event delivery preserves
    /// per-subscriber priority order for a single event"). Each subscriber
    /// still runs on its own spawned task, awaited before moving to the
    /// next, so a panicking handler surfaces as a `JoinError` that is
    /// logged rather than unwinding into (and skipping) the remaining
    /// subscribers of this event (spec.md §4.F exception isolation).
    pub fn publish(&self, event: IdentityEvent) {
        let event = Arc::new(event);
        let matching: Vec<Arc<dyn EventSubscriber>> = {
            let subs = self.subscriptions.read();
            subs.iter()
                .filter(|s| s.filter.matches(&event))
                .map(|s| s.subscriber.clone())
                .collect()
        };
        tokio::spawn(async move {
            for subscriber in matching {
                let event = event.clone();
                let handle = tokio::spawn(async move { subscriber.handle(&event).await });
                if let Err(join_error) = handle.await {
                    tracing::warn!(error = %join_error, "event subscriber panicked");
                }
            }
        });
    }

    /// Test/diagnostic helper: dispatches sequentially on the calling task
    /// and waits for every matching subscriber to finish, so assertions can
    /// run immediately afterward without a manual yield.
    pub async fn publish_and_wait(&self, event: IdentityEvent) {
        let matching: Vec<Arc<dyn EventSubscriber>> = {
            let subs = self.subscriptions.read();
            subs.iter()
                .filter(|s| s.filter.matches(&event))
                .map(|s| s.subscriber.clone())
                .collect()
        };
        for subscriber in matching {
            subscriber.handle(&event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_event() -> IdentityEvent {
        IdentityEvent::UserCreated {
            event_id: Uuid::new_v4(),
            realm: "realm-a".into(),
            occurred_at: Utc::now(),
            user_id: Uuid::new_v4(),
        }
    }

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSubscriber for Recorder {
        async fn handle(&self, event: &IdentityEvent) {
            self.seen.lock().push(event.kind().to_string());
        }
    }

    #[tokio::test]
    async fn filtered_subscriber_only_sees_matching_kind() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(EventFilter::Kind("UserDeleted"), 0, recorder.clone());
        bus.publish_and_wait(sample_event()).await;
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn wildcard_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        bus.subscribe(EventFilter::All, 0, recorder.clone());
        bus.publish_and_wait(sample_event()).await;
        assert_eq!(recorder.seen.lock().as_slice(), ["UserCreated"]);
    }

    #[tokio::test]
    async fn dispatch_order_follows_priority() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        struct Tagged(Arc<Mutex<Vec<&'static str>>>, &'static str);
        #[async_trait]
        impl EventSubscriber for Tagged {
            async fn handle(&self, _event: &IdentityEvent) {
                self.0.lock().push(self.1);
            }
        }

        bus.subscribe(EventFilter::All, 10, Arc::new(Tagged(order.clone(), "first")));
        bus.subscribe(EventFilter::All, 0, Arc::new(Tagged(order.clone(), "second")));
        bus.publish_and_wait(sample_event()).await;
        assert_eq!(order.lock().as_slice(), ["first", "second"]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let id = bus.subscribe(EventFilter::All, 0, recorder.clone());
        bus.unsubscribe(id);
        bus.publish_and_wait(sample_event()).await;
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn one_subscriber_failing_does_not_block_another() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        struct Panicker;
        #[async_trait]
        impl EventSubscriber for Panicker {
            async fn handle(&self, _event: &IdentityEvent) {
                panic!("boom");
            }
        }
        struct Counter(Arc<AtomicUsize>);
        #[async_trait]
        impl EventSubscriber for Counter {
            async fn handle(&self, _event: &IdentityEvent) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        // Panicker is dispatched first (higher priority); Counter must still
        // run afterwards despite the panic ahead of it in delivery order.
        bus.subscribe(EventFilter::All, 1, Arc::new(Panicker));
        bus.subscribe(EventFilter::All, 0, Arc::new(Counter(hits.clone())));
        bus.publish(sample_event());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
