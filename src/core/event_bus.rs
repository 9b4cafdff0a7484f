//! Synchronous in-process publish/subscribe hub.
//!
//! Handlers run on the publishing task, in priority order (higher first) and
//! then in subscription order. A handler that returns an error or panics is
//! reported and skipped; delivery to the remaining handlers continues.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::utils::sync::lock;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;
pub type EventHandler = Arc<dyn Fn(&BusEvent) -> HandlerResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventMetadata {
    /// Monotonic per bus.
    pub event_id: u64,
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub event_type: String,
    pub data: Value,
    pub metadata: EventMetadata,
}

/// Outcome of a single `publish` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Subscription {
    id: SubscriptionId,
    event_type: String,
    priority: i32,
    handler: EventHandler,
}

struct BusInner {
    subscriptions: Vec<Subscription>,
    history: VecDeque<BusEvent>,
    history_limit: usize,
    next_subscription_id: u64,
    next_event_id: u64,
}

pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                subscriptions: Vec::new(),
                history: VecDeque::new(),
                history_limit,
                next_subscription_id: 1,
                next_event_id: 1,
            }),
        }
    }

    pub fn publish(&self, event_type: &str, data: Value) -> DispatchReport {
        self.publish_from(event_type, data, None)
    }

    /// Publish with a `source` tag recorded in the event metadata.
    pub fn publish_from(&self, event_type: &str, data: Value, source: Option<&str>) -> DispatchReport {
        // The lock is released before any handler runs so handlers may
        // publish, subscribe or unsubscribe re-entrantly.
        let (event, handlers) = {
            let mut inner = lock(&self.inner);
            let event = BusEvent {
                event_type: event_type.to_string(),
                data,
                metadata: EventMetadata {
                    event_id: inner.next_event_id,
                    timestamp: Utc::now(),
                    source: source.map(str::to_string),
                },
            };
            inner.next_event_id += 1;

            if inner.history_limit > 0 {
                while inner.history.len() >= inner.history_limit {
                    inner.history.pop_front();
                }
                inner.history.push_back(event.clone());
            }

            let handlers: Vec<(SubscriptionId, EventHandler)> = inner
                .subscriptions
                .iter()
                .filter(|sub| sub.event_type == event_type)
                .map(|sub| (sub.id, Arc::clone(&sub.handler)))
                .collect();
            (event, handlers)
        };

        let mut report = DispatchReport::default();
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(error)) => {
                    report.failed += 1;
                    warn!(
                        event = %event.event_type,
                        subscription = id.value(),
                        error = %error,
                        "event handler failed"
                    );
                }
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        event = %event.event_type,
                        subscription = id.value(),
                        panic = panic_message(&*panic),
                        "event handler panicked"
                    );
                }
            }
        }
        report
    }

    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&BusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe_handler(event_type, Arc::new(handler), 0)
    }

    /// Subscribe a shared handler. Keep a clone of `handler` to later call
    /// [`EventBus::unsubscribe`] with it.
    pub fn subscribe_handler(
        &self,
        event_type: &str,
        handler: EventHandler,
        priority: i32,
    ) -> SubscriptionId {
        let mut inner = lock(&self.inner);
        let id = SubscriptionId(inner.next_subscription_id);
        inner.next_subscription_id += 1;

        let position = inner
            .subscriptions
            .iter()
            .position(|sub| sub.event_type == event_type && sub.priority < priority)
            .unwrap_or(inner.subscriptions.len());
        inner.subscriptions.insert(
            position,
            Subscription {
                id,
                event_type: event_type.to_string(),
                priority,
                handler,
            },
        );
        debug!(event = event_type, subscription = id.value(), priority, "subscribed");
        id
    }

    /// Remove every subscription of `handler` to `event_type`. Handlers are
    /// compared by identity, not by behavior.
    pub fn unsubscribe(&self, event_type: &str, handler: &EventHandler) -> bool {
        let target = Arc::as_ptr(handler) as *const ();
        let mut inner = lock(&self.inner);
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|sub| {
            !(sub.event_type == event_type && Arc::as_ptr(&sub.handler) as *const () == target)
        });
        before != inner.subscriptions.len()
    }

    pub fn unsubscribe_by_id(&self, id: SubscriptionId) -> bool {
        let mut inner = lock(&self.inner);
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|sub| sub.id != id);
        before != inner.subscriptions.len()
    }

    pub fn has_subscribers(&self, event_type: &str) -> bool {
        self.subscriber_count(event_type) > 0
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        lock(&self.inner)
            .subscriptions
            .iter()
            .filter(|sub| sub.event_type == event_type)
            .count()
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.inner).subscriptions.len()
    }

    /// Oldest first, bounded by the history limit.
    pub fn event_history(&self) -> Vec<BusEvent> {
        lock(&self.inner).history.iter().cloned().collect()
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<BusEvent> {
        lock(&self.inner)
            .history
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        lock(&self.inner).history.clear();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> EventHandler {
        let log = Arc::clone(log);
        Arc::new(move |event: &BusEvent| {
            lock(&log).push(format!("{tag}:{}", event.event_type));
            Ok(())
        })
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe_handler("ping", recorder(&log, "a"), 0);
        bus.subscribe_handler("ping", recorder(&log, "b"), 0);
        bus.subscribe_handler("pong", recorder(&log, "c"), 0);

        let report = bus.publish("ping", json!({}));
        assert_eq!(report.delivered, 2);
        assert_eq!(*lock(&log), vec!["a:ping", "b:ping"]);
    }

    #[test]
    fn higher_priority_runs_first_then_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe_handler("ping", recorder(&log, "low"), 0);
        bus.subscribe_handler("ping", recorder(&log, "high"), 10);
        bus.subscribe_handler("ping", recorder(&log, "low2"), 0);

        bus.publish("ping", json!(null));
        assert_eq!(*lock(&log), vec!["high:ping", "low:ping", "low2:ping"]);
    }

    #[test]
    fn failing_and_panicking_handlers_are_isolated() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("ping", |_| Err("boom".into()));
        bus.subscribe("ping", |_| panic!("handler exploded"));
        bus.subscribe_handler("ping", recorder(&log, "survivor"), 0);

        let report = bus.publish("ping", json!({}));
        assert_eq!(report, DispatchReport { delivered: 1, failed: 2 });
        assert_eq!(*lock(&log), vec!["survivor:ping"]);
    }

    #[test]
    fn unsubscribe_by_handler_and_by_id() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder(&log, "a");
        bus.subscribe_handler("ping", Arc::clone(&handler), 0);
        let other = bus.subscribe_handler("ping", recorder(&log, "b"), 0);
        assert!(bus.has_subscribers("ping"));

        assert!(bus.unsubscribe("ping", &handler));
        assert!(!bus.unsubscribe("ping", &handler));
        assert_eq!(bus.subscriber_count("ping"), 1);

        assert!(bus.unsubscribe_by_id(other));
        assert!(!bus.has_subscribers("ping"));
        assert_eq!(bus.publish("ping", json!({})).delivered, 0);
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let bus = EventBus::with_history_limit(2);
        bus.publish("one", json!(1));
        bus.publish("two", json!(2));
        bus.publish_from("three", json!(3), Some("test"));

        let history = bus.event_history();
        let names: Vec<_> = history.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(names, vec!["two", "three"]);
        assert!(history[0].metadata.event_id < history[1].metadata.event_id);
        assert_eq!(history[1].metadata.source.as_deref(), Some("test"));
        assert_eq!(bus.events_of_type("three").len(), 1);
    }

    #[test]
    fn handlers_may_publish_reentrantly() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = Arc::clone(&bus);
        bus.subscribe("outer", move |_| {
            inner_bus.publish("inner", json!({}));
            Ok(())
        });

        bus.publish("outer", json!({}));
        let names: Vec<_> = bus
            .event_history()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(names, vec!["outer", "inner"]);
    }
}
