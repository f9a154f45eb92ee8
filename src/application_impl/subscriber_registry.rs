use crate::application_port::*;
use dashmap::DashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

struct Subscriber {
    id: u64,
    callback: EventCallback,
}

/// Event name to ordered callback list.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(self: &Arc<Self>, event: &str, callback: EventCallback) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(event.to_owned())
            .or_default()
            .push(Subscriber { id, callback });

        Unsubscribe {
            registry: Arc::downgrade(self),
            event: event.to_owned(),
            id,
        }
    }

    /// Removes the first registration of `callback` under `event`.
    pub fn off(&self, event: &str, callback: &EventCallback) -> bool {
        self.remove_where(event, |s| Arc::ptr_eq(&s.callback, callback))
    }

    fn remove_id(&self, event: &str, id: u64) -> bool {
        self.remove_where(event, |s| s.id == id)
    }

    fn remove_where(&self, event: &str, pred: impl Fn(&Subscriber) -> bool) -> bool {
        let (removed, now_empty) = match self.subscribers.get_mut(event) {
            Some(mut subs) => match subs.iter().position(|s| pred(s)) {
                Some(index) => {
                    subs.remove(index);
                    (true, subs.is_empty())
                }
                None => (false, false),
            },
            None => return false,
        };
        if now_empty {
            self.subscribers.remove_if(event, |_, subs| subs.is_empty());
        }
        removed
    }

    /// Invokes every callback registered for `event`, in registration order,
    /// and returns how many ran. The list is snapshotted first so callbacks
    /// may subscribe or unsubscribe freely. A panicking callback is logged and
    /// does not stop the others.
    pub fn dispatch(&self, event: &str, payload: &serde_json::Value) -> usize {
        let snapshot: Vec<EventCallback> = match self.subscribers.get(event) {
            Some(subs) => subs.iter().map(|s| s.callback.clone()).collect(),
            None => {
                tracing::trace!(event, "no subscribers");
                return 0;
            }
        };

        for callback in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                tracing::error!(event, "event callback panicked");
            }
        }
        snapshot.len()
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscribers.get(event).map(|s| s.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.subscribers.clear();
    }
}

/// Handle returned by `on()`. Dropping it keeps the subscription alive.
#[derive(Debug, Clone)]
pub struct Unsubscribe {
    registry: Weak<SubscriberRegistry>,
    event: String,
    id: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove_id(&self.event, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> EventCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |name: &'static str| {
            let log = log_clone.clone();
            callback(move |_| log.lock().unwrap().push(name.to_string()))
        };
        (log, make)
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let registry = SubscriberRegistry::new();
        let (log, make) = recorder();

        let first = registry.on("analysis:progress", make("first"));
        let _second = registry.on("analysis:progress", make("second"));

        assert_eq!(registry.dispatch("analysis:progress", &json!({})), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);

        assert!(first.unsubscribe());
        registry.dispatch("analysis:progress", &json!({}));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "second"]);
    }

    #[test]
    fn unsubscribe_is_exact_and_idempotent() {
        let registry = SubscriberRegistry::new();
        let (log, make) = recorder();
        let cb = make("shared");

        let a = registry.on("e", cb.clone());
        let _b = registry.on("e", cb.clone());
        assert!(a.unsubscribe());
        assert!(!a.unsubscribe());
        assert_eq!(registry.subscriber_count("e"), 1);

        registry.dispatch("e", &json!(null));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn off_removes_by_identity() {
        let registry = SubscriberRegistry::new();
        let (_log, make) = recorder();
        let kept = make("kept");
        let dropped = make("dropped");

        registry.on("e", kept.clone());
        registry.on("e", dropped.clone());

        assert!(registry.off("e", &dropped));
        assert!(!registry.off("e", &dropped));
        assert!(!registry.off("other", &kept));
        assert_eq!(registry.subscriber_count("e"), 1);

        assert!(registry.off("e", &kept));
        assert_eq!(registry.subscriber_count("e"), 0);
    }

    #[test]
    fn panicking_callback_does_not_block_others() {
        let registry = SubscriberRegistry::new();
        let (log, make) = recorder();

        registry.on("e", callback(|_| panic!("subscriber bug")));
        registry.on("e", make("survivor"));

        assert_eq!(registry.dispatch("e", &json!({})), 2);
        assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
    }

    #[test]
    fn unsubscribing_during_dispatch_skips_nothing() {
        let registry = SubscriberRegistry::new();
        let (log, make) = recorder();

        let handle: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
        let handle_clone = handle.clone();
        let log_clone = log.clone();
        let self_removing = registry.on(
            "e",
            callback(move |_| {
                log_clone.lock().unwrap().push("once".to_string());
                if let Some(h) = handle_clone.lock().unwrap().as_ref() {
                    h.unsubscribe();
                }
            }),
        );
        *handle.lock().unwrap() = Some(self_removing);
        registry.on("e", make("after"));

        registry.dispatch("e", &json!({}));
        registry.dispatch("e", &json!({}));
        assert_eq!(*log.lock().unwrap(), vec!["once", "after", "after"]);
    }

    #[test]
    fn payload_reaches_callback_verbatim() {
        let registry = SubscriberRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        registry.on(
            "e",
            callback(move |data| *seen_clone.lock().unwrap() = Some(data.clone())),
        );

        let payload = json!({ "analysisRequestId": "r1", "progress": 10 });
        registry.dispatch("e", &payload);
        assert_eq!(seen.lock().unwrap().clone(), Some(payload));
    }

    #[test]
    fn unknown_event_is_ignored_and_clear_drops_everything() {
        let registry = SubscriberRegistry::new();
        let (_log, make) = recorder();
        let handle = registry.on("e", make("x"));

        assert_eq!(registry.dispatch("nobody-listens", &json!({})), 0);

        registry.clear();
        assert_eq!(registry.subscriber_count("e"), 0);
        assert!(!handle.unsubscribe());
    }
}
