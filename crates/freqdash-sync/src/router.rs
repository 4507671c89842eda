//! In-process publish/subscribe dispatch for push-connection events.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error};

/// Callback invoked with the event payload.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

struct Registration {
    id: u64,
    handler: Handler,
}

/// Synchronous event router.
///
/// Handlers for an event run in registration order on the emitting thread.
/// The handler list is copied before dispatch, so handlers may subscribe or
/// dispose during an emit; changes take effect from the next emit.
pub struct EventRouter {
    handlers: RwLock<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
    emit_count: AtomicU64,
}

impl EventRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            emit_count: AtomicU64::new(0),
        })
    }

    /// Register `handler` for `event`. The returned guard removes exactly
    /// this registration when disposed or dropped.
    pub fn subscribe<F>(self: &Arc<Self>, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Registration {
                id,
                handler: Arc::new(handler),
            });
        debug!(event, id, "handler subscribed");

        Subscription {
            router: Arc::downgrade(self),
            event: event.to_string(),
            id,
            active: true,
        }
    }

    /// Invoke every handler registered for `event`, in order.
    ///
    /// Returns the number of handlers invoked. A panicking handler is logged
    /// and does not stop the remaining handlers.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        let _ = self.emit_count.fetch_add(1, Ordering::Relaxed);

        let handlers: Vec<Handler> = match self.handlers.read().get(event) {
            Some(regs) => regs.iter().map(|r| Arc::clone(&r.handler)).collect(),
            None => return 0,
        };

        for handler in &handlers {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                error!(event, panic = panic_message(&panic), "event handler panicked");
            }
        }
        handlers.len()
    }

    /// Remove every handler registered for `event`.
    pub fn unsubscribe_all(&self, event: &str) {
        if let Some(regs) = self.handlers.write().remove(event) {
            debug!(event, removed = regs.len(), "cleared handlers");
        }
    }

    /// Remove every handler for every event.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Total number of emits, including those with no subscribers.
    pub fn emit_count(&self) -> u64 {
        self.emit_count.load(Ordering::Relaxed)
    }

    fn remove(&self, event: &str, id: u64) -> bool {
        let mut handlers = self.handlers.write();
        let Some(regs) = handlers.get_mut(event) else {
            return false;
        };
        let before = regs.len();
        regs.retain(|r| r.id != id);
        let removed = regs.len() != before;
        if regs.is_empty() {
            handlers.remove(event);
        }
        removed
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Disposer for one handler registration.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    router: Weak<EventRouter>,
    event: String,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the handler now. Equivalent to dropping the guard.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            if router.remove(&self.event, self.id) {
                debug!(event = %self.event, id = self.id, "handler disposed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Value) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &Value| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn emit_with_no_subscribers() {
        let router = EventRouter::new();
        assert_eq!(router.emit("trade_update", &json!({"pair": "BTC/USDT"})), 0);
        assert_eq!(router.emit_count(), 1);
        assert_eq!(router.subscriber_count("trade_update"), 0);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let router = EventRouter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                router.subscribe("balance_update", move |payload| {
                    order.lock().push((i, payload["total"].as_f64()));
                })
            })
            .collect();

        assert_eq!(router.emit("balance_update", &json!({"total": 10.5})), 3);
        assert_eq!(*order.lock(), vec![(0, Some(10.5)), (1, Some(10.5)), (2, Some(10.5))]);
        drop(subs);
    }

    #[test]
    fn disposing_one_of_two_keeps_the_other() {
        let router = EventRouter::new();
        let (count, handler) = counter();
        let handler = Arc::new(handler);

        let h1 = Arc::clone(&handler);
        let first = router.subscribe("status_update", move |p| h1(p));
        let h2 = Arc::clone(&handler);
        let _second = router.subscribe("status_update", move |p| h2(p));

        first.dispose();
        router.emit("status_update", &Value::Null);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(router.subscriber_count("status_update"), 1);
    }

    #[test]
    fn dropping_the_guard_unsubscribes() {
        let router = EventRouter::new();
        let (count, handler) = counter();
        {
            let _sub = router.subscribe("connect", handler);
            router.emit("connect", &Value::Null);
        }
        router.emit("connect", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_siblings() {
        let router = EventRouter::new();
        let (count, handler) = counter();
        let _bad = router.subscribe("trade_update", |_| panic!("handler exploded"));
        let _good = router.subscribe("trade_update", handler);

        assert_eq!(router.emit("trade_update", &Value::Null), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_during_dispatch_applies_next_emit() {
        let router = EventRouter::new();
        let (count, handler) = counter();
        let handler = Arc::new(handler);
        let late = Arc::new(Mutex::new(Vec::new()));

        let r = Arc::clone(&router);
        let late_subs = Arc::clone(&late);
        let _sub = router.subscribe("trade_update", move |_| {
            let h = Arc::clone(&handler);
            late_subs.lock().push(r.subscribe("trade_update", move |p| h(p)));
        });

        router.emit("trade_update", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        router.emit("trade_update", &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        late.lock().clear();
    }

    #[test]
    fn dispose_during_dispatch_applies_next_emit() {
        let router = EventRouter::new();
        let (count, handler) = counter();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&victim);
        let _first = router.subscribe("trade_update", move |_| {
            if let Some(sub) = slot.lock().take() {
                sub.dispose();
            }
        });
        *victim.lock() = Some(router.subscribe("trade_update", handler));

        assert_eq!(router.emit("trade_update", &Value::Null), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(router.subscriber_count("trade_update"), 1);

        assert_eq!(router.emit("trade_update", &Value::Null), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_all_then_dispose_is_harmless() {
        let router = EventRouter::new();
        let (count, handler) = counter();
        let sub = router.subscribe("error", handler);

        router.unsubscribe_all("error");
        router.unsubscribe_all("error");
        router.emit("error", &json!({"message": "boom"}));
        sub.dispose();

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(router.subscriber_count("error"), 0);
    }

    #[test]
    fn subscription_outliving_router() {
        let router = EventRouter::new();
        let sub = router.subscribe("connect", |_| {});
        assert_eq!(sub.event(), "connect");
        drop(router);
        sub.dispose();
    }
}
