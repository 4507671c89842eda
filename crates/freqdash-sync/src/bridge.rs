use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info};

use freqdash_core::events::EventKind;
use freqdash_core::Field;

use crate::aggregator::SnapshotAggregator;
use crate::router::{EventRouter, Subscription};

/// Fields made stale by each engine event.
pub fn invalidated_fields(kind: EventKind) -> &'static [Field] {
    match kind {
        EventKind::TradeUpdate => &[
            Field::OpenTradeCount,
            Field::PnlAbsolute,
            Field::PnlPercent,
            Field::TodayTradeCount,
            Field::WinRate,
        ],
        EventKind::BalanceUpdate => &[Field::Balance],
        EventKind::StatusUpdate => &[Field::EngineStatus],
        _ => &[],
    }
}

/// Turns engine events into targeted aggregator refreshes.
///
/// Payloads are ignored; an event only says which fields are stale. The
/// refresh runs as a task on the runtime that installed the bridge.
pub struct InvalidationBridge {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl InvalidationBridge {
    /// Subscribe to every engine event. Must be called within a tokio runtime.
    pub fn start(router: &Arc<EventRouter>, aggregator: &Arc<SnapshotAggregator>) -> Self {
        let runtime = Handle::current();
        let subscriptions = EventKind::ENGINE
            .iter()
            .map(|kind| {
                let kind = *kind;
                let fields = invalidated_fields(kind);
                let aggregator = Arc::downgrade(aggregator);
                let runtime = runtime.clone();
                router.subscribe(kind.as_str(), move |_payload| {
                    let Some(aggregator) = aggregator.upgrade() else {
                        return;
                    };
                    debug!(event = %kind, ?fields, "invalidating");
                    runtime.spawn(async move {
                        aggregator.refresh(fields).await;
                    });
                })
            })
            .collect();

        info!("invalidation bridge installed");
        Self {
            subscriptions: Mutex::new(subscriptions),
        }
    }

    /// Dispose every subscription. Safe to call more than once.
    pub fn shutdown(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        if subscriptions.is_empty() {
            return;
        }
        for subscription in subscriptions {
            subscription.dispose();
        }
        info!("invalidation bridge removed");
    }

    pub fn is_active(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }
}
