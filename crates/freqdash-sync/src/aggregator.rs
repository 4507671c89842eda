//! Merge-tolerant aggregation of the engine's read endpoints.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use freqdash_core::{AggregateSnapshot, Endpoint, EndpointResult, EndpointUpdate, Field, Issued, MergeOutcome};
use freqdash_settings::PollingSettings;

use crate::upstream::EngineApi;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub poll_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl From<&PollingSettings> for AggregatorConfig {
    fn from(settings: &PollingSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.interval_ms),
        }
    }
}

/// What one `poll`/`refresh` did, per endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub updated: Vec<Endpoint>,
    pub failed: Vec<Endpoint>,
    /// Results discarded because a newer value was already shown.
    pub stale: Vec<Endpoint>,
    /// Requests served by a call another cycle issued.
    pub coalesced: Vec<Endpoint>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.coalesced.is_empty()
    }
}

/// Per-endpoint coalescing lane.
///
/// `requested` counts arrivals; `served` is the highest arrival ticket
/// already covered by a finished call. Calls on a lane are serialized by
/// `gate`, and a call covers every request that arrived before it was
/// issued. The ticket a call covers up to strictly grows from call to
/// call and doubles as its issue sequence.
#[derive(Default)]
struct Lane {
    gate: tokio::sync::Mutex<()>,
    requested: AtomicU64,
    served: AtomicU64,
}

/// Keeps the aggregate snapshot current by polling and targeted refreshes.
pub struct SnapshotAggregator {
    api: Arc<dyn EngineApi>,
    config: AggregatorConfig,
    snapshot: watch::Sender<AggregateSnapshot>,
    lanes: [Lane; 4],
    in_flight: AtomicUsize,
    timer: parking_lot::Mutex<Option<CancellationToken>>,
}

impl SnapshotAggregator {
    pub fn new(api: Arc<dyn EngineApi>, config: AggregatorConfig) -> Arc<Self> {
        let (snapshot, _) = watch::channel(AggregateSnapshot::default());
        Arc::new(Self {
            api,
            config,
            snapshot,
            lanes: Default::default(),
            in_flight: AtomicUsize::new(0),
            timer: parking_lot::Mutex::new(None),
        })
    }

    /// Fetch every endpoint concurrently and merge the results.
    pub async fn poll(&self) -> CycleReport {
        self.run_cycle(Endpoint::ALL.to_vec()).await
    }

    /// Re-fetch only the endpoints owning `fields`.
    pub async fn refresh(&self, fields: &[Field]) -> CycleReport {
        self.run_cycle(Endpoint::owners_of(fields)).await
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot mutation.
    pub fn subscribe(&self) -> watch::Receiver<AggregateSnapshot> {
        self.snapshot.subscribe()
    }

    /// Start periodic polling. The first poll runs immediately. No-op if
    /// already running.
    pub fn start(self: &Arc<Self>) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *timer = Some(token.clone());

        let period = self.config.poll_interval;
        let weak = Arc::downgrade(self);
        info!(interval_ms = period.as_millis() as u64, "polling started");
        tokio::spawn(poll_loop(weak, period, token));
    }

    /// Stop periodic polling. Calls already issued run to completion.
    pub fn shutdown(&self) {
        if let Some(token) = self.timer.lock().take() {
            token.cancel();
            info!("polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    async fn run_cycle(&self, endpoints: Vec<Endpoint>) -> CycleReport {
        if endpoints.is_empty() {
            return CycleReport::default();
        }

        let _ = self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.snapshot.send_modify(|snap| snap.loading = true);

        let outcomes = join_all(endpoints.iter().map(|endpoint| self.fetch_coalesced(*endpoint))).await;

        let mut report = CycleReport::default();
        let mut last_failure = None;
        for (endpoint, outcome) in endpoints.into_iter().zip(outcomes) {
            match outcome {
                None => report.coalesced.push(endpoint),
                Some(MergeOutcome::Applied(_)) => report.updated.push(endpoint),
                Some(MergeOutcome::Stale(_)) => report.stale.push(endpoint),
                Some(MergeOutcome::Failed { reason, .. }) => {
                    report.failed.push(endpoint);
                    last_failure = Some(reason);
                }
            }
        }

        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        self.snapshot.send_modify(|snap| {
            if let Some(reason) = last_failure {
                snap.error = Some(reason);
            } else if report.is_clean() {
                snap.error = None;
            }
            snap.loading = remaining > 0;
        });

        debug!(
            updated = report.updated.len(),
            failed = report.failed.len(),
            stale = report.stale.len(),
            coalesced = report.coalesced.len(),
            "cycle settled"
        );
        report
    }

    /// Fetch and merge one endpoint, or return `None` if a call issued
    /// after this request arrived has already been merged.
    async fn fetch_coalesced(&self, endpoint: Endpoint) -> Option<MergeOutcome> {
        let lane = &self.lanes[endpoint.index()];
        let ticket = lane.requested.fetch_add(1, Ordering::SeqCst) + 1;

        let _gate = lane.gate.lock().await;
        if lane.served.load(Ordering::SeqCst) >= ticket {
            debug!(endpoint = %endpoint, ticket, "request coalesced");
            return None;
        }
        let covers = lane.requested.load(Ordering::SeqCst);

        let update = self.fetch(endpoint, Issued::now(covers)).await;
        let mut outcome = MergeOutcome::Stale(endpoint);
        self.snapshot.send_modify(|snap| outcome = snap.apply(&update));
        lane.served.store(covers, Ordering::SeqCst);

        match &outcome {
            MergeOutcome::Applied(_) => debug!(endpoint = %endpoint, "endpoint merged"),
            MergeOutcome::Failed { reason, .. } => warn!(endpoint = %endpoint, reason = %reason, "endpoint failed"),
            MergeOutcome::Stale(_) => debug!(endpoint = %endpoint, "stale result discarded"),
        }
        Some(outcome)
    }

    async fn fetch(&self, endpoint: Endpoint, issued: Issued) -> EndpointUpdate {
        match endpoint {
            Endpoint::Status => EndpointUpdate::Status(EndpointResult::from_call(self.api.status().await, issued)),
            Endpoint::Balance => EndpointUpdate::Balance(EndpointResult::from_call(self.api.balance().await, issued)),
            Endpoint::Profit => EndpointUpdate::Profit(EndpointResult::from_call(self.api.profit().await, issued)),
            Endpoint::Trades => EndpointUpdate::Trades(EndpointResult::from_call(self.api.trades().await, issued)),
        }
    }
}

impl Drop for SnapshotAggregator {
    fn drop(&mut self) {
        if let Some(token) = self.timer.get_mut().take() {
            token.cancel();
        }
    }
}

async fn poll_loop(aggregator: Weak<SnapshotAggregator>, period: Duration, token: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
        let Some(aggregator) = aggregator.upgrade() else {
            break;
        };
        let report = aggregator.poll().await;
        if !report.failed.is_empty() {
            debug!(failed = ?report.failed, "scheduled poll had failures");
        }
    }
}
