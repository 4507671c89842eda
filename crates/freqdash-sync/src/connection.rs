//! Push connection lifecycle with bounded fixed-delay reconnection.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use freqdash_core::events::{self, EventKind};
use freqdash_core::{ConnectionState, SyncError};
use freqdash_settings::ConnectionSettings;

use crate::router::EventRouter;
use crate::transport::{reason, Inbound, Link, Transport};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Reconnection attempts after an unexpected close or failed open.
    /// The initial open of a `connect` does not count.
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&ConnectionSettings> for ConnectionConfig {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            max_reconnect_attempts: settings.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(settings.reconnect_delay_ms),
        }
    }
}

struct Outbound {
    event: String,
    payload: Value,
    ack: oneshot::Sender<Result<(), SyncError>>,
}

#[derive(Default)]
struct Session {
    url: Option<String>,
    /// Bumped on every connect/disconnect; tasks from older generations
    /// must not touch state.
    generation: u64,
    attempts: u32,
    cancel: Option<CancellationToken>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    router: Arc<EventRouter>,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
}

/// Owns the single logical push connection.
///
/// Lifecycle events (`connect`, `disconnect`, `error`, `reconnect_attempt`)
/// are emitted on the router; engine events received on the link are
/// forwarded to it verbatim. State changes always precede the matching
/// emit, so handlers observe the new state.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, router: Arc<EventRouter>, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                transport,
                router,
                config,
                state,
                session: Mutex::new(Session::default()),
            }),
        }
    }

    /// Open the connection to `url`.
    ///
    /// No-op while already connected or connecting to the same url. Any
    /// other existing connection is torn down first. Resets the attempt
    /// counter, so this is also how a `Failed` connection is resumed.
    /// Must be called within a tokio runtime.
    pub fn connect(&self, url: &str) {
        let (generation, token, was_connected) = {
            let mut session = self.shared.session.lock();
            let current = *self.shared.state.borrow();
            if session.url.as_deref() == Some(url)
                && matches!(current, ConnectionState::Connected | ConnectionState::Connecting)
            {
                debug!(url, state = %current, "connect ignored, already active");
                return;
            }

            if let Some(previous) = session.cancel.take() {
                previous.cancel();
            }
            session.generation += 1;
            session.attempts = 0;
            session.url = Some(url.to_string());
            session.outbound = None;
            let token = CancellationToken::new();
            session.cancel = Some(token.clone());

            let previous = self.shared.state.send_replace(ConnectionState::Connecting);
            (session.generation, token, previous == ConnectionState::Connected)
        };

        if was_connected {
            self.shared.emit_disconnect(reason::CLIENT_DISCONNECT);
        }
        info!(url, "connecting");
        tokio::spawn(run(Arc::clone(&self.shared), url.to_string(), generation, token));
    }

    /// Tear the connection down. No automatic reconnection follows.
    pub fn disconnect(&self) {
        let was_connected = {
            let mut session = self.shared.session.lock();
            session.generation += 1;
            session.attempts = 0;
            session.outbound = None;
            if let Some(token) = session.cancel.take() {
                token.cancel();
            }
            self.shared.state.send_replace(ConnectionState::Disconnected) == ConnectionState::Connected
        };

        if was_connected {
            info!("disconnected by client");
            self.shared.emit_disconnect(reason::CLIENT_DISCONNECT);
        }
    }

    /// Send an application event to the engine over the live link.
    pub async fn send(&self, event: &str, payload: Value) -> Result<(), SyncError> {
        let sender = self
            .shared
            .session
            .lock()
            .outbound
            .clone()
            .ok_or(SyncError::NotConnected)?;

        let (ack, done) = oneshot::channel();
        sender
            .send(Outbound {
                event: event.to_string(),
                payload,
                ack,
            })
            .map_err(|_| SyncError::NotConnected)?;
        done.await.map_err(|_| SyncError::NotConnected)?
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.session.lock().attempts
    }

    /// The url of the most recent `connect`.
    pub fn url(&self) -> Option<String> {
        self.shared.session.lock().url.clone()
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.shared.router
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(token) = self.shared.session.lock().cancel.take() {
            token.cancel();
        }
    }
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send_replace(state);
    }

    fn begin_attempt(&self, generation: u64) -> Option<u32> {
        let mut session = self.session.lock();
        if session.generation != generation {
            return None;
        }
        session.attempts += 1;
        self.set_state(ConnectionState::Reconnecting);
        Some(session.attempts)
    }

    fn on_open(&self, generation: u64, outbound: mpsc::UnboundedSender<Outbound>) -> bool {
        let mut session = self.session.lock();
        if session.generation != generation {
            return false;
        }
        session.attempts = 0;
        session.outbound = Some(outbound);
        self.set_state(ConnectionState::Connected);
        true
    }

    fn after_close(&self, generation: u64) -> Option<ConnectionState> {
        let mut session = self.session.lock();
        if session.generation != generation {
            return None;
        }
        session.outbound = None;
        let next = if self.config.max_reconnect_attempts == 0 {
            ConnectionState::Failed
        } else {
            ConnectionState::Reconnecting
        };
        self.set_state(next);
        Some(next)
    }

    fn after_failure(&self, generation: u64) -> Option<(ConnectionState, u32)> {
        let session = self.session.lock();
        if session.generation != generation {
            return None;
        }
        let next = if session.attempts >= self.config.max_reconnect_attempts {
            ConnectionState::Failed
        } else {
            ConnectionState::Reconnecting
        };
        self.set_state(next);
        Some((next, session.attempts))
    }

    fn emit_disconnect(&self, reason: &str) {
        self.router.emit(events::DISCONNECT, &json!({ "reason": reason }));
    }

    fn forward(&self, name: &str, payload: &Value) {
        match EventKind::from_name(name) {
            Some(kind) if kind.is_engine_event() => {
                let handled = self.router.emit(name, payload);
                debug!(event = name, handled, "engine event routed");
            }
            _ => debug!(event = name, "ignoring unrecognized inbound event"),
        }
    }
}

/// Connection task for one `connect` generation.
async fn run(shared: Arc<Shared>, url: String, generation: u64, token: CancellationToken) {
    let mut reconnecting = false;

    loop {
        if reconnecting {
            let Some(attempt) = shared.begin_attempt(generation) else {
                return;
            };
            info!(url = %url, attempt, max = shared.config.max_reconnect_attempts, "reconnecting");
            shared
                .router
                .emit(events::RECONNECT_ATTEMPT, &json!({ "attempt": attempt }));
        }

        let opened = tokio::select! {
            _ = token.cancelled() => return,
            opened = shared.transport.open(&url) => opened,
        };

        match opened {
            Ok(mut link) => {
                let (tx, rx) = mpsc::unbounded_channel();
                if !shared.on_open(generation, tx) {
                    link.close().await;
                    return;
                }
                info!(url = %url, "connected");
                shared.router.emit(events::CONNECT, &json!({ "url": url }));

                let Some(close_reason) = pump(&shared, link.as_mut(), rx, &token).await else {
                    link.close().await;
                    return;
                };
                let Some(next) = shared.after_close(generation) else {
                    return;
                };
                warn!(url = %url, reason = %close_reason, "connection lost");
                shared.emit_disconnect(&close_reason);
                if next == ConnectionState::Failed {
                    return;
                }
            }
            Err(e) => {
                let Some((next, attempt)) = shared.after_failure(generation) else {
                    return;
                };
                warn!(url = %url, attempt, error = %e, kind = e.error_kind(), "connection attempt failed");
                shared.router.emit(
                    events::ERROR,
                    &json!({ "message": e.to_string(), "attempt": attempt }),
                );
                if next == ConnectionState::Failed {
                    warn!(url = %url, attempts = attempt, "reconnection attempts exhausted");
                    return;
                }
            }
        }

        reconnecting = true;
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(shared.config.reconnect_delay) => {}
        }
    }
}

enum Step {
    Send(Outbound),
    Receive(Inbound),
}

/// Drive a live link until it closes (`Some(reason)`) or the session is
/// cancelled (`None`).
async fn pump(
    shared: &Shared,
    link: &mut dyn Link,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    token: &CancellationToken,
) -> Option<String> {
    loop {
        let step = tokio::select! {
            _ = token.cancelled() => return None,
            Some(message) = outbound.recv() => Step::Send(message),
            inbound = link.next() => Step::Receive(inbound),
        };

        match step {
            Step::Send(Outbound { event, payload, ack }) => {
                let _ = ack.send(link.send(&event, payload).await);
            }
            Step::Receive(Inbound::Event { name, payload }) => shared.forward(&name, &payload),
            Step::Receive(Inbound::Closed { reason }) => return Some(reason),
        }
    }
}
