use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use freqdash_core::events::EventKind;
use freqdash_core::{AggregateSnapshot, ConnectionState};
use freqdash_sync::{ConnectionManager, DashboardSync, Subscription};

use crate::client::ClientRegistry;

/// Frames pushed to dashboard sockets.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    Snapshot {
        data: AggregateSnapshot,
    },
    Connection {
        state: ConnectionState,
        url: Option<String>,
        #[serde(rename = "reconnectAttempts")]
        reconnect_attempts: u32,
    },
    Event {
        event: String,
        data: Value,
    },
}

impl PushFrame {
    pub fn connection(manager: &ConnectionManager) -> Self {
        Self::Connection {
            state: manager.state(),
            url: manager.url(),
            reconnect_attempts: manager.reconnect_attempts(),
        }
    }

    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize push frame");
                None
            }
        }
    }
}

/// Forwards snapshot changes, connection state changes and engine events
/// to every connected dashboard socket.
pub struct PushBridge {
    tasks: Vec<JoinHandle<()>>,
    _subscriptions: Vec<Subscription>,
}

impl PushBridge {
    pub fn start(registry: Arc<ClientRegistry>, sync: &DashboardSync) -> Self {
        let snapshots = spawn_snapshot_forwarder(Arc::clone(&registry), sync.aggregator().subscribe());
        let states = spawn_state_forwarder(
            Arc::clone(&registry),
            Arc::clone(sync.connection()),
            sync.connection().watch_state(),
        );

        let subscriptions = EventKind::ENGINE
            .iter()
            .map(|kind| {
                let registry = Arc::clone(&registry);
                let event = kind.as_str();
                sync.router().subscribe(event, move |payload| {
                    let frame = PushFrame::Event {
                        event: event.to_string(),
                        data: payload.clone(),
                    };
                    if let Some(json) = frame.to_json() {
                        let delivered = registry.broadcast_all(&json);
                        tracing::trace!(event, delivered, "engine event pushed");
                    }
                })
            })
            .collect();

        Self {
            tasks: vec![snapshots, states],
            _subscriptions: subscriptions,
        }
    }
}

impl Drop for PushBridge {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn spawn_snapshot_forwarder(
    registry: Arc<ClientRegistry>,
    mut rx: watch::Receiver<AggregateSnapshot>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let frame = PushFrame::Snapshot {
                data: rx.borrow_and_update().clone(),
            };
            if let Some(json) = frame.to_json() {
                let _ = registry.broadcast_all(&json);
            }
        }
        tracing::debug!("snapshot channel closed");
    })
}

fn spawn_state_forwarder(
    registry: Arc<ClientRegistry>,
    manager: Arc<ConnectionManager>,
    mut rx: watch::Receiver<ConnectionState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let _ = rx.borrow_and_update();
            if let Some(json) = PushFrame::connection(&manager).to_json() {
                let _ = registry.broadcast_all(&json);
            }
        }
        tracing::debug!("connection state channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_are_tagged() {
        let frame = PushFrame::Event {
            event: "trade_update".into(),
            data: json!({"pair": "BTC/USDT"}),
        };
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "event", "event": "trade_update", "data": {"pair": "BTC/USDT"}}));

        let frame = PushFrame::Connection {
            state: ConnectionState::Reconnecting,
            url: Some("ws://localhost:5000".into()),
            reconnect_attempts: 2,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "connection");
        assert_eq!(value["state"], "reconnecting");
        assert_eq!(value["reconnectAttempts"], 2);

        let value = serde_json::to_value(PushFrame::Snapshot {
            data: AggregateSnapshot::default(),
        })
        .unwrap();
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["data"]["engineStatus"], "unknown");
    }
}
