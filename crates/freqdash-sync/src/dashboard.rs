use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use freqdash_core::SyncError;
use freqdash_settings::DashSettings;

use crate::aggregator::{AggregatorConfig, SnapshotAggregator};
use crate::bridge::InvalidationBridge;
use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::router::EventRouter;
use crate::transport::{Transport, WsTransport};
use crate::upstream::{EngineApi, HttpEngineApi};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub url: String,
    pub connection: ConnectionConfig,
    pub aggregator: AggregatorConfig,
}

impl From<&DashSettings> for SyncConfig {
    fn from(settings: &DashSettings) -> Self {
        Self {
            url: settings.connection.url.clone(),
            connection: ConnectionConfig::from(&settings.connection),
            aggregator: AggregatorConfig::from(&settings.polling),
        }
    }
}

/// The assembled sync layer: one router, one push connection, one
/// aggregator, and the bridge between them.
pub struct DashboardSync {
    url: String,
    router: Arc<EventRouter>,
    connection: Arc<ConnectionManager>,
    aggregator: Arc<SnapshotAggregator>,
    bridge: Mutex<Option<InvalidationBridge>>,
}

impl DashboardSync {
    pub fn new(transport: Arc<dyn Transport>, api: Arc<dyn EngineApi>, config: SyncConfig) -> Self {
        let router = EventRouter::new();
        let connection = Arc::new(ConnectionManager::new(transport, Arc::clone(&router), config.connection));
        let aggregator = SnapshotAggregator::new(api, config.aggregator);
        Self {
            url: config.url,
            router,
            connection,
            aggregator,
            bridge: Mutex::new(None),
        }
    }

    /// Wire the production websocket transport and HTTP client.
    pub fn from_settings(settings: &DashSettings) -> Result<Self, SyncError> {
        let transport = WsTransport::new(Duration::from_millis(settings.connection.connect_timeout_ms));
        let api = HttpEngineApi::new(&settings.api)?;
        Ok(Self::new(Arc::new(transport), Arc::new(api), SyncConfig::from(settings)))
    }

    /// Start polling, install the bridge, then connect. Calling again while
    /// running is a no-op. Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut bridge = self.bridge.lock();
        if bridge.is_some() {
            return;
        }
        self.aggregator.start();
        *bridge = Some(InvalidationBridge::start(&self.router, &self.aggregator));
        self.connection.connect(&self.url);
        info!(url = %self.url, "dashboard sync started");
    }

    /// Tear everything down in reverse order. Idempotent.
    pub fn shutdown(&self) {
        let Some(bridge) = self.bridge.lock().take() else {
            return;
        };
        bridge.shutdown();
        self.connection.disconnect();
        self.aggregator.shutdown();
        self.router.clear();
        info!("dashboard sync stopped");
    }

    pub fn is_running(&self) -> bool {
        self.bridge.lock().is_some()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn aggregator(&self) -> &Arc<SnapshotAggregator> {
        &self.aggregator
    }
}

impl Drop for DashboardSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}
