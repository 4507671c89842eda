//! End-to-end: an engine event on the push link refreshes exactly the
//! affected part of the snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use freqdash_core::events;
use freqdash_core::models::{Balance, BotStatus, Profit, Trade};
use freqdash_core::{ConnectionState, Endpoint, Field, SyncError};
use freqdash_sync::{
    AggregatorConfig, ConnectionConfig, DashboardSync, EngineApi, Inbound, Link, SyncConfig, Transport,
};

struct ChannelTransport {
    links: Mutex<Vec<mpsc::UnboundedReceiver<Inbound>>>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn open(&self, _url: &str) -> Result<Box<dyn Link>, SyncError> {
        match self.links.lock().pop() {
            Some(rx) => Ok(Box::new(ChannelLink { rx })),
            None => Err(SyncError::Connection("connection refused".into())),
        }
    }
}

struct ChannelLink {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl Link for ChannelLink {
    async fn next(&mut self) -> Inbound {
        self.rx.recv().await.unwrap_or(Inbound::Closed {
            reason: "transport close".into(),
        })
    }

    async fn send(&mut self, _event: &str, _payload: Value) -> Result<(), SyncError> {
        Ok(())
    }

    async fn close(&mut self) {}
}

#[derive(Default)]
struct Engine {
    calls: [AtomicUsize; 4],
    open_trades: AtomicUsize,
}

impl Engine {
    fn hit(&self, endpoint: Endpoint) {
        self.calls[endpoint.index()].fetch_add(1, Ordering::SeqCst);
    }

    fn calls(&self, endpoint: Endpoint) -> usize {
        self.calls[endpoint.index()].load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineApi for Engine {
    async fn status(&self) -> Result<BotStatus, SyncError> {
        self.hit(Endpoint::Status);
        Ok(BotStatus {
            state: "running".into(),
            strategy: Some("RSI_Strategy".into()),
            max_open_trades: Some(3),
            dry_run: Some(true),
        })
    }

    async fn balance(&self) -> Result<Balance, SyncError> {
        self.hit(Endpoint::Balance);
        Ok(Balance {
            total: 13950.23,
            currencies: vec![],
        })
    }

    async fn profit(&self) -> Result<Profit, SyncError> {
        self.hit(Endpoint::Profit);
        Ok(Profit {
            profit_closed_coin: 234.56,
            profit_closed_percent: 2.3,
            trade_count: 4,
            winning_trades: 3,
            losing_trades: 1,
            ..Default::default()
        })
    }

    async fn trades(&self) -> Result<Vec<Trade>, SyncError> {
        self.hit(Endpoint::Trades);
        let open = self.open_trades.load(Ordering::SeqCst);
        Ok((0..open)
            .map(|i| Trade {
                trade_id: Some(i as u64),
                pair: "BTC/USDT".into(),
                is_open: true,
                ..Default::default()
            })
            .collect())
    }
}

#[tokio::test]
async fn trade_event_refreshes_trade_fields_only() {
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(ChannelTransport {
        links: Mutex::new(vec![link_rx]),
    });
    let engine = Arc::new(Engine::default());
    engine.open_trades.store(1, Ordering::SeqCst);

    let sync = DashboardSync::new(
        transport,
        Arc::clone(&engine) as Arc<dyn EngineApi>,
        SyncConfig {
            url: "ws://engine:5000".into(),
            connection: ConnectionConfig::default(),
            aggregator: AggregatorConfig {
                poll_interval: Duration::from_secs(3600),
            },
        },
    );

    let mut state = sync.connection().watch_state();
    let mut snapshot = sync.aggregator().subscribe();
    sync.start();
    sync.start();

    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        snapshot.wait_for(|s| s.updated_at(Field::OpenTradeCount).is_some() && !s.loading),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(sync.aggregator().snapshot().open_trade_count, 1);
    assert_eq!(sync.aggregator().snapshot().balance, 13950.23);

    engine.open_trades.store(3, Ordering::SeqCst);
    link_tx
        .send(Inbound::Event {
            name: events::TRADE_UPDATE.into(),
            payload: json!({"pair": "BTC/USDT", "is_open": true}),
        })
        .unwrap();

    tokio::time::timeout(
        Duration::from_secs(5),
        snapshot.wait_for(|s| s.open_trade_count == 3 && !s.loading),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(engine.calls(Endpoint::Status), 1);
    assert_eq!(engine.calls(Endpoint::Balance), 1);
    assert_eq!(engine.calls(Endpoint::Profit), 2);
    assert_eq!(engine.calls(Endpoint::Trades), 2);

    let snap = sync.aggregator().snapshot();
    assert_eq!(snap.engine_status, "running");
    assert_eq!(snap.win_rate, 75.0);
    assert!(snap.error.is_none());

    sync.shutdown();
    sync.shutdown();
    assert_eq!(sync.connection().state(), ConnectionState::Disconnected);
    assert_eq!(sync.router().subscriber_count(events::TRADE_UPDATE), 0);
    assert!(!sync.is_running());
    assert!(!sync.aggregator().is_running());
}
