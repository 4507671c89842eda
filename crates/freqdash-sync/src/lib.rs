//! # freqdash-sync
//!
//! Real-time synchronization between a trading engine and the dashboard.
//!
//! - [`ConnectionManager`] keeps one push connection alive with bounded
//!   fixed-delay reconnection and raises lifecycle events.
//! - [`EventRouter`] fans events out to in-process subscribers.
//! - [`SnapshotAggregator`] polls the read endpoints and merges them into an
//!   [`AggregateSnapshot`](freqdash_core::AggregateSnapshot), tolerating
//!   partial failure.
//! - [`InvalidationBridge`] turns engine events into targeted refreshes.
//!
//! [`DashboardSync`] assembles all four from settings.

#![deny(unsafe_code)]

pub mod aggregator;
pub mod bridge;
pub mod codec;
pub mod connection;
pub mod dashboard;
pub mod router;
pub mod transport;
pub mod upstream;

pub use aggregator::{AggregatorConfig, CycleReport, SnapshotAggregator};
pub use bridge::InvalidationBridge;
pub use connection::{ConnectionConfig, ConnectionManager};
pub use dashboard::{DashboardSync, SyncConfig};
pub use router::{EventRouter, Subscription};
pub use transport::{Inbound, Link, Transport, WsTransport};
pub use upstream::{EngineApi, HttpEngineApi};
