//! Browser-facing surface of the dashboard: HTTP endpoints for the current
//! snapshot and connection state, and a websocket that pushes every change.

pub mod client;
pub mod push;
pub mod server;

pub use push::{PushBridge, PushFrame};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
