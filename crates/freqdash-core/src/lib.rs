pub mod errors;
pub mod events;
pub mod models;
pub mod snapshot;
pub mod state;

pub use errors::SyncError;
pub use snapshot::{AggregateSnapshot, Endpoint, EndpointResult, EndpointUpdate, Field, Issued, MergeOutcome};
pub use state::ConnectionState;
