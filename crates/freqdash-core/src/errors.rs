use std::time::Duration;

/// Typed error hierarchy for the synchronization layer.
/// Connection-level failures feed the reconnection policy; endpoint-level
/// failures are isolated to the fields their endpoint owns.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SyncError {
    // Push connection
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("not connected")]
    NotConnected,

    // Read endpoints
    #[error("HTTP error! status: {status}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("engine error: {0}")]
    Upstream(String),
    #[error("malformed response: {0}")]
    MalformedBody(String),
}

impl SyncError {
    /// Errors that concern the push connection rather than a read endpoint.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Transport(_) | Self::Protocol(_) | Self::NotConnected
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::NotConnected => "not_connected",
            Self::Http { .. } => "http",
            Self::Network(_) => "network",
            Self::Upstream(_) => "upstream",
            Self::MalformedBody(_) => "malformed_body",
        }
    }

    /// Build the error for a non-2xx response.
    pub fn from_status(status: u16, body: String) -> Self {
        Self::Http { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_classification() {
        assert!(SyncError::Connection("refused".into()).is_connection_failure());
        assert!(SyncError::Timeout(Duration::from_secs(5)).is_connection_failure());
        assert!(SyncError::Protocol("bad packet".into()).is_connection_failure());
        assert!(SyncError::NotConnected.is_connection_failure());
    }

    #[test]
    fn endpoint_errors_are_not_connection_failures() {
        assert!(!SyncError::from_status(502, "bad gateway".into()).is_connection_failure());
        assert!(!SyncError::Network("reset".into()).is_connection_failure());
        assert!(!SyncError::Upstream("bot stopped".into()).is_connection_failure());
        assert!(!SyncError::MalformedBody("eof".into()).is_connection_failure());
    }

    #[test]
    fn http_display_matches_dashboard_message() {
        let err = SyncError::from_status(503, "unavailable".into());
        assert_eq!(err.to_string(), "HTTP error! status: 503");
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(SyncError::NotConnected.error_kind(), "not_connected");
        assert_eq!(SyncError::from_status(500, String::new()).error_kind(), "http");
        assert_eq!(SyncError::MalformedBody("x".into()).error_kind(), "malformed_body");
    }
}
