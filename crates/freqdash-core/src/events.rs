use serde::{Deserialize, Serialize};

pub const CONNECT: &str = "connect";
pub const DISCONNECT: &str = "disconnect";
pub const ERROR: &str = "error";
pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";
pub const TRADE_UPDATE: &str = "trade_update";
pub const BALANCE_UPDATE: &str = "balance_update";
pub const STATUS_UPDATE: &str = "status_update";

/// Event names recognized on the push connection.
///
/// Lifecycle events are raised by the connection manager itself; engine
/// events arrive over the wire and are routed verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connect,
    Disconnect,
    Error,
    ReconnectAttempt,
    TradeUpdate,
    BalanceUpdate,
    StatusUpdate,
}

impl EventKind {
    pub const ENGINE: [EventKind; 3] = [Self::TradeUpdate, Self::BalanceUpdate, Self::StatusUpdate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => CONNECT,
            Self::Disconnect => DISCONNECT,
            Self::Error => ERROR,
            Self::ReconnectAttempt => RECONNECT_ATTEMPT,
            Self::TradeUpdate => TRADE_UPDATE,
            Self::BalanceUpdate => BALANCE_UPDATE,
            Self::StatusUpdate => STATUS_UPDATE,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            CONNECT => Some(Self::Connect),
            DISCONNECT => Some(Self::Disconnect),
            ERROR => Some(Self::Error),
            RECONNECT_ATTEMPT => Some(Self::ReconnectAttempt),
            TRADE_UPDATE => Some(Self::TradeUpdate),
            BALANCE_UPDATE => Some(Self::BalanceUpdate),
            STATUS_UPDATE => Some(Self::StatusUpdate),
            _ => None,
        }
    }

    /// Engine events are the only ones accepted from the wire.
    pub fn is_engine_event(&self) -> bool {
        matches!(self, Self::TradeUpdate | Self::BalanceUpdate | Self::StatusUpdate)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_both_ways() {
        for kind in [
            EventKind::Connect,
            EventKind::Disconnect,
            EventKind::Error,
            EventKind::ReconnectAttempt,
            EventKind::TradeUpdate,
            EventKind::BalanceUpdate,
            EventKind::StatusUpdate,
        ] {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_name("order_filled"), None);
    }

    #[test]
    fn only_engine_events_come_from_the_wire() {
        assert!(EventKind::TradeUpdate.is_engine_event());
        assert!(EventKind::StatusUpdate.is_engine_event());
        assert!(!EventKind::Connect.is_engine_event());
        assert!(!EventKind::ReconnectAttempt.is_engine_event());
        assert!(EventKind::ENGINE.iter().all(EventKind::is_engine_event));
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&EventKind::BalanceUpdate).unwrap();
        assert_eq!(json, "\"balance_update\"");
        assert_eq!(EventKind::ReconnectAttempt.to_string(), "reconnect_attempt");
    }
}
