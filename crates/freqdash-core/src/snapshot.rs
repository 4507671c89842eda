use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SyncError;
use crate::models::{Balance, BotStatus, Profit, Trade};

/// A tracked field of the aggregate snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    EngineStatus,
    Balance,
    PnlAbsolute,
    PnlPercent,
    TodayTradeCount,
    WinRate,
    OpenTradeCount,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Self::EngineStatus,
        Self::Balance,
        Self::PnlAbsolute,
        Self::PnlPercent,
        Self::TodayTradeCount,
        Self::WinRate,
        Self::OpenTradeCount,
    ];

    /// The read endpoint whose result owns this field.
    pub fn owner(&self) -> Endpoint {
        match self {
            Self::EngineStatus => Endpoint::Status,
            Self::Balance => Endpoint::Balance,
            Self::PnlAbsolute | Self::PnlPercent | Self::TodayTradeCount | Self::WinRate => Endpoint::Profit,
            Self::OpenTradeCount => Endpoint::Trades,
        }
    }
}

/// Upstream read endpoints, declared in merge precedence order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Status,
    Balance,
    Profit,
    Trades,
}

impl Endpoint {
    pub const ALL: [Endpoint; 4] = [Self::Status, Self::Balance, Self::Profit, Self::Trades];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Balance => "balance",
            Self::Profit => "profit",
            Self::Trades => "trades",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn fields(&self) -> &'static [Field] {
        match self {
            Self::Status => &[Field::EngineStatus],
            Self::Balance => &[Field::Balance],
            Self::Profit => &[Field::PnlAbsolute, Field::PnlPercent, Field::TodayTradeCount, Field::WinRate],
            Self::Trades => &[Field::OpenTradeCount],
        }
    }

    /// Owning endpoints of `fields`, deduplicated, in precedence order.
    pub fn owners_of(fields: &[Field]) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = fields.iter().map(Field::owner).collect();
        endpoints.sort();
        endpoints.dedup();
        endpoints
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a call was issued.
///
/// `seq` orders calls to the same endpoint and decides freshness; it only
/// grows. `at` is the wall-clock time shown to users and may jump.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Issued {
    pub seq: u64,
    pub at: DateTime<Utc>,
}

impl Issued {
    pub fn now(seq: u64) -> Self {
        Self { seq, at: Utc::now() }
    }
}

/// Outcome of a single upstream call, stamped with when it was issued.
#[derive(Clone, Debug, PartialEq)]
pub enum EndpointResult<T> {
    Ok { value: T, issued: Issued },
    Err { reason: String, issued: Issued },
}

impl<T> EndpointResult<T> {
    pub fn from_call(result: Result<T, SyncError>, issued: Issued) -> Self {
        match result {
            Ok(value) => Self::Ok { value, issued },
            Err(e) => Self::Err {
                reason: e.to_string(),
                issued,
            },
        }
    }

    pub fn issued(&self) -> Issued {
        match self {
            Self::Ok { issued, .. } | Self::Err { issued, .. } => *issued,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// A typed endpoint result, tagged with the endpoint that produced it.
#[derive(Clone, Debug, PartialEq)]
pub enum EndpointUpdate {
    Status(EndpointResult<BotStatus>),
    Balance(EndpointResult<Balance>),
    Profit(EndpointResult<Profit>),
    Trades(EndpointResult<Vec<Trade>>),
}

impl EndpointUpdate {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Self::Status(_) => Endpoint::Status,
            Self::Balance(_) => Endpoint::Balance,
            Self::Profit(_) => Endpoint::Profit,
            Self::Trades(_) => Endpoint::Trades,
        }
    }

    pub fn issued(&self) -> Issued {
        match self {
            Self::Status(r) => r.issued(),
            Self::Balance(r) => r.issued(),
            Self::Profit(r) => r.issued(),
            Self::Trades(r) => r.issued(),
        }
    }
}

/// What merging one endpoint result did to the snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied(Endpoint),
    Failed { endpoint: Endpoint, reason: String },
    /// Older than the values already shown; dropped.
    Stale(Endpoint),
}

/// Win rate in percent; zero when no trades have been made.
pub fn win_rate(winning_trades: u64, trade_count: u64) -> f64 {
    if trade_count == 0 {
        return 0.0;
    }
    (winning_trades as f64 / trade_count as f64) * 100.0
}

/// Last known-good view of the engine.
///
/// Fields only move forward: a failed or stale endpoint result never
/// overwrites what is shown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSnapshot {
    pub balance: f64,
    pub pnl_absolute: f64,
    pub pnl_percent: f64,
    pub win_rate: f64,
    pub open_trade_count: u32,
    pub today_trade_count: u32,
    pub engine_status: String,
    pub loading: bool,
    pub error: Option<String>,
    /// Fetch time of the value currently shown per field. Absent until first fetched.
    pub updated_at: BTreeMap<Field, DateTime<Utc>>,
    /// Issue sequence of the value currently shown per endpoint.
    #[serde(skip)]
    shown_seq: BTreeMap<Endpoint, u64>,
}

impl Default for AggregateSnapshot {
    fn default() -> Self {
        Self {
            balance: 0.0,
            pnl_absolute: 0.0,
            pnl_percent: 0.0,
            win_rate: 0.0,
            open_trade_count: 0,
            today_trade_count: 0,
            engine_status: "unknown".into(),
            loading: false,
            error: None,
            updated_at: BTreeMap::new(),
            shown_seq: BTreeMap::new(),
        }
    }
}

impl AggregateSnapshot {
    /// Merge one endpoint result. Only the fields owned by the result's
    /// endpoint are touched; a failure sets `error` and nothing else.
    pub fn apply(&mut self, update: &EndpointUpdate) -> MergeOutcome {
        let endpoint = update.endpoint();
        let issued = update.issued();

        if self.is_newer_than(endpoint, issued.seq) {
            return MergeOutcome::Stale(endpoint);
        }

        match update {
            EndpointUpdate::Status(EndpointResult::Ok { value, .. }) => {
                self.engine_status = value.state.clone();
            }
            EndpointUpdate::Balance(EndpointResult::Ok { value, .. }) => {
                self.balance = value.total;
            }
            EndpointUpdate::Profit(EndpointResult::Ok { value, .. }) => {
                self.pnl_absolute = value.profit_closed_coin;
                self.pnl_percent = value.profit_closed_percent;
                self.today_trade_count = saturate(value.trade_count);
                self.win_rate = win_rate(value.winning_trades, value.trade_count);
            }
            EndpointUpdate::Trades(EndpointResult::Ok { value, .. }) => {
                self.open_trade_count = saturate(value.iter().filter(|t| t.is_open).count() as u64);
            }
            EndpointUpdate::Status(EndpointResult::Err { reason, .. })
            | EndpointUpdate::Balance(EndpointResult::Err { reason, .. })
            | EndpointUpdate::Profit(EndpointResult::Err { reason, .. })
            | EndpointUpdate::Trades(EndpointResult::Err { reason, .. }) => {
                self.error = Some(reason.clone());
                return MergeOutcome::Failed {
                    endpoint,
                    reason: reason.clone(),
                };
            }
        }

        for field in endpoint.fields() {
            self.updated_at.insert(*field, issued.at);
        }
        self.shown_seq.insert(endpoint, issued.seq);
        MergeOutcome::Applied(endpoint)
    }

    /// True if the value shown for `endpoint` comes from a call issued after `seq`.
    fn is_newer_than(&self, endpoint: Endpoint, seq: u64) -> bool {
        self.shown_seq.get(&endpoint).is_some_and(|shown| *shown > seq)
    }

    pub fn updated_at(&self, field: Field) -> Option<DateTime<Utc>> {
        self.updated_at.get(&field).copied()
    }
}

fn saturate(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
