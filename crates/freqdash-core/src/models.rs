//! Payloads returned by the trading engine's read endpoints.
//!
//! Every field is defaulted: the engine omits keys freely depending on its
//! mode, and a missing or null key must not fail an otherwise valid response.

use serde::{Deserialize, Deserializer, Serialize};

/// Response envelope wrapping every read endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: EnvelopeStatus,
    pub data: Option<T>,
    pub message: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BotStatus {
    #[serde(default = "unknown_state")]
    pub state: String,
    #[serde(default)]
    pub strategy: Option<String>,
    /// `-1` means unlimited.
    #[serde(default)]
    pub max_open_trades: Option<i64>,
    #[serde(default)]
    pub dry_run: Option<bool>,
}

fn unknown_state() -> String {
    "unknown".into()
}

/// Treat an explicit `null` like a missing key.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrencyBalance {
    #[serde(default, deserialize_with = "nullable")]
    pub currency: String,
    #[serde(default, deserialize_with = "nullable")]
    pub free: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub used: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub total: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    #[serde(default, deserialize_with = "nullable")]
    pub total: f64,
    #[serde(default)]
    pub currencies: Vec<CurrencyBalance>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Profit {
    #[serde(default, deserialize_with = "nullable")]
    pub profit_closed_coin: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub profit_closed_percent: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub profit_all_coin: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub profit_all_percent: f64,
    #[serde(default, deserialize_with = "nullable")]
    pub trade_count: u64,
    #[serde(default, deserialize_with = "nullable")]
    pub winning_trades: u64,
    #[serde(default, deserialize_with = "nullable")]
    pub losing_trades: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    #[serde(default)]
    pub trade_id: Option<u64>,
    #[serde(default, deserialize_with = "nullable")]
    pub pair: String,
    #[serde(default, deserialize_with = "nullable")]
    pub is_open: bool,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub open_rate: Option<f64>,
    #[serde(default)]
    pub profit_abs: Option<f64>,
    #[serde(default)]
    pub open_date: Option<String>,
}

/// The trades endpoint answers either with a bare list or wrapped in `{trades: [...]}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum TradeList {
    Bare(Vec<Trade>),
    Wrapped { trades: Vec<Trade> },
}

impl From<TradeList> for Vec<Trade> {
    fn from(list: TradeList) -> Self {
        match list {
            TradeList::Bare(trades) | TradeList::Wrapped { trades } => trades,
        }
    }
}
