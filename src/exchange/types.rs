//! Normalized exchange data types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the exchange boundary.
///
/// "Data not published" conditions (missing funding rate, no open interest)
/// are modeled as `Ok(None)` on the relevant calls, not as errors.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("exchange rejected request (code {code}): {message}")]
    Api { code: String, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("missing data: {0}")]
    MissingData(&'static str),
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// One OHLCV observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time, milliseconds since epoch
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Latest price snapshot for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    /// Last traded price
    pub last: Decimal,
    /// 24-hour price change percentage (e.g. 2.5 for +2.5%)
    pub change_24h_pct: Decimal,
}

/// 24h quote volume for the liquidity filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerVolume {
    pub symbol: String,
    pub quote_volume_24h: Decimal,
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// An open position as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    /// Contract amount
    pub contracts: Decimal,
    /// Committed margin in quote currency
    pub margin: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
    /// Unrealized PnL as a percentage of margin
    pub percentage: Decimal,
    /// Position-level take-profit, when the exchange reports one
    pub take_profit: Option<Decimal>,
    /// Position-level stop-loss, when the exchange reports one
    pub stop_loss: Option<Decimal>,
    pub liquidation_price: Option<Decimal>,
}

/// A short accepted by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: String,
    pub symbol: String,
    pub entry_price: Decimal,
    /// Contract amount
    pub amount: Decimal,
    /// Committed margin in quote currency
    pub margin: Decimal,
    pub leverage: u32,
    /// None when the order was placed with a take-profit only
    pub stop_loss: Option<Decimal>,
    pub take_profit: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Pending trigger-order prices for a symbol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerPrices {
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
}
