//! The exchange capability boundary the trading core depends on.
//!
//! Everything the cycle controller, risk gate and reconciliation need from a
//! venue is expressed here. The real client and the in-memory mock both
//! implement this trait, so the entire decision pipeline can be exercised
//! without a network.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::types::{
    Candle, ExchangeResult, OpenPosition, PlacedOrder, Ticker, TickerVolume, TriggerPrices,
};

#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Refresh market metadata (contract specs, precisions).
    async fn load_markets(&self) -> ExchangeResult<()>;

    /// Total quote-currency balance (free + used).
    async fn get_balance(&self) -> ExchangeResult<Decimal>;

    /// All open positions, long and short.
    async fn get_open_positions(&self) -> ExchangeResult<Vec<OpenPosition>>;

    /// Ordered OHLCV series, oldest first.
    async fn get_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> ExchangeResult<Vec<Candle>>;

    /// Latest price and 24h change for a symbol.
    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    /// Current funding rate; `None` when the venue does not publish one.
    async fn get_funding_rate(&self, symbol: &str) -> ExchangeResult<Option<Decimal>>;

    /// Open interest in contracts; `None` when unavailable.
    async fn get_open_interest(&self, symbol: &str) -> ExchangeResult<Option<Decimal>>;

    /// 24h quote volumes across all perpetual symbols.
    async fn get_tickers(&self) -> ExchangeResult<Vec<TickerVolume>>;

    /// Open a market short with preset stop-loss and take-profit triggers.
    /// `margin` is the quote-currency collateral; the exchange applies leverage.
    async fn open_short(
        &self,
        symbol: &str,
        margin: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> ExchangeResult<PlacedOrder>;

    /// Open a market short with a take-profit trigger only (manual path).
    async fn open_short_tp_only(
        &self,
        symbol: &str,
        margin: Decimal,
        take_profit: Decimal,
    ) -> ExchangeResult<PlacedOrder>;

    /// Move the position stop-loss. Returns false when no short is open.
    async fn update_stop_loss(&self, symbol: &str, new_price: Decimal) -> ExchangeResult<bool>;

    /// Pending trigger-order prices (plan orders) for a symbol.
    async fn get_tp_sl_for_symbol(&self, symbol: &str) -> ExchangeResult<TriggerPrices>;

    /// API requests issued since the last reset (request-budget accounting).
    fn api_calls(&self) -> u64;

    /// Reset the request counter at the start of a cycle.
    fn reset_api_calls(&self);
}
