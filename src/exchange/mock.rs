//! In-memory exchange double for the test suite.
//!
//! Serves scripted market data, records order placements and stop-loss
//! updates, and supports failure injection so every cycle outcome can be
//! exercised without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::traits::ExchangeApi;
use super::types::*;

/// Scripted `ExchangeApi` implementation.
pub struct MockExchange {
    /// Balance responses; the front is consumed per call, the last repeats.
    balances: RwLock<VecDeque<Decimal>>,
    positions: RwLock<Vec<OpenPosition>>,
    candles: RwLock<HashMap<String, Vec<Candle>>>,
    tickers: RwLock<HashMap<String, Ticker>>,
    ticker_volumes: RwLock<Vec<TickerVolume>>,
    funding_rates: RwLock<HashMap<String, Decimal>>,
    open_interest: RwLock<HashMap<String, Decimal>>,
    trigger_prices: RwLock<HashMap<String, TriggerPrices>>,
    placed_orders: RwLock<Vec<PlacedOrder>>,
    sl_updates: RwLock<Vec<(String, Decimal)>>,
    fail_open_short: AtomicBool,
    fail_tickers: AtomicBool,
    leverage: u32,
    market_loads: AtomicU64,
    order_counter: AtomicU64,
    api_counter: AtomicU64,
}

impl MockExchange {
    pub fn new(balance: Decimal) -> Self {
        let mut balances = VecDeque::new();
        balances.push_back(balance);

        Self {
            balances: RwLock::new(balances),
            positions: RwLock::new(Vec::new()),
            candles: RwLock::new(HashMap::new()),
            tickers: RwLock::new(HashMap::new()),
            ticker_volumes: RwLock::new(Vec::new()),
            funding_rates: RwLock::new(HashMap::new()),
            open_interest: RwLock::new(HashMap::new()),
            trigger_prices: RwLock::new(HashMap::new()),
            placed_orders: RwLock::new(Vec::new()),
            sl_updates: RwLock::new(Vec::new()),
            fail_open_short: AtomicBool::new(false),
            fail_tickers: AtomicBool::new(false),
            leverage: 10,
            market_loads: AtomicU64::new(0),
            order_counter: AtomicU64::new(1),
            api_counter: AtomicU64::new(0),
        }
    }

    /// Queue an additional balance response (consumed in order).
    pub async fn push_balance(&self, balance: Decimal) {
        self.balances.write().await.push_back(balance);
    }

    pub async fn set_positions(&self, positions: Vec<OpenPosition>) {
        *self.positions.write().await = positions;
    }

    pub async fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.candles.write().await.insert(symbol.to_string(), candles);
    }

    pub async fn set_ticker(&self, symbol: &str, last: Decimal, change_24h_pct: Decimal) {
        self.tickers.write().await.insert(
            symbol.to_string(),
            Ticker {
                symbol: symbol.to_string(),
                last,
                change_24h_pct,
            },
        );
    }

    pub async fn set_ticker_volume(&self, symbol: &str, quote_volume_24h: Decimal) {
        self.ticker_volumes.write().await.push(TickerVolume {
            symbol: symbol.to_string(),
            quote_volume_24h,
        });
    }

    pub async fn set_funding_rate(&self, symbol: &str, rate: Decimal) {
        self.funding_rates
            .write()
            .await
            .insert(symbol.to_string(), rate);
    }

    pub async fn set_open_interest(&self, symbol: &str, size: Decimal) {
        self.open_interest
            .write()
            .await
            .insert(symbol.to_string(), size);
    }

    pub async fn set_trigger_prices(&self, symbol: &str, prices: TriggerPrices) {
        self.trigger_prices
            .write()
            .await
            .insert(symbol.to_string(), prices);
    }

    pub fn fail_next_open_short(&self) {
        self.fail_open_short.store(true, Ordering::SeqCst);
    }

    pub fn fail_tickers(&self) {
        self.fail_tickers.store(true, Ordering::SeqCst);
    }

    /// Orders accepted so far.
    pub async fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.placed_orders.read().await.clone()
    }

    /// Recorded stop-loss updates as (symbol, price) pairs.
    pub async fn stop_loss_updates(&self) -> Vec<(String, Decimal)> {
        self.sl_updates.read().await.clone()
    }

    /// How many times market metadata was reloaded.
    pub fn market_loads(&self) -> u64 {
        self.market_loads.load(Ordering::SeqCst)
    }

    fn count_call(&self) {
        self.api_counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn load_markets(&self) -> ExchangeResult<()> {
        self.count_call();
        self.market_loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_balance(&self) -> ExchangeResult<Decimal> {
        self.count_call();
        let mut balances = self.balances.write().await;
        if balances.len() > 1 {
            Ok(balances.pop_front().unwrap_or(Decimal::ZERO))
        } else {
            Ok(balances.front().copied().unwrap_or(Decimal::ZERO))
        }
    }

    async fn get_open_positions(&self) -> ExchangeResult<Vec<OpenPosition>> {
        self.count_call();
        Ok(self.positions.read().await.clone())
    }

    async fn get_ohlcv(
        &self,
        symbol: &str,
        _timeframe: &str,
        _limit: u32,
    ) -> ExchangeResult<Vec<Candle>> {
        self.count_call();
        Ok(self
            .candles
            .read()
            .await
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        self.count_call();
        self.tickers
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or(ExchangeError::MissingData("no ticker scripted for symbol"))
    }

    async fn get_funding_rate(&self, symbol: &str) -> ExchangeResult<Option<Decimal>> {
        self.count_call();
        Ok(self.funding_rates.read().await.get(symbol).copied())
    }

    async fn get_open_interest(&self, symbol: &str) -> ExchangeResult<Option<Decimal>> {
        self.count_call();
        Ok(self.open_interest.read().await.get(symbol).copied())
    }

    async fn get_tickers(&self) -> ExchangeResult<Vec<TickerVolume>> {
        self.count_call();
        if self.fail_tickers.swap(false, Ordering::SeqCst) {
            return Err(ExchangeError::Api {
                code: "50001".to_string(),
                message: "scripted tickers failure".to_string(),
            });
        }
        Ok(self.ticker_volumes.read().await.clone())
    }

    async fn open_short(
        &self,
        symbol: &str,
        margin: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> ExchangeResult<PlacedOrder> {
        self.count_call();
        if self.fail_open_short.swap(false, Ordering::SeqCst) {
            return Err(ExchangeError::Api {
                code: "40762".to_string(),
                message: "scripted order rejection".to_string(),
            });
        }

        let ticker = self
            .tickers
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or(ExchangeError::MissingData("no ticker scripted for symbol"))?;

        let amount = (margin * Decimal::from(self.leverage) / ticker.last).round_dp(4);
        let order = PlacedOrder {
            order_id: format!("mock-{}", self.order_counter.fetch_add(1, Ordering::SeqCst)),
            symbol: symbol.to_string(),
            entry_price: ticker.last,
            amount,
            margin,
            leverage: self.leverage,
            stop_loss: Some(stop_loss),
            take_profit,
            timestamp: Utc::now(),
        };

        self.placed_orders.write().await.push(order.clone());
        Ok(order)
    }

    async fn open_short_tp_only(
        &self,
        symbol: &str,
        margin: Decimal,
        take_profit: Decimal,
    ) -> ExchangeResult<PlacedOrder> {
        self.count_call();
        let ticker = self
            .tickers
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or(ExchangeError::MissingData("no ticker scripted for symbol"))?;

        let amount = (margin * Decimal::from(self.leverage) / ticker.last).round_dp(4);
        let order = PlacedOrder {
            order_id: format!("mock-{}", self.order_counter.fetch_add(1, Ordering::SeqCst)),
            symbol: symbol.to_string(),
            entry_price: ticker.last,
            amount,
            margin,
            leverage: self.leverage,
            stop_loss: None,
            take_profit,
            timestamp: Utc::now(),
        };

        self.placed_orders.write().await.push(order.clone());
        Ok(order)
    }

    async fn update_stop_loss(&self, symbol: &str, new_price: Decimal) -> ExchangeResult<bool> {
        self.count_call();
        self.sl_updates
            .write()
            .await
            .push((symbol.to_string(), new_price));
        Ok(true)
    }

    async fn get_tp_sl_for_symbol(&self, symbol: &str) -> ExchangeResult<TriggerPrices> {
        self.count_call();
        Ok(self
            .trigger_prices
            .read()
            .await
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }

    fn api_calls(&self) -> u64 {
        self.api_counter.load(Ordering::Relaxed)
    }

    fn reset_api_calls(&self) {
        self.api_counter.store(0, Ordering::Relaxed);
    }
}
