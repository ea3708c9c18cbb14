//! The cycle controller: one full decision cycle.
//!
//! Fixed order per cycle: refresh balance, reconcile positions, maintain
//! trailing stops, run safety checks, scan the market, select the best
//! candidate, size and submit, persist, report. Every step that can fail
//! transiently degrades into a descriptive no-trade outcome instead of
//! aborting the cycle.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::exchange::{Candle, ExchangeApi, OpenPosition, PositionSide};
use crate::report::{CycleReport, Reporter, ScanEntry, StatsSummary};
use crate::risk::{OiChange, RiskGate, SafetyCheck};
use crate::state::{sync_positions, BotState, Position, StateStore};
use crate::strategy::{self, MIN_OBSERVATIONS};

/// Symbol driving the market-trend filter.
const BTC_SYMBOL: &str = "BTCUSDT";
/// ATR lookback for the volatility pre-filter.
const ATR_PERIOD: usize = 14;
/// Volume lookback for the market-wide anomaly ratio.
const VOLUME_LOOKBACK: usize = 20;

/// How a cycle ended. Only `OrderFailed` and `ScanFailed` describe
/// failures; the rest are normal outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Opened { symbol: String },
    DryRun { symbol: String },
    SafetySkipped,
    NoSignals,
    ZeroSize,
    TickerUnavailable { symbol: String },
    OrderFailed { symbol: String },
    ScanFailed { reason: String },
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Opened { symbol } => write!(f, "Opened SHORT {symbol}"),
            CycleOutcome::DryRun { symbol } => {
                write!(f, "Dry run: SHORT {symbol} planned, order not placed")
            }
            CycleOutcome::SafetySkipped => {
                write!(f, "Safety check failed, trade execution skipped")
            }
            CycleOutcome::NoSignals => write!(f, "No trade signals found this cycle"),
            CycleOutcome::ZeroSize => write!(f, "Position size is zero, skipping"),
            CycleOutcome::TickerUnavailable { symbol } => {
                write!(f, "Could not fetch ticker for {symbol}")
            }
            CycleOutcome::OrderFailed { symbol } => {
                write!(f, "Failed to open short for {symbol}")
            }
            CycleOutcome::ScanFailed { reason } => write!(f, "Market scan failed: {reason}"),
        }
    }
}

struct ScanData {
    entries: Vec<ScanEntry>,
    oi_changes: Vec<OiChange>,
    /// Mean current/average volume ratio across scanned symbols
    volume_ratio: Option<Decimal>,
}

/// Orchestrates the decision cycle and owns the durable state.
pub struct CycleController {
    config: Config,
    risk: RiskGate,
    store: StateStore,
    state: BotState,
    reporter: Reporter,
    /// Open interest seen last cycle, for spike detection
    prev_open_interest: HashMap<String, Decimal>,
    dry_run: bool,
}

impl CycleController {
    pub fn new(
        config: Config,
        store: StateStore,
        state: BotState,
        reporter: Reporter,
        dry_run: bool,
    ) -> Self {
        let risk = RiskGate::new(config.risk.clone(), config.news_events.clone());
        Self {
            config,
            risk,
            store,
            state,
            reporter,
            prev_open_interest: HashMap::new(),
            dry_run,
        }
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    /// Persist the current state (used on shutdown).
    pub fn persist(&self) -> Result<()> {
        self.store.save(&self.state)
    }

    /// Run one complete trading cycle.
    pub async fn run_cycle(&mut self, exchange: &dyn ExchangeApi) -> Result<CycleReport> {
        let started_at = Utc::now();
        info!("════════════ starting new cycle ════════════");
        exchange.reset_api_calls();

        if self.state.rollover_if_new_day(Utc::now().date_naive()) {
            self.store.save(&self.state)?;
        }

        // ── Step 1: balance, with one retry after a metadata reload ──
        let mut current_balance = match exchange.get_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %e, "balance fetch failed");
                Decimal::ZERO
            }
        };
        if current_balance <= Decimal::ZERO {
            warn!("balance zero or unavailable, reloading markets and retrying");
            if let Err(e) = exchange.load_markets().await {
                warn!(error = %e, "market metadata reload failed");
            }
            current_balance = exchange.get_balance().await.unwrap_or(Decimal::ZERO);
        }

        let balance_ok = current_balance > Decimal::ZERO;
        if balance_ok && self.state.start_balance <= Decimal::ZERO {
            self.state.start_balance = current_balance;
            self.store.save(&self.state)?;
            info!(start_balance = %current_balance, "set start balance for the day");
        }
        info!(balance = %current_balance, "balance refreshed");

        // ── Step 2: reconcile local state against the exchange ──
        // A failed snapshot skips reconciliation and trailing maintenance
        // rather than treating every tracked position as closed.
        let exchange_positions: Option<Vec<OpenPosition>> =
            match exchange.get_open_positions().await {
                Ok(positions) => Some(positions),
                Err(e) => {
                    warn!(error = %e, "could not fetch open positions, skipping reconciliation");
                    None
                }
            };

        let open_short_count = match &exchange_positions {
            Some(positions) => positions
                .iter()
                .filter(|p| p.side == PositionSide::Short)
                .count() as u32,
            None => self.state.positions.len() as u32,
        };

        if let Some(positions) = &exchange_positions {
            if sync_positions(&mut self.state, positions, exchange).await {
                self.store.save(&self.state)?;
            }

            // ── Step 3: trailing-stop maintenance for every open short ──
            self.manage_trailing_stops(exchange, positions).await;
        }

        // ── Step 4: safety checks ──
        let btc_change = match exchange.get_ticker(BTC_SYMBOL).await {
            Ok(ticker) => ticker.change_24h_pct,
            Err(e) => {
                warn!(error = %e, "BTC ticker unavailable, trend filter sees 0%");
                Decimal::ZERO
            }
        };

        let (mut all_safe, mut checks) = self.risk.run_all_checks(
            self.state.start_balance,
            current_balance,
            btc_change,
            open_short_count,
            Utc::now(),
        );
        if !balance_ok {
            all_safe = false;
            checks.push(SafetyCheck::fail("Balance is zero, trading disabled"));
        }
        for check in &checks {
            info!(passed = check.passed, "  {}", check.reason);
        }
        if !all_safe {
            info!("safety check failed, trade execution skipped");
        }

        // ── Steps 5-7: scan, select, execute ──
        let mut scan_results = Vec::new();
        let outcome = match self.scan_market(exchange).await {
            Err(e) => {
                error!(error = %e, "market scan failed");
                CycleOutcome::ScanFailed {
                    reason: format!("{e:#}"),
                }
            }
            Ok(scan) => {
                // Data-dependent checks: evaluated where data exists, they
                // gate only when explicitly configured to.
                let oi_check = self.risk.check_oi_spike(&scan.oi_changes);
                if !oi_check.passed && self.risk.gates_on_oi_spike() {
                    all_safe = false;
                }
                info!(passed = oi_check.passed, "  {}", oi_check.reason);
                checks.push(oi_check);

                if let Some(ratio) = scan.volume_ratio {
                    let volume_check = self.risk.check_market_volume(ratio);
                    if !volume_check.passed && self.risk.gates_on_volume_spike() {
                        all_safe = false;
                    }
                    info!(passed = volume_check.passed, "  {}", volume_check.reason);
                    checks.push(volume_check);
                }

                scan_results = scan.entries;
                scan_results.sort_by(|a, b| {
                    b.signal_count
                        .cmp(&a.signal_count)
                        .then(b.rsi.cmp(&a.rsi))
                });
                scan_results.truncate(self.config.scan.top_n);
                self.log_scan_results(&scan_results);

                let candidate = scan_results
                    .iter()
                    .find(|entry| entry.signal_count >= self.config.scan.min_signals)
                    .cloned();

                if !all_safe {
                    CycleOutcome::SafetySkipped
                } else {
                    match candidate {
                        None => CycleOutcome::NoSignals,
                        Some(best) => {
                            self.execute_trade(exchange, &best, current_balance, open_short_count)
                                .await?
                        }
                    }
                }
            }
        };

        // ── Step 8: persist and report ──
        info!("{}", self.state.stats_line());

        let api_calls = exchange.api_calls();
        let cycle_secs = Decimal::from(self.config.cycle_minutes * 60);
        let api_calls_per_sec = (Decimal::from(api_calls) / cycle_secs).round_dp(2);
        info!(api_calls, rate = %api_calls_per_sec, "API calls this cycle");

        self.state.last_cycle_time = Some(Utc::now());
        self.store.save(&self.state)?;

        let report = CycleReport {
            started_at,
            balance: current_balance,
            all_safe,
            checks,
            outcome: outcome.to_string(),
            active_strategy: self.config.scan.strategy,
            scan_results,
            api_calls,
            api_calls_per_sec,
            stats: StatsSummary::from_state(&self.state),
        };

        if let Err(e) = self.reporter.record(&report) {
            warn!(error = %e, "failed to record cycle report");
        }

        Ok(report)
    }

    /// Tighten stops for every tracked short the exchange still reports.
    /// Each successful update is persisted before the next symbol.
    async fn manage_trailing_stops(
        &mut self,
        exchange: &dyn ExchangeApi,
        exchange_positions: &[OpenPosition],
    ) {
        for reported in exchange_positions {
            if reported.side != PositionSide::Short {
                continue;
            }
            let symbol = reported.symbol.clone();

            let (entry_price, current_sl) = match self.state.positions.get(&symbol) {
                Some(tracked) => (tracked.entry_price, tracked.current_sl),
                None => continue,
            };
            if entry_price <= Decimal::ZERO || current_sl <= Decimal::ZERO {
                continue;
            }

            let current_price = match exchange.get_ticker(&symbol).await {
                Ok(ticker) => ticker.last,
                Err(_) => reported.mark_price,
            };

            if let Some(new_sl) = self.risk.trailing_stop(entry_price, current_price, current_sl) {
                info!(
                    %symbol,
                    old_sl = %current_sl,
                    %new_sl,
                    price = %current_price,
                    entry = %entry_price,
                    "trailing stop update"
                );

                match exchange.update_stop_loss(&symbol, new_sl).await {
                    Ok(true) => {
                        if let Some(tracked) = self.state.positions.get_mut(&symbol) {
                            tracked.current_sl = new_sl;
                        }
                        if let Err(e) = self.store.save(&self.state) {
                            error!(error = %e, "failed to persist trailing stop update");
                        }
                    }
                    Ok(false) => warn!(%symbol, "exchange declined stop-loss update"),
                    Err(e) => warn!(%symbol, error = %e, "stop-loss update failed"),
                }
            }
        }
    }

    /// Liquidity filter, per-symbol analysis, and anomaly data collection.
    async fn scan_market(&mut self, exchange: &dyn ExchangeApi) -> Result<ScanData> {
        let scan = self.config.scan.clone();

        let tickers = exchange
            .get_tickers()
            .await
            .context("fetching tickers for the liquidity filter")?;

        let liquid: Vec<String> = tickers
            .iter()
            .filter(|t| t.quote_volume_24h >= scan.min_volume_usd)
            .map(|t| t.symbol.clone())
            .collect();
        info!(
            total = tickers.len(),
            liquid = liquid.len(),
            min_volume = %scan.min_volume_usd,
            "liquidity filter applied"
        );

        let mut entries = Vec::new();
        let mut oi_changes = Vec::new();
        let mut volume_ratios = Vec::new();

        for symbol in liquid {
            if self.state.positions.contains_key(&symbol) {
                continue;
            }

            let candles = match exchange
                .get_ohlcv(&symbol, &scan.timeframe, scan.candle_limit)
                .await
            {
                Ok(candles) => candles,
                Err(e) => {
                    warn!(%symbol, error = %e, "candle fetch failed, skipping symbol");
                    continue;
                }
            };
            if candles.len() < MIN_OBSERVATIONS {
                continue;
            }

            let atr_pct = strategy::indicators::atr_pct(&candles, ATR_PERIOD);
            if atr_pct > scan.max_atr_pct {
                continue;
            }

            if let Some(ratio) = current_volume_ratio(&candles, VOLUME_LOOKBACK) {
                volume_ratios.push(ratio);
            }

            if let Ok(Some(open_interest)) = exchange.get_open_interest(&symbol).await {
                if let Some(previous) = self.prev_open_interest.get(&symbol) {
                    if !previous.is_zero() {
                        oi_changes.push(OiChange {
                            symbol: symbol.clone(),
                            change_pct: (open_interest - previous) / previous
                                * Decimal::ONE_HUNDRED,
                        });
                    }
                }
                self.prev_open_interest.insert(symbol.clone(), open_interest);
            }

            let funding_rate = exchange.get_funding_rate(&symbol).await.unwrap_or(None);

            let strategies = strategy::evaluate_all(&candles, funding_rate);
            let active = strategies
                .iter()
                .find(|result| result.strategy == scan.strategy)
                .cloned()
                .expect("active strategy is registered");

            entries.push(ScanEntry {
                symbol: symbol.clone(),
                rsi: active.rsi,
                atr_pct: active.atr_pct,
                funding_rate: funding_rate.unwrap_or(Decimal::ZERO),
                signal_count: active.signal_count,
                signals: active.signals,
                details: active.details,
                strategies,
            });

            // Per-symbol pacing to respect the exchange request budget
            tokio::time::sleep(Duration::from_millis(scan.symbol_delay_ms)).await;
        }

        let volume_ratio = if volume_ratios.is_empty() {
            None
        } else {
            Some(
                volume_ratios.iter().sum::<Decimal>()
                    / Decimal::from(volume_ratios.len() as u64),
            )
        };

        Ok(ScanData {
            entries,
            oi_changes,
            volume_ratio,
        })
    }

    fn log_scan_results(&self, scan_results: &[ScanEntry]) {
        info!(
            pairs = scan_results.len(),
            strategy = %self.config.scan.strategy,
            "market scan ranked"
        );

        for entry in scan_results {
            let marker = if entry.signal_count >= self.config.scan.min_signals {
                "🎯"
            } else {
                "  "
            };
            let votes: Vec<String> = entry
                .strategies
                .iter()
                .map(|result| {
                    let active = if result.strategy == self.config.scan.strategy {
                        "*"
                    } else {
                        " "
                    };
                    format!("{active}{}={}", result.strategy, result.summary())
                })
                .collect();
            info!(
                "{marker} {}: {} RSI={:.1} ATR={:.1}% FR={:.4}%",
                entry.symbol,
                votes.join(" "),
                entry.rsi,
                entry.atr_pct,
                entry.funding_rate * Decimal::ONE_HUNDRED,
            );
        }
    }

    /// Size the position, compute protective prices, and place the order.
    async fn execute_trade(
        &mut self,
        exchange: &dyn ExchangeApi,
        best: &ScanEntry,
        balance: Decimal,
        open_short_count: u32,
    ) -> Result<CycleOutcome> {
        info!(symbol = %best.symbol, rsi = %best.rsi, "best candidate selected");

        let margin = self.risk.calculate_position_size(balance, open_short_count);
        if margin <= Decimal::ZERO {
            return Ok(CycleOutcome::ZeroSize);
        }

        let ticker = match exchange.get_ticker(&best.symbol).await {
            Ok(ticker) => ticker,
            Err(e) => {
                warn!(symbol = %best.symbol, error = %e, "ticker fetch failed");
                return Ok(CycleOutcome::TickerUnavailable {
                    symbol: best.symbol.clone(),
                });
            }
        };

        let entry_price = ticker.last;
        let (sl_price, tp_price) = self.risk.calculate_sl_tp(entry_price, best.atr_pct);

        let sl_pct = ((sl_price - entry_price) / entry_price * Decimal::ONE_HUNDRED).abs();
        let tp_pct = ((entry_price - tp_price) / entry_price * Decimal::ONE_HUNDRED).abs();
        info!(
            "trade plan: SHORT {} @ {} | SL={} ({:.1}%) | TP={} ({:.1}%) | margin={:.2} USDT",
            best.symbol, entry_price, sl_price, sl_pct, tp_price, tp_pct, margin
        );

        if self.dry_run {
            info!("dry run, order not placed");
            self.state.add_position(Position {
                symbol: best.symbol.clone(),
                order_id: "dry-run".to_string(),
                entry_price,
                amount: Decimal::ZERO,
                margin,
                leverage: self.config.execution.leverage,
                stop_loss: sl_price,
                take_profit: tp_price,
                current_sl: sl_price,
                opened_at: Utc::now(),
            });
            self.store.save(&self.state)?;
            return Ok(CycleOutcome::DryRun {
                symbol: best.symbol.clone(),
            });
        }

        match exchange
            .open_short(&best.symbol, margin, sl_price, tp_price)
            .await
        {
            Ok(order) => {
                self.state.add_position(Position::from_order(&order));
                self.store.save(&self.state)?;
                info!(symbol = %best.symbol, order_id = %order.order_id, "short opened");
                Ok(CycleOutcome::Opened {
                    symbol: best.symbol.clone(),
                })
            }
            Err(e) => {
                // No same-cycle retry; the next cycle re-evaluates from scratch
                error!(symbol = %best.symbol, error = %e, "order placement failed");
                Ok(CycleOutcome::OrderFailed {
                    symbol: best.symbol.clone(),
                })
            }
        }
    }
}

/// Latest bar volume relative to the trailing average (latest excluded).
fn current_volume_ratio(candles: &[Candle], lookback: usize) -> Option<Decimal> {
    if lookback == 0 || candles.len() < lookback + 1 {
        return None;
    }

    let n = candles.len();
    let average = candles[n - 1 - lookback..n - 1]
        .iter()
        .map(|c| c.volume)
        .sum::<Decimal>()
        / Decimal::from(lookback as u64);

    if average <= Decimal::ZERO {
        return None;
    }

    Some(candles[n - 1].volume / average)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use crate::state::StateStore;
    use rust_decimal_macros::dec;

    fn test_config() -> Config {
        Config {
            // Keep the scan fast in tests
            scan: crate::config::ScanConfig {
                symbol_delay_ms: 0,
                ..crate::config::ScanConfig::default()
            },
            ..Config::default()
        }
    }

    fn controller(config: Config, dry_run: bool) -> CycleController {
        let store = StateStore::in_memory().unwrap();
        let state = store.load_or_default().unwrap();
        let reporter = Reporter::new(
            std::env::temp_dir().join(format!("shortbot-cycle-{}", std::process::id())),
        )
        .unwrap();
        CycleController::new(config, store, state, reporter, dry_run)
    }

    /// Flat prices with a drop on the final bar: a lone bearish EMA cross,
    /// which the volume strategy counts as 3 votes.
    fn signal_candles() -> Vec<Candle> {
        let mut closes = vec![dec!(100); 34];
        closes.push(dec!(99));
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: i as i64 * 900_000,
                open: close,
                high: close + dec!(0.5),
                low: close - dec!(0.5),
                close,
                volume: dec!(1000),
            })
            .collect()
    }

    fn short_position(symbol: &str) -> OpenPosition {
        OpenPosition {
            symbol: symbol.to_string(),
            side: PositionSide::Short,
            entry_price: dec!(100),
            mark_price: dec!(90),
            contracts: dec!(5),
            margin: dec!(50),
            leverage: 10,
            unrealized_pnl: dec!(50),
            percentage: dec!(100),
            take_profit: Some(dec!(94)),
            stop_loss: Some(dec!(106)),
            liquidation_price: None,
        }
    }

    async fn scripted_signal_market(mock: &MockExchange) {
        mock.set_ticker(BTC_SYMBOL, dec!(50000), dec!(2)).await;
        mock.set_ticker_volume("ETHUSDT", dec!(10_000_000)).await;
        mock.set_candles("ETHUSDT", signal_candles()).await;
        mock.set_ticker("ETHUSDT", dec!(99), dec!(-1)).await;
    }

    #[tokio::test]
    async fn opens_short_when_signal_and_safety_align() {
        let mock = MockExchange::new(dec!(500));
        scripted_signal_market(&mock).await;

        let mut controller = controller(test_config(), false);
        let report = controller.run_cycle(&mock).await.unwrap();

        assert_eq!(report.outcome, "Opened SHORT ETHUSDT");
        assert!(report.all_safe);

        // margin = 500 * 50% / 5 slots = 50
        let placed = mock.placed_orders().await;
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].margin, dec!(50.00));

        let state = controller.state();
        assert_eq!(state.start_balance, dec!(500));
        assert_eq!(state.trades_today, 1);
        let position = &state.positions["ETHUSDT"];
        // Quiet market: minimum distances apply (SL +2%, TP -5% of 99)
        assert_eq!(position.stop_loss, dec!(100.98));
        assert_eq!(position.take_profit, dec!(94.05));
        assert_eq!(position.current_sl, position.stop_loss);
    }

    #[tokio::test]
    async fn full_book_skips_trading_but_still_trails_stops() {
        let mock = MockExchange::new(dec!(1000));
        mock.set_ticker(BTC_SYMBOL, dec!(50000), dec!(2)).await;

        let symbols = ["AUSDT", "BUSDT", "CUSDT", "DUSDT", "EUSDT"];
        let mut positions = Vec::new();
        for symbol in symbols {
            positions.push(short_position(symbol));
            // 10% profit on every position
            mock.set_ticker(symbol, dec!(90), dec!(-10)).await;
        }
        mock.set_positions(positions).await;

        let mut controller = controller(test_config(), false);
        let report = controller.run_cycle(&mock).await.unwrap();

        // Position-count check fails at 5/5
        assert_eq!(report.outcome, CycleOutcome::SafetySkipped.to_string());
        assert!(!report.all_safe);

        // Trailing maintenance still ran: profit 10%, distance 2% -> SL 92
        let updates = mock.stop_loss_updates().await;
        assert_eq!(updates.len(), 5);
        assert!(updates.iter().all(|(_, sl)| *sl == dec!(92)));

        let state = controller.state();
        assert_eq!(state.positions.len(), 5);
        assert!(state
            .positions
            .values()
            .all(|p| p.current_sl == dec!(92)));
        assert!(mock.placed_orders().await.is_empty());
    }

    #[tokio::test]
    async fn order_failure_is_a_recorded_outcome_without_retry() {
        let mock = MockExchange::new(dec!(500));
        scripted_signal_market(&mock).await;
        mock.fail_next_open_short();

        let mut controller = controller(test_config(), false);
        let report = controller.run_cycle(&mock).await.unwrap();

        assert_eq!(report.outcome, "Failed to open short for ETHUSDT");
        assert!(mock.placed_orders().await.is_empty());
        assert!(controller.state().positions.is_empty());
        assert_eq!(controller.state().trades_today, 0);
    }

    #[tokio::test]
    async fn zero_balance_retries_once_then_forces_unsafe() {
        let mock = MockExchange::new(dec!(0));
        scripted_signal_market(&mock).await;

        let mut controller = controller(test_config(), false);
        let report = controller.run_cycle(&mock).await.unwrap();

        // One metadata reload happened for the retry
        assert_eq!(mock.market_loads(), 1);
        assert!(!report.all_safe);
        assert_eq!(report.outcome, CycleOutcome::SafetySkipped.to_string());
        // The scan still ran for observability
        assert_eq!(report.scan_results.len(), 1);
        assert!(report
            .checks
            .iter()
            .any(|c| !c.passed && c.reason.contains("Balance is zero")));
    }

    #[tokio::test]
    async fn balance_retry_recovers_after_metadata_reload() {
        let mock = MockExchange::new(dec!(0));
        mock.push_balance(dec!(500)).await;
        scripted_signal_market(&mock).await;

        let mut controller = controller(test_config(), false);
        let report = controller.run_cycle(&mock).await.unwrap();

        assert_eq!(mock.market_loads(), 1);
        assert_eq!(controller.state().start_balance, dec!(500));
        assert_eq!(report.outcome, "Opened SHORT ETHUSDT");
    }

    #[tokio::test]
    async fn missing_ticker_degrades_to_no_trade_outcome() {
        let mock = MockExchange::new(dec!(500));
        mock.set_ticker(BTC_SYMBOL, dec!(50000), dec!(2)).await;
        mock.set_ticker_volume("ETHUSDT", dec!(10_000_000)).await;
        mock.set_candles("ETHUSDT", signal_candles()).await;
        // No ETHUSDT ticker scripted

        let mut controller = controller(test_config(), false);
        let report = controller.run_cycle(&mock).await.unwrap();

        assert_eq!(report.outcome, "Could not fetch ticker for ETHUSDT");
        assert!(controller.state().positions.is_empty());
    }

    #[tokio::test]
    async fn scan_failure_still_produces_a_report() {
        let mock = MockExchange::new(dec!(500));
        mock.set_ticker(BTC_SYMBOL, dec!(50000), dec!(2)).await;
        mock.fail_tickers();

        let mut controller = controller(test_config(), false);
        let report = controller.run_cycle(&mock).await.unwrap();

        assert!(report.outcome.starts_with("Market scan failed"));
        assert!(report.scan_results.is_empty());
    }

    #[tokio::test]
    async fn dry_run_records_a_paper_position() {
        let mock = MockExchange::new(dec!(500));
        scripted_signal_market(&mock).await;

        let mut controller = controller(test_config(), true);
        let report = controller.run_cycle(&mock).await.unwrap();

        assert!(report.outcome.starts_with("Dry run"));
        assert!(mock.placed_orders().await.is_empty());

        let position = &controller.state().positions["ETHUSDT"];
        assert_eq!(position.order_id, "dry-run");
        assert_eq!(position.amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn held_symbols_are_excluded_from_the_scan() {
        let mock = MockExchange::new(dec!(500));
        scripted_signal_market(&mock).await;
        mock.set_positions(vec![short_position("ETHUSDT")]).await;
        mock.set_ticker("ETHUSDT", dec!(99), dec!(-1)).await;

        let mut controller = controller(test_config(), false);
        let report = controller.run_cycle(&mock).await.unwrap();

        // ETHUSDT was adopted during reconciliation, so the scan skips it
        assert!(report.scan_results.is_empty());
        assert_eq!(report.outcome, CycleOutcome::NoSignals.to_string());
    }

    #[tokio::test]
    async fn btc_bull_market_blocks_execution() {
        let mock = MockExchange::new(dec!(500));
        scripted_signal_market(&mock).await;
        mock.set_ticker(BTC_SYMBOL, dec!(50000), dec!(6)).await;

        let mut controller = controller(test_config(), false);
        let report = controller.run_cycle(&mock).await.unwrap();

        assert_eq!(report.outcome, CycleOutcome::SafetySkipped.to_string());
        assert!(mock.placed_orders().await.is_empty());
        // The candidate was still scanned and ranked
        assert_eq!(report.scan_results.len(), 1);
        assert!(report.scan_results[0].signal_count >= 3);
    }

    #[test]
    fn volume_ratio_needs_enough_bars() {
        let candles = signal_candles();
        assert!(current_volume_ratio(&candles, VOLUME_LOOKBACK).is_some());
        assert!(current_volume_ratio(&candles[..10], VOLUME_LOOKBACK).is_none());
    }
}
