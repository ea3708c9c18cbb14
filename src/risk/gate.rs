//! Safety checks, position sizing, and protective price targets.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::warn;

use crate::config::{NewsEvent, RiskConfig};

/// Quote-currency precision for margin amounts.
const QUOTE_DECIMALS: u32 = 2;
/// Price precision for SL/TP targets before exchange tick rounding.
pub(crate) const PRICE_DECIMALS: u32 = 8;
/// Stop distance in ATR multiples.
const SL_ATR_MULT: Decimal = dec!(1.5);
/// Target distance in ATR multiples.
const TP_ATR_MULT: Decimal = dec!(0.1);

/// Outcome of one safety check.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyCheck {
    pub passed: bool,
    pub reason: String,
}

impl SafetyCheck {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            reason: reason.into(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
        }
    }
}

/// Per-symbol open-interest change observed between cycles.
#[derive(Debug, Clone)]
pub struct OiChange {
    pub symbol: String,
    pub change_pct: Decimal,
}

fn signed_pct(value: Decimal) -> String {
    if value >= Decimal::ZERO {
        format!("+{value:.2}%")
    } else {
        format!("{value:.2}%")
    }
}

/// Gates trade execution and computes safe sizes and protective prices.
pub struct RiskGate {
    config: RiskConfig,
    news_events: Vec<NewsEvent>,
}

impl RiskGate {
    pub fn new(config: RiskConfig, news_events: Vec<NewsEvent>) -> Self {
        Self {
            config,
            news_events,
        }
    }

    pub fn max_positions(&self) -> u32 {
        self.config.max_positions
    }

    pub fn gates_on_oi_spike(&self) -> bool {
        self.config.gate_on_oi_spike
    }

    pub fn gates_on_volume_spike(&self) -> bool {
        self.config.gate_on_volume_spike
    }

    pub(crate) fn trailing_start_pct(&self) -> Decimal {
        self.config.trailing_start_pct
    }

    pub(crate) fn trailing_distance_pct(&self) -> Decimal {
        self.config.trailing_distance_pct
    }

    /// Daily loss against the day's start balance. An unknown baseline
    /// (start balance <= 0) is unsafe.
    pub fn check_daily_loss(
        &self,
        start_balance: Decimal,
        current_balance: Decimal,
    ) -> SafetyCheck {
        if start_balance <= Decimal::ZERO {
            return SafetyCheck::fail("Start balance is zero or negative");
        }

        let loss_pct = (start_balance - current_balance) / start_balance * Decimal::ONE_HUNDRED;

        if loss_pct >= self.config.daily_loss_limit_pct {
            let reason = format!(
                "Daily loss limit reached: -{loss_pct:.2}% (limit: -{}%)",
                self.config.daily_loss_limit_pct
            );
            warn!("{reason}");
            return SafetyCheck::fail(reason);
        }

        SafetyCheck::pass(format!("Daily P&L: {}", signed_pct(-loss_pct)))
    }

    /// Shorting is suppressed while BTC is in a strong 24h uptrend.
    pub fn check_btc_trend(&self, btc_24h_change: Decimal) -> SafetyCheck {
        if btc_24h_change >= self.config.btc_bull_limit_pct {
            let reason = format!(
                "BTC bull market detected: {} (limit: +{}%)",
                signed_pct(btc_24h_change),
                self.config.btc_bull_limit_pct
            );
            warn!("{reason}");
            return SafetyCheck::fail(reason);
        }

        SafetyCheck::pass(format!("BTC 24h: {}", signed_pct(btc_24h_change)))
    }

    /// No trading within the blackout window around a scheduled event.
    pub fn check_news_blackout(&self, now: DateTime<Utc>) -> SafetyCheck {
        let window = Duration::minutes(self.config.news_blackout_minutes);

        for event in &self.news_events {
            let event_at = event.date.and_time(event.time).and_utc();
            if now >= event_at - window && now <= event_at + window {
                let reason = format!(
                    "News blackout: {} at {} {} UTC",
                    event.label, event.date, event.time
                );
                warn!("{reason}");
                return SafetyCheck::fail(reason);
            }
        }

        SafetyCheck::pass("No news blackout")
    }

    pub fn check_position_count(&self, open_positions: u32) -> SafetyCheck {
        if open_positions >= self.config.max_positions {
            return SafetyCheck::fail(format!(
                "Max positions reached: {open_positions}/{}",
                self.config.max_positions
            ));
        }

        SafetyCheck::pass(format!(
            "Positions: {open_positions}/{}",
            self.config.max_positions
        ))
    }

    /// Run the gating checks in order. Returns the AND of the results along
    /// with every reason (failures do not short-circuit later checks).
    pub fn run_all_checks(
        &self,
        start_balance: Decimal,
        current_balance: Decimal,
        btc_24h_change: Decimal,
        open_positions: u32,
        now: DateTime<Utc>,
    ) -> (bool, Vec<SafetyCheck>) {
        let checks = vec![
            self.check_daily_loss(start_balance, current_balance),
            self.check_btc_trend(btc_24h_change),
            self.check_news_blackout(now),
            self.check_position_count(open_positions),
        ];

        let all_passed = checks.iter().all(|c| c.passed);
        (all_passed, checks)
    }

    /// Extreme open-interest moves anywhere in the market. Reports the top
    /// three offenders by magnitude.
    pub fn check_oi_spike(&self, oi_changes: &[OiChange]) -> SafetyCheck {
        let threshold = self.config.oi_spike_pct;

        let mut spiked: Vec<&OiChange> = oi_changes
            .iter()
            .filter(|c| c.change_pct.abs() >= threshold)
            .collect();

        if !spiked.is_empty() {
            spiked.sort_by(|a, b| b.change_pct.abs().cmp(&a.change_pct.abs()));
            let names: Vec<String> = spiked
                .iter()
                .take(3)
                .map(|c| format!("{} {}", c.symbol, signed_pct(c.change_pct)))
                .collect();
            let reason = format!(
                "OI spike detected: {} (limit: {threshold}%)",
                names.join(", ")
            );
            warn!("{reason}");
            return SafetyCheck::fail(reason);
        }

        if oi_changes.is_empty() {
            return SafetyCheck::pass("OI: no data");
        }

        let avg = oi_changes
            .iter()
            .map(|c| c.change_pct)
            .sum::<Decimal>()
            / Decimal::from(oi_changes.len() as u64);
        SafetyCheck::pass(format!(
            "OI avg change: {} ({} pairs)",
            signed_pct(avg),
            oi_changes.len()
        ))
    }

    /// Market-wide volume anomaly: average current/average volume ratio
    /// across scanned symbols.
    pub fn check_market_volume(&self, market_volume_ratio: Decimal) -> SafetyCheck {
        let threshold = self.config.market_volume_spike_multiplier;

        if market_volume_ratio >= threshold {
            let reason = format!(
                "Market volume spike: {market_volume_ratio:.1}x avg (limit: {threshold}x)"
            );
            warn!("{reason}");
            return SafetyCheck::fail(reason);
        }

        SafetyCheck::pass(format!("Market volume: {market_volume_ratio:.1}x avg"))
    }

    /// Margin for a new position: the configured share of the balance,
    /// divided equally among all position slots. Zero when every slot is
    /// taken — a valid "skip this cycle" outcome, not an error.
    pub fn calculate_position_size(&self, balance: Decimal, open_positions: u32) -> Decimal {
        if open_positions >= self.config.max_positions {
            return Decimal::ZERO;
        }

        let margin = balance * self.config.position_size_pct
            / Decimal::ONE_HUNDRED
            / Decimal::from(self.config.max_positions);
        margin.round_dp(QUOTE_DECIMALS)
    }

    /// Hybrid-ATR stop-loss / take-profit prices for a short at `entry_price`.
    /// The stop sits above entry, the target below.
    pub fn calculate_sl_tp(&self, entry_price: Decimal, atr_pct: Decimal) -> (Decimal, Decimal) {
        let sl_pct = self.config.min_stop_pct.max(SL_ATR_MULT * atr_pct);
        let tp_pct = self.config.min_tp_pct.max(TP_ATR_MULT * atr_pct);

        let stop_loss = entry_price * (Decimal::ONE + sl_pct / Decimal::ONE_HUNDRED);
        let take_profit = entry_price * (Decimal::ONE - tp_pct / Decimal::ONE_HUNDRED);

        (
            stop_loss.round_dp(PRICE_DECIMALS),
            take_profit.round_dp(PRICE_DECIMALS),
        )
    }
}
