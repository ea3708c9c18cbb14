//! Signal-voting strategies.
//!
//! Each strategy inspects one symbol's recent candles (plus the funding
//! rate when available) and reports which of its four conditions fired.
//! The cycle controller ranks candidates by that vote.

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::indicators;
use crate::exchange::Candle;

/// Minimum observations before any strategy produces a vote.
pub const MIN_OBSERVATIONS: usize = 30;

const RSI_PERIOD: usize = 14;
const ATR_PERIOD: usize = 14;
const EMA_FAST: usize = 9;
const EMA_SLOW: usize = 21;
const VOLUME_LOOKBACK: usize = 20;
const VOLUME_SPIKE_MULT: Decimal = dec!(1.5);
const FUNDING_THRESHOLD: Decimal = dec!(0.0001); // 0.01%
const MAX_SIGNALS: u8 = 4;
/// In the volume strategy an EMA cross alone counts as this many votes.
const EMA_STANDALONE_COUNT: u8 = 3;

/// One triggered condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    Rsi,
    EmaCross,
    MacdCross,
    Funding,
    VolSpike,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Rsi => "RSI",
            Signal::EmaCross => "EMA_CROSS",
            Signal::MacdCross => "MACD_CROSS",
            Signal::Funding => "FUNDING",
            Signal::VolSpike => "VOL_SPIKE",
        };
        write!(f, "{name}")
    }
}

/// Available strategies, selected by name in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Classic,
    Volume,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 2] = [StrategyKind::Classic, StrategyKind::Volume];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Classic => "classic",
            StrategyKind::Volume => "volume",
        }
    }

    fn rsi_threshold(&self) -> Decimal {
        match self {
            StrategyKind::Classic => dec!(70),
            StrategyKind::Volume => dec!(65),
        }
    }

    /// Evaluate this strategy on one symbol.
    ///
    /// Never fails: a series shorter than [`MIN_OBSERVATIONS`] yields an
    /// empty result (the caller filters those symbols out beforehand).
    pub fn evaluate(&self, candles: &[Candle], funding_rate: Option<Decimal>) -> SignalResult {
        let mut result = SignalResult::empty(*self);
        if candles.len() < MIN_OBSERVATIONS {
            return result;
        }

        let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();

        let rsi = indicators::rsi(&closes, RSI_PERIOD).unwrap_or(Decimal::ZERO);
        result.rsi = rsi;
        result.atr_pct = indicators::atr_pct(candles, ATR_PERIOD);

        let threshold = self.rsi_threshold();
        if rsi > threshold {
            result.signals.push(Signal::Rsi);
            result.details.push(format!("RSI={rsi:.1} (>{threshold})"));
        }

        let ema_fast = indicators::ema(&closes, EMA_FAST);
        let ema_slow = indicators::ema(&closes, EMA_SLOW);
        let has_ema_cross = indicators::bearish_cross(&ema_fast, &ema_slow);
        if has_ema_cross {
            result.signals.push(Signal::EmaCross);
            result
                .details
                .push(format!("EMA({EMA_FAST})<EMA({EMA_SLOW})"));
        }

        match self {
            StrategyKind::Classic => {
                let (macd_line, signal_line) = indicators::macd(&closes);
                if indicators::bearish_cross(&macd_line, &signal_line) {
                    result.signals.push(Signal::MacdCross);
                    result.details.push("MACD bearish cross".to_string());
                }
            }
            StrategyKind::Volume => {
                if indicators::volume_spike(candles, VOLUME_LOOKBACK, VOLUME_SPIKE_MULT) {
                    result.signals.push(Signal::VolSpike);
                    result.details.push("Volume >1.5x avg".to_string());
                }
            }
        }

        if let Some(rate) = funding_rate {
            if rate > FUNDING_THRESHOLD {
                result.signals.push(Signal::Funding);
                result
                    .details
                    .push(format!("FR={:.4}%", rate * Decimal::ONE_HUNDRED));
            }
        }

        let actual = result.signals.len() as u8;
        result.signal_count = match self {
            // EMA cross is a sufficient standalone signal in the volume strategy
            StrategyKind::Volume if has_ema_cross && actual < EMA_STANDALONE_COUNT => {
                EMA_STANDALONE_COUNT
            }
            _ => actual,
        };

        result
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The vote one strategy produced for one symbol, one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SignalResult {
    pub strategy: StrategyKind,
    pub signals: Vec<Signal>,
    /// Vote count after the strategy's tie-break rule
    pub signal_count: u8,
    pub max_signals: u8,
    pub rsi: Decimal,
    pub atr_pct: Decimal,
    pub details: Vec<String>,
}

impl SignalResult {
    fn empty(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            signals: Vec::new(),
            signal_count: 0,
            max_signals: MAX_SIGNALS,
            rsi: Decimal::ZERO,
            atr_pct: Decimal::ZERO,
            details: Vec::new(),
        }
    }

    /// Compact `2/4[RSI,EMA_CROSS]` rendering for scan logs.
    pub fn summary(&self) -> String {
        let names: Vec<String> = self.signals.iter().map(|s| s.to_string()).collect();
        format!(
            "{}/{}[{}]",
            self.signal_count,
            self.max_signals,
            names.join(",")
        )
    }
}

/// Run every registered strategy on one symbol.
pub fn evaluate_all(candles: &[Candle], funding_rate: Option<Decimal>) -> Vec<SignalResult> {
    StrategyKind::ALL
        .iter()
        .map(|strategy| strategy.evaluate(candles, funding_rate))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles_from_closes(closes: &[Decimal]) -> Vec<Candle> {
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

    fn rising_series() -> Vec<Candle> {
        let closes: Vec<Decimal> = (0..40).map(|i| dec!(100) + Decimal::from(i)).collect();
        candles_from_closes(&closes)
    }

    fn falling_series() -> Vec<Candle> {
        let closes: Vec<Decimal> = (0..40).map(|i| dec!(140) - Decimal::from(i)).collect();
        candles_from_closes(&closes)
    }

    /// Flat prices with a single drop on the final bar: bearish EMA and MACD
    /// crosses fire on the last bar, RSI collapses to zero.
    fn cross_on_last_bar() -> Vec<Candle> {
        let mut closes = vec![dec!(100); 34];
        closes.push(dec!(99));
        candles_from_closes(&closes)
    }

    #[test]
    fn classic_reports_rsi_above_70() {
        let result = StrategyKind::Classic.evaluate(&rising_series(), None);
        assert!(result.rsi > dec!(70));
        assert!(result.signals.contains(&Signal::Rsi));
    }

    #[test]
    fn classic_omits_rsi_at_or_below_70() {
        let result = StrategyKind::Classic.evaluate(&falling_series(), None);
        assert!(result.rsi <= dec!(70));
        assert!(!result.signals.contains(&Signal::Rsi));
    }

    #[test]
    fn classic_counts_raw_signals() {
        // EMA and MACD both cross on the last bar; nothing else fires.
        let result = StrategyKind::Classic.evaluate(&cross_on_last_bar(), None);
        assert_eq!(
            result.signals,
            vec![Signal::EmaCross, Signal::MacdCross]
        );
        assert_eq!(result.signal_count, 2);
    }

    #[test]
    fn volume_forces_three_votes_on_lone_ema_cross() {
        let result = StrategyKind::Volume.evaluate(&cross_on_last_bar(), None);
        assert_eq!(result.signals, vec![Signal::EmaCross]);
        assert_eq!(result.signal_count, 3);
        assert_eq!(result.max_signals, 4);
    }

    #[test]
    fn volume_keeps_raw_count_at_three_or_more() {
        let mut candles = cross_on_last_bar();
        candles.last_mut().unwrap().volume = dec!(2000); // spike
        let result = StrategyKind::Volume.evaluate(&candles, Some(dec!(0.0005)));
        assert_eq!(result.signal_count, 3); // EMA + VOL_SPIKE + FUNDING
        assert!(result.signals.contains(&Signal::VolSpike));
        assert!(result.signals.contains(&Signal::Funding));
    }

    #[test]
    fn funding_at_threshold_does_not_fire() {
        let result = StrategyKind::Classic.evaluate(&rising_series(), Some(dec!(0.0001)));
        assert!(!result.signals.contains(&Signal::Funding));
    }

    #[test]
    fn funding_above_threshold_fires() {
        let result = StrategyKind::Classic.evaluate(&rising_series(), Some(dec!(0.0002)));
        assert!(result.signals.contains(&Signal::Funding));
    }

    #[test]
    fn short_series_yields_empty_result() {
        let closes = vec![dec!(100); MIN_OBSERVATIONS - 1];
        let result = StrategyKind::Volume.evaluate(&candles_from_closes(&closes), None);
        assert_eq!(result.signal_count, 0);
        assert!(result.signals.is_empty());
        assert_eq!(result.rsi, Decimal::ZERO);
    }

    #[test]
    fn cross_detection_is_invariant_to_one_cycle_delay() {
        // Same drop, evaluated one bar later: the vote must not be lost.
        let mut closes = vec![dec!(100); 34];
        closes.push(dec!(99));
        let at_cross = StrategyKind::Volume.evaluate(&candles_from_closes(&closes), None);

        closes.push(dec!(98.9));
        let one_later = StrategyKind::Volume.evaluate(&candles_from_closes(&closes), None);

        assert!(at_cross.signals.contains(&Signal::EmaCross));
        assert!(one_later.signals.contains(&Signal::EmaCross));
    }

    #[test]
    fn evaluate_all_covers_every_strategy() {
        let results = evaluate_all(&cross_on_last_bar(), None);
        assert_eq!(results.len(), StrategyKind::ALL.len());
        assert_eq!(results[0].strategy, StrategyKind::Classic);
        assert_eq!(results[1].strategy, StrategyKind::Volume);
    }
}
