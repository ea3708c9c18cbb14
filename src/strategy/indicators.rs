//! Indicator primitives over OHLCV series.
//!
//! All series are oldest-first. EMAs are recursively seeded from the first
//! observation; RSI and ATR use Wilder smoothing. Values are `Decimal`
//! end to end so thresholds compare exactly.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::exchange::Candle;

/// Exponential moving average, seeded with the first value.
pub fn ema(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }

    let k = dec!(2) / Decimal::from(period as u64 + 1);
    let one_minus_k = Decimal::ONE - k;

    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    out.push(current);
    for value in &values[1..] {
        current = *value * k + current * one_minus_k;
        out.push(current);
    }
    out
}

/// Wilder-smoothed RSI of the latest bar. `None` when the series is shorter
/// than `period + 1`.
pub fn rsi(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for pair in closes.windows(2) {
        let change = pair[1] - pair[0];
        if change > Decimal::ZERO {
            gains.push(change);
            losses.push(Decimal::ZERO);
        } else {
            gains.push(Decimal::ZERO);
            losses.push(-change);
        }
    }

    let period_dec = Decimal::from(period as u64);
    let mut avg_gain: Decimal = gains[..period].iter().sum::<Decimal>() / period_dec;
    let mut avg_loss: Decimal = losses[..period].iter().sum::<Decimal>() / period_dec;

    let smoothing = period_dec - Decimal::ONE;
    for i in period..gains.len() {
        avg_gain = (avg_gain * smoothing + gains[i]) / period_dec;
        avg_loss = (avg_loss * smoothing + losses[i]) / period_dec;
    }

    if avg_loss.is_zero() {
        return Some(Decimal::ONE_HUNDRED);
    }

    let rs = avg_gain / avg_loss;
    Some(Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs))
}

/// MACD(12, 26) line and its EMA(9) signal line.
pub fn macd(closes: &[Decimal]) -> (Vec<Decimal>, Vec<Decimal>) {
    let ema_fast = ema(closes, 12);
    let ema_slow = ema(closes, 26);

    let macd_line: Vec<Decimal> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(fast, slow)| fast - slow)
        .collect();
    let signal_line = ema(&macd_line, 9);

    (macd_line, signal_line)
}

/// Bearish crossover within the last two bars: the fast series was at or
/// above the slow one and is now below it, at bar t or at bar t-1.
pub fn bearish_cross(fast: &[Decimal], slow: &[Decimal]) -> bool {
    let n = fast.len().min(slow.len());
    if n < 3 {
        return false;
    }

    let cross_now = fast[n - 1] < slow[n - 1] && fast[n - 2] >= slow[n - 2];
    let cross_prev = fast[n - 2] < slow[n - 2] && fast[n - 3] >= slow[n - 3];

    cross_now || cross_prev
}

/// Wilder-smoothed ATR of the latest bar as a percentage of the last close.
/// Returns 999 when the last close is zero (symbol is then filtered out).
pub fn atr_pct(candles: &[Candle], period: usize) -> Decimal {
    let last_close = match candles.last() {
        Some(candle) => candle.close,
        None => return Decimal::ZERO,
    };
    if last_close.is_zero() {
        return dec!(999);
    }
    if period == 0 || candles.len() < period + 1 {
        return Decimal::ZERO;
    }

    let true_ranges: Vec<Decimal> = candles
        .windows(2)
        .map(|pair| {
            let prev_close = pair[0].close;
            let bar = &pair[1];
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect();

    let period_dec = Decimal::from(period as u64);
    let mut atr: Decimal = true_ranges[..period].iter().sum::<Decimal>() / period_dec;
    let smoothing = period_dec - Decimal::ONE;
    for tr in &true_ranges[period..] {
        atr = (atr * smoothing + tr) / period_dec;
    }

    atr / last_close * Decimal::ONE_HUNDRED
}

/// Whether the latest bar's volume exceeds `multiplier` times the trailing
/// `lookback`-bar average (latest bar excluded from the average).
pub fn volume_spike(candles: &[Candle], lookback: usize, multiplier: Decimal) -> bool {
    if lookback == 0 || candles.len() < lookback + 1 {
        return false;
    }

    let n = candles.len();
    let average: Decimal = candles[n - 1 - lookback..n - 1]
        .iter()
        .map(|c| c.volume)
        .sum::<Decimal>()
        / Decimal::from(lookback as u64);

    if average <= Decimal::ZERO {
        return false;
    }

    candles[n - 1].volume > multiplier * average
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_then(extra: &[Decimal]) -> Vec<Decimal> {
        let mut closes = vec![dec!(100); 34];
        closes.extend_from_slice(extra);
        closes
    }

    #[test]
    fn ema_is_seeded_with_first_value() {
        let series = ema(&[dec!(10), dec!(10), dec!(10)], 3);
        assert_eq!(series, vec![dec!(10), dec!(10), dec!(10)]);
    }

    #[test]
    fn ema_reacts_faster_with_shorter_period() {
        let closes = flat_then(&[dec!(90)]);
        let fast = ema(&closes, 9);
        let slow = ema(&closes, 21);
        assert!(fast.last().unwrap() < slow.last().unwrap());
    }

    #[test]
    fn rsi_is_100_for_monotonic_gains() {
        let closes: Vec<Decimal> = (0..40).map(|i| dec!(100) + Decimal::from(i)).collect();
        assert_eq!(rsi(&closes, 14), Some(dec!(100)));
    }

    #[test]
    fn rsi_is_0_for_monotonic_losses() {
        let closes: Vec<Decimal> = (0..40).map(|i| dec!(140) - Decimal::from(i)).collect();
        assert_eq!(rsi(&closes, 14), Some(dec!(0)));
    }

    #[test]
    fn rsi_requires_period_plus_one_observations() {
        let closes = vec![dec!(100); 14];
        assert_eq!(rsi(&closes, 14), None);
    }

    #[test]
    fn cross_fires_on_most_recent_bar() {
        let closes = flat_then(&[dec!(99)]);
        let fast = ema(&closes, 9);
        let slow = ema(&closes, 21);
        assert!(bearish_cross(&fast, &slow));
    }

    #[test]
    fn cross_fires_one_bar_late() {
        // Cross happened at t-1; evaluation at t must still report it.
        let closes = flat_then(&[dec!(99), dec!(98)]);
        let fast = ema(&closes, 9);
        let slow = ema(&closes, 21);
        assert!(bearish_cross(&fast, &slow));
    }

    #[test]
    fn no_cross_without_price_break() {
        let closes = vec![dec!(100); 40];
        let fast = ema(&closes, 9);
        let slow = ema(&closes, 21);
        assert!(!bearish_cross(&fast, &slow));
    }

    #[test]
    fn volume_spike_compares_to_trailing_average() {
        let mut candles: Vec<Candle> = (0..30)
            .map(|i| Candle {
                timestamp: i,
                open: dec!(100),
                high: dec!(100),
                low: dec!(100),
                close: dec!(100),
                volume: dec!(1000),
            })
            .collect();
        assert!(!volume_spike(&candles, 20, dec!(1.5)));

        candles.last_mut().unwrap().volume = dec!(1600);
        assert!(volume_spike(&candles, 20, dec!(1.5)));
    }

    #[test]
    fn atr_pct_reports_999_on_zero_price() {
        let candles = vec![
            Candle {
                timestamp: 0,
                open: dec!(0),
                high: dec!(0),
                low: dec!(0),
                close: dec!(0),
                volume: dec!(0),
            };
            20
        ];
        assert_eq!(atr_pct(&candles, 14), dec!(999));
    }
}
