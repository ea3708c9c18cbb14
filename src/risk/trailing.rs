//! Trailing-stop rule for open shorts.

use rust_decimal::Decimal;

use super::gate::{RiskGate, PRICE_DECIMALS};

impl RiskGate {
    /// Compute a tighter stop-loss for a short, if one is warranted.
    ///
    /// A short profits as price falls: `profit_pct = (entry - current) /
    /// entry * 100`. Below `trailing_start_pct` nothing happens. Once
    /// active, the stop locks in `profit_pct - trailing_distance_pct`
    /// (breakeven when that is not yet positive). The candidate is applied
    /// only when strictly lower than the recorded stop, so a position's
    /// stop never loosens.
    pub fn trailing_stop(
        &self,
        entry_price: Decimal,
        current_price: Decimal,
        current_sl: Decimal,
    ) -> Option<Decimal> {
        if entry_price <= Decimal::ZERO {
            return None;
        }

        let profit_pct = (entry_price - current_price) / entry_price * Decimal::ONE_HUNDRED;
        if profit_pct < self.trailing_start_pct() {
            return None;
        }

        let locked_pct = profit_pct - self.trailing_distance_pct();
        let new_sl = if locked_pct <= Decimal::ZERO {
            entry_price
        } else {
            entry_price * (Decimal::ONE - locked_pct / Decimal::ONE_HUNDRED)
        };
        let new_sl = new_sl.round_dp(PRICE_DECIMALS);

        if new_sl < current_sl {
            Some(new_sl)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RiskConfig;
    use crate::risk::RiskGate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn gate() -> RiskGate {
        // trailing_start_pct = 3, trailing_distance_pct = 2
        RiskGate::new(RiskConfig::default(), Vec::new())
    }

    #[test]
    fn inactive_below_start_threshold() {
        assert_eq!(gate().trailing_stop(dec!(100), dec!(98), dec!(106)), None);
    }

    #[test]
    fn locks_profit_minus_distance() {
        // 5% profit, 2% distance -> stop at entry * (1 - 3%)
        assert_eq!(
            gate().trailing_stop(dec!(100), dec!(95), dec!(106)),
            Some(dec!(97))
        );
    }

    #[test]
    fn moves_to_breakeven_when_lock_is_not_positive() {
        let config = RiskConfig {
            trailing_start_pct: dec!(3),
            trailing_distance_pct: dec!(4),
            ..RiskConfig::default()
        };
        let gate = RiskGate::new(config, Vec::new());

        // 3.5% profit - 4% distance <= 0 -> breakeven stop at entry
        assert_eq!(
            gate.trailing_stop(dec!(100), dec!(96.5), dec!(106)),
            Some(dec!(100))
        );
    }

    #[test]
    fn repeated_invocation_is_idempotent() {
        let gate = gate();
        let first = gate.trailing_stop(dec!(100), dec!(95), dec!(106)).unwrap();
        // Same price again: candidate equals the recorded stop, no update
        assert_eq!(gate.trailing_stop(dec!(100), dec!(95), first), None);
    }

    #[test]
    fn never_loosens_on_a_worse_price() {
        let gate = gate();
        let tightened = gate.trailing_stop(dec!(100), dec!(92), dec!(106)).unwrap();
        assert_eq!(tightened, dec!(94));

        // Price pulls back to -4%: candidate 98 is higher, stop stays put
        assert_eq!(gate.trailing_stop(dec!(100), dec!(96), tightened), None);
    }

    #[test]
    fn zero_entry_price_is_a_no_op() {
        assert_eq!(gate().trailing_stop(Decimal::ZERO, dec!(95), dec!(106)), None);
    }
}
