//! Reconciliation of tracked positions against the exchange snapshot.
//!
//! Runs once per cycle before any decision logic. After it returns, the
//! set of tracked symbols equals the set of open shorts the exchange
//! reports, and no tracked position keeps an unset SL/TP once the
//! exchange can supply one.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::{BotState, Position};
use crate::exchange::{ExchangeApi, OpenPosition, PositionSide, TriggerPrices};

/// Bring `state.positions` in line with the exchange's open shorts.
/// Returns whether anything was mutated; the caller persists if so.
pub async fn sync_positions(
    state: &mut BotState,
    exchange_positions: &[OpenPosition],
    exchange: &dyn ExchangeApi,
) -> bool {
    let shorts: HashMap<&str, &OpenPosition> = exchange_positions
        .iter()
        .filter(|p| p.side == PositionSide::Short)
        .map(|p| (p.symbol.as_str(), p))
        .collect();

    let exchange_symbols: HashSet<String> = shorts.keys().map(|s| s.to_string()).collect();
    let known_symbols: HashSet<String> = state.positions.keys().cloned().collect();

    let mut mutated = false;

    // Positions closed while unobserved. Realized PnL is unknown here (no
    // trade-level ledger is consulted), recorded as zero.
    let closed: Vec<String> = known_symbols.difference(&exchange_symbols).cloned().collect();
    for symbol in closed {
        info!(%symbol, "position closed while unobserved, dropping from state");
        state.remove_position(&symbol, Decimal::ZERO);
        mutated = true;
    }

    // Positions on the exchange we do not track (manual trades, API races).
    let untracked: Vec<String> = exchange_symbols.difference(&known_symbols).cloned().collect();
    for symbol in untracked {
        let reported = shorts[symbol.as_str()];
        let (take_profit, stop_loss) =
            backfill_tp_sl(exchange, &symbol, reported.take_profit, reported.stop_loss).await;

        info!(%symbol, "adopting untracked exchange position");
        state.positions.insert(
            symbol.clone(),
            Position {
                symbol: symbol.clone(),
                order_id: "unknown".to_string(),
                entry_price: reported.entry_price,
                amount: reported.contracts,
                margin: reported.margin,
                leverage: reported.leverage,
                stop_loss,
                take_profit,
                current_sl: stop_loss,
                opened_at: Utc::now(),
            },
        );
        mutated = true;
    }

    // Tracked positions with holes in their protective prices.
    let candidates: Vec<String> = exchange_symbols
        .intersection(&known_symbols)
        .cloned()
        .collect();
    for symbol in candidates {
        let (needs_tp, needs_sl) = {
            let tracked = &state.positions[&symbol];
            (tracked.take_profit.is_zero(), tracked.stop_loss.is_zero())
        };
        if !needs_tp && !needs_sl {
            continue;
        }

        let reported = shorts[symbol.as_str()];
        let mut tp_fill = if needs_tp { reported.take_profit } else { None };
        let mut sl_fill = if needs_sl { reported.stop_loss } else { None };

        if (needs_tp && tp_fill.is_none()) || (needs_sl && sl_fill.is_none()) {
            let plan = lookup_plan_orders(exchange, &symbol).await;
            if needs_tp && tp_fill.is_none() {
                tp_fill = plan.take_profit;
            }
            if needs_sl && sl_fill.is_none() {
                sl_fill = plan.stop_loss;
            }
        }

        let tracked = state
            .positions
            .get_mut(&symbol)
            .expect("symbol is in the intersection");
        if let Some(tp) = tp_fill {
            debug!(%symbol, %tp, "backfilled take-profit");
            tracked.take_profit = tp;
            mutated = true;
        }
        if let Some(sl) = sl_fill {
            debug!(%symbol, %sl, "backfilled stop-loss");
            tracked.stop_loss = sl;
            if tracked.current_sl.is_zero() {
                tracked.current_sl = sl;
            }
            mutated = true;
        }
    }

    mutated
}

/// Resolve TP/SL for adoption: position fields first, plan orders second.
async fn backfill_tp_sl(
    exchange: &dyn ExchangeApi,
    symbol: &str,
    position_tp: Option<Decimal>,
    position_sl: Option<Decimal>,
) -> (Decimal, Decimal) {
    let mut take_profit = position_tp.unwrap_or(Decimal::ZERO);
    let mut stop_loss = position_sl.unwrap_or(Decimal::ZERO);

    if take_profit.is_zero() || stop_loss.is_zero() {
        let plan = lookup_plan_orders(exchange, symbol).await;
        if take_profit.is_zero() {
            take_profit = plan.take_profit.unwrap_or(Decimal::ZERO);
        }
        if stop_loss.is_zero() {
            stop_loss = plan.stop_loss.unwrap_or(Decimal::ZERO);
        }
    }

    (take_profit, stop_loss)
}

async fn lookup_plan_orders(exchange: &dyn ExchangeApi, symbol: &str) -> TriggerPrices {
    match exchange.get_tp_sl_for_symbol(symbol).await {
        Ok(prices) => prices,
        Err(e) => {
            warn!(symbol, error = %e, "could not fetch pending trigger orders");
            TriggerPrices::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use rust_decimal_macros::dec;

    fn short(symbol: &str, tp: Option<Decimal>, sl: Option<Decimal>) -> OpenPosition {
        OpenPosition {
            symbol: symbol.to_string(),
            side: PositionSide::Short,
            entry_price: dec!(100),
            mark_price: dec!(98),
            contracts: dec!(5),
            margin: dec!(50),
            leverage: 10,
            unrealized_pnl: dec!(10),
            percentage: dec!(20),
            take_profit: tp,
            stop_loss: sl,
            liquidation_price: Some(dec!(110)),
        }
    }

    fn tracked(symbol: &str, tp: Decimal, sl: Decimal) -> Position {
        Position {
            symbol: symbol.to_string(),
            order_id: "1".to_string(),
            entry_price: dec!(100),
            amount: dec!(5),
            margin: dec!(50),
            leverage: 10,
            stop_loss: sl,
            take_profit: tp,
            current_sl: sl,
            opened_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn removes_positions_the_exchange_no_longer_reports() {
        let mock = MockExchange::new(dec!(1000));
        let mut state = BotState::default();
        state
            .positions
            .insert("ETHUSDT".to_string(), tracked("ETHUSDT", dec!(95), dec!(106)));

        let mutated = sync_positions(&mut state, &[], &mock).await;

        assert!(mutated);
        assert!(state.positions.is_empty());
        // PnL unknown: counted as neither win nor loss
        assert_eq!(state.total_wins, 0);
        assert_eq!(state.total_losses, 0);
    }

    #[tokio::test]
    async fn adopts_untracked_shorts_from_position_fields() {
        let mock = MockExchange::new(dec!(1000));
        let mut state = BotState::default();
        let snapshot = vec![short("ETHUSDT", Some(dec!(94)), Some(dec!(106)))];

        let mutated = sync_positions(&mut state, &snapshot, &mock).await;

        assert!(mutated);
        let adopted = &state.positions["ETHUSDT"];
        assert_eq!(adopted.order_id, "unknown");
        assert_eq!(adopted.entry_price, dec!(100));
        assert_eq!(adopted.amount, dec!(5));
        assert_eq!(adopted.take_profit, dec!(94));
        assert_eq!(adopted.stop_loss, dec!(106));
        assert_eq!(adopted.current_sl, dec!(106));
    }

    #[tokio::test]
    async fn adoption_falls_back_to_plan_orders() {
        let mock = MockExchange::new(dec!(1000));
        mock.set_trigger_prices(
            "ETHUSDT",
            TriggerPrices {
                take_profit: Some(dec!(93)),
                stop_loss: Some(dec!(107)),
            },
        )
        .await;

        let mut state = BotState::default();
        let snapshot = vec![short("ETHUSDT", None, None)];

        sync_positions(&mut state, &snapshot, &mock).await;

        let adopted = &state.positions["ETHUSDT"];
        assert_eq!(adopted.take_profit, dec!(93));
        assert_eq!(adopted.stop_loss, dec!(107));
    }

    #[tokio::test]
    async fn backfill_never_overwrites_known_values() {
        let mock = MockExchange::new(dec!(1000));
        let mut state = BotState::default();
        // Take-profit known, stop-loss missing
        state
            .positions
            .insert("ETHUSDT".to_string(), tracked("ETHUSDT", dec!(94), Decimal::ZERO));

        let snapshot = vec![short("ETHUSDT", Some(dec!(90)), Some(dec!(106)))];
        let mutated = sync_positions(&mut state, &snapshot, &mock).await;

        assert!(mutated);
        let position = &state.positions["ETHUSDT"];
        assert_eq!(position.take_profit, dec!(94)); // untouched
        assert_eq!(position.stop_loss, dec!(106));
        assert_eq!(position.current_sl, dec!(106)); // seeded from backfill
    }

    #[tokio::test]
    async fn reconciliation_is_idempotent() {
        let mock = MockExchange::new(dec!(1000));
        let mut state = BotState::default();
        let snapshot = vec![
            short("ETHUSDT", Some(dec!(94)), Some(dec!(106))),
            short("SOLUSDT", Some(dec!(140)), Some(dec!(160))),
        ];

        let first = sync_positions(&mut state, &snapshot, &mock).await;
        let second = sync_positions(&mut state, &snapshot, &mock).await;

        assert!(first);
        assert!(!second);
        assert_eq!(state.positions.len(), 2);
    }

    #[tokio::test]
    async fn longs_are_ignored() {
        let mock = MockExchange::new(dec!(1000));
        let mut state = BotState::default();
        let mut long = short("BTCUSDT", None, None);
        long.side = PositionSide::Long;

        let mutated = sync_positions(&mut state, &[long], &mock).await;

        assert!(!mutated);
        assert!(state.positions.is_empty());
    }
}
