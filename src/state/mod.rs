//! Durable bot state: tracked positions and trade counters.
//!
//! Exactly one [`BotState`] exists per process. Every mutation is followed
//! by a synchronous save through [`StateStore`], so a crash between
//! mutation and persist is the only window of inconsistency.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::exchange::PlacedOrder;

mod reconcile;
mod store;

pub use reconcile::sync_positions;
pub use store::StateStore;

/// One tracked open short.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub order_id: String,
    pub entry_price: Decimal,
    /// Contract amount
    pub amount: Decimal,
    /// Committed margin in quote currency
    pub margin: Decimal,
    pub leverage: u32,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Trailing stop; starts at `stop_loss` and only ever tightens
    pub current_sl: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Track an order the exchange just accepted.
    pub fn from_order(order: &PlacedOrder) -> Self {
        let stop_loss = order.stop_loss.unwrap_or(Decimal::ZERO);
        Self {
            symbol: order.symbol.clone(),
            order_id: order.order_id.clone(),
            entry_price: order.entry_price,
            amount: order.amount,
            margin: order.margin,
            leverage: order.leverage,
            stop_loss,
            take_profit: order.take_profit,
            current_sl: stop_loss,
            opened_at: order.timestamp,
        }
    }
}

/// Process-durable record: balance baseline, positions, counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotState {
    /// Balance at the start of the current accounting day (0 = unset)
    pub start_balance: Decimal,
    /// UTC day the daily counters belong to
    pub day_start_utc: NaiveDate,
    pub positions: HashMap<String, Position>,
    pub trades_today: u32,
    pub daily_pnl: Decimal,
    pub total_trades: u32,
    pub total_wins: u32,
    pub total_losses: u32,
    pub total_pnl: Decimal,
    pub last_cycle_time: Option<DateTime<Utc>>,
}

impl Default for BotState {
    fn default() -> Self {
        Self {
            start_balance: Decimal::ZERO,
            day_start_utc: Utc::now().date_naive(),
            positions: HashMap::new(),
            trades_today: 0,
            daily_pnl: Decimal::ZERO,
            total_trades: 0,
            total_wins: 0,
            total_losses: 0,
            total_pnl: Decimal::ZERO,
            last_cycle_time: None,
        }
    }
}

impl BotState {
    /// Reset the daily counters when the UTC calendar day has changed.
    /// The start balance is cleared and re-seeded on the next cycle.
    pub fn rollover_if_new_day(&mut self, today: NaiveDate) -> bool {
        if self.day_start_utc == today {
            return false;
        }

        info!(%today, "new day detected, resetting daily counters");
        self.day_start_utc = today;
        self.start_balance = Decimal::ZERO;
        self.trades_today = 0;
        self.daily_pnl = Decimal::ZERO;
        true
    }

    /// Track a freshly opened position and bump the trade counters.
    pub fn add_position(&mut self, position: Position) {
        info!(symbol = %position.symbol, "position added to state");
        self.positions.insert(position.symbol.clone(), position);
        self.trades_today += 1;
        self.total_trades += 1;
    }

    /// Remove a closed position, folding its realized PnL into the ledger.
    pub fn remove_position(&mut self, symbol: &str, pnl: Decimal) -> Option<Position> {
        let removed = self.positions.remove(symbol)?;

        self.daily_pnl += pnl;
        self.total_pnl += pnl;
        if pnl > Decimal::ZERO {
            self.total_wins += 1;
        } else if pnl < Decimal::ZERO {
            self.total_losses += 1;
        }

        info!(symbol, %pnl, "position removed from state");
        Some(removed)
    }

    /// Formatted stats line for the end-of-cycle log.
    pub fn stats_line(&self) -> String {
        let win_rate = if self.total_trades > 0 {
            Decimal::from(self.total_wins) / Decimal::from(self.total_trades)
                * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        format!(
            "Stats: {} trades | W:{} L:{} ({win_rate:.1}% win rate) | Daily P&L: {:.2} USDT | Total P&L: {:.2} USDT",
            self.total_trades, self.total_wins, self.total_losses, self.daily_pnl, self.total_pnl
        )
    }
}
