//! SQLite persistence for bot state.
//!
//! One singleton row for balances and counters, one table for tracked
//! positions. Every save runs in a transaction; an empty database loads
//! as the default state.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use tracing::{debug, info};

use super::{BotState, Position};

/// SQLite-backed store for the singleton [`BotState`].
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open (and initialize) the database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create state directory {parent:?}"))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open state database at {path:?}"))?;

        let store = Self { conn };
        store.init_schema()?;

        info!(path = %path.display(), "state store initialized");
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Bot state (singleton row)
            CREATE TABLE IF NOT EXISTS bot_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                start_balance TEXT NOT NULL,
                day_start_utc TEXT NOT NULL,
                trades_today INTEGER NOT NULL,
                daily_pnl TEXT NOT NULL,
                total_trades INTEGER NOT NULL,
                total_wins INTEGER NOT NULL,
                total_losses INTEGER NOT NULL,
                total_pnl TEXT NOT NULL,
                last_cycle_time TEXT
            );

            -- Tracked open shorts
            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                amount TEXT NOT NULL,
                margin TEXT NOT NULL,
                leverage INTEGER NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                current_sl TEXT NOT NULL,
                opened_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("state schema initialized");
        Ok(())
    }

    /// Persist the complete state.
    pub fn save(&self, state: &BotState) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO bot_state (id, start_balance, day_start_utc, trades_today, daily_pnl,
                                   total_trades, total_wins, total_losses, total_pnl, last_cycle_time)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                start_balance = ?1,
                day_start_utc = ?2,
                trades_today = ?3,
                daily_pnl = ?4,
                total_trades = ?5,
                total_wins = ?6,
                total_losses = ?7,
                total_pnl = ?8,
                last_cycle_time = ?9
            "#,
            params![
                state.start_balance.to_string(),
                state.day_start_utc.to_string(),
                state.trades_today,
                state.daily_pnl.to_string(),
                state.total_trades,
                state.total_wins,
                state.total_losses,
                state.total_pnl.to_string(),
                state.last_cycle_time.map(|t| t.to_rfc3339()),
            ],
        )?;

        tx.execute("DELETE FROM positions", [])?;

        for position in state.positions.values() {
            tx.execute(
                r#"
                INSERT INTO positions (symbol, order_id, entry_price, amount, margin, leverage,
                                       stop_loss, take_profit, current_sl, opened_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    position.symbol,
                    position.order_id,
                    position.entry_price.to_string(),
                    position.amount.to_string(),
                    position.margin.to_string(),
                    position.leverage,
                    position.stop_loss.to_string(),
                    position.take_profit.to_string(),
                    position.current_sl.to_string(),
                    position.opened_at.to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;

        debug!(positions = state.positions.len(), "state saved");
        Ok(())
    }

    /// Load the persisted state, if any.
    pub fn load(&self) -> Result<Option<BotState>> {
        let state_row: Option<(String, String, u32, String, u32, u32, u32, String, Option<String>)> =
            self.conn
                .query_row(
                    r#"
                    SELECT start_balance, day_start_utc, trades_today, daily_pnl,
                           total_trades, total_wins, total_losses, total_pnl, last_cycle_time
                    FROM bot_state WHERE id = 1
                    "#,
                    [],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                            row.get(8)?,
                        ))
                    },
                )
                .optional()?;

        let Some((
            start_balance,
            day_start_utc,
            trades_today,
            daily_pnl,
            total_trades,
            total_wins,
            total_losses,
            total_pnl,
            last_cycle_time,
        )) = state_row
        else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT symbol, order_id, entry_price, amount, margin, leverage,
                   stop_loss, take_profit, current_sl, opened_at
            FROM positions
            "#,
        )?;

        let positions: HashMap<String, Position> = stmt
            .query_map([], |row| {
                let symbol: String = row.get(0)?;
                Ok((
                    symbol.clone(),
                    Position {
                        symbol,
                        order_id: row.get(1)?,
                        entry_price: Decimal::from_str(&row.get::<_, String>(2)?)
                            .unwrap_or_default(),
                        amount: Decimal::from_str(&row.get::<_, String>(3)?).unwrap_or_default(),
                        margin: Decimal::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
                        leverage: row.get(5)?,
                        stop_loss: Decimal::from_str(&row.get::<_, String>(6)?)
                            .unwrap_or_default(),
                        take_profit: Decimal::from_str(&row.get::<_, String>(7)?)
                            .unwrap_or_default(),
                        current_sl: Decimal::from_str(&row.get::<_, String>(8)?)
                            .unwrap_or_default(),
                        opened_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(9)?)
                            .map(|dt| dt.with_timezone(&Utc))
                            .unwrap_or_else(|_| Utc::now()),
                    },
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        let state = BotState {
            start_balance: Decimal::from_str(&start_balance).unwrap_or_default(),
            day_start_utc: NaiveDate::parse_from_str(&day_start_utc, "%Y-%m-%d")
                .unwrap_or_else(|_| Utc::now().date_naive()),
            positions,
            trades_today,
            daily_pnl: Decimal::from_str(&daily_pnl).unwrap_or_default(),
            total_trades,
            total_wins,
            total_losses,
            total_pnl: Decimal::from_str(&total_pnl).unwrap_or_default(),
            last_cycle_time: last_cycle_time.and_then(|t| {
                DateTime::parse_from_rfc3339(&t)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            }),
        };

        info!(
            positions = state.positions.len(),
            day = %state.day_start_utc,
            "state loaded from database"
        );

        Ok(Some(state))
    }

    /// Load the persisted state, or start fresh.
    pub fn load_or_default(&self) -> Result<BotState> {
        Ok(self.load()?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_state() -> BotState {
        let mut state = BotState {
            start_balance: dec!(1000),
            day_start_utc: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            trades_today: 2,
            daily_pnl: dec!(-3.5),
            total_trades: 10,
            total_wins: 6,
            total_losses: 3,
            total_pnl: dec!(42.75),
            last_cycle_time: Some(Utc::now()),
            ..BotState::default()
        };
        state.positions.insert(
            "ETHUSDT".to_string(),
            Position {
                symbol: "ETHUSDT".to_string(),
                order_id: "123".to_string(),
                entry_price: dec!(2500),
                amount: dec!(0.2),
                margin: dec!(50),
                leverage: 10,
                stop_loss: dec!(2650),
                take_profit: dec!(2375),
                current_sl: dec!(2600),
                opened_at: Utc::now(),
            },
        );
        state
    }

    #[test]
    fn save_and_load_round_trip() {
        let store = StateStore::in_memory().unwrap();
        let state = sample_state();

        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded.start_balance, dec!(1000));
        assert_eq!(loaded.trades_today, 2);
        assert_eq!(loaded.total_pnl, dec!(42.75));
        assert_eq!(loaded.positions.len(), 1);
        assert_eq!(loaded.positions["ETHUSDT"].current_sl, dec!(2600));
        assert_eq!(
            loaded.day_start_utc,
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );
    }

    #[test]
    fn empty_database_loads_as_default() {
        let store = StateStore::in_memory().unwrap();
        assert!(store.load().unwrap().is_none());

        let state = store.load_or_default().unwrap();
        assert_eq!(state.start_balance, Decimal::ZERO);
        assert!(state.positions.is_empty());
    }

    #[test]
    fn removed_positions_disappear_on_resave() {
        let store = StateStore::in_memory().unwrap();
        let mut state = sample_state();

        store.save(&state).unwrap();
        state.remove_position("ETHUSDT", dec!(5));
        store.save(&state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert!(loaded.positions.is_empty());
        assert_eq!(loaded.total_wins, 7);
    }
}
