//! Per-cycle summary structure and reporter.
//!
//! Every cycle — trade, no-trade or failure — produces one [`CycleReport`]
//! that is logged and appended as a JSON line under the report directory.
//! Nothing fails silently.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::risk::SafetyCheck;
use crate::state::BotState;
use crate::strategy::{Signal, SignalResult, StrategyKind};

/// One scanned symbol, carrying the active strategy's numbers plus the
/// detail of every registered strategy.
#[derive(Debug, Clone, Serialize)]
pub struct ScanEntry {
    pub symbol: String,
    pub rsi: Decimal,
    pub atr_pct: Decimal,
    pub funding_rate: Decimal,
    pub signal_count: u8,
    pub signals: Vec<Signal>,
    pub details: Vec<String>,
    pub strategies: Vec<SignalResult>,
}

/// Lifetime and daily counters for the report.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub trades_today: u32,
    pub total_trades: u32,
    pub total_wins: u32,
    pub total_losses: u32,
    pub win_rate_pct: Decimal,
    pub daily_pnl: Decimal,
    pub total_pnl: Decimal,
}

impl StatsSummary {
    pub fn from_state(state: &BotState) -> Self {
        let win_rate_pct = if state.total_trades > 0 {
            (Decimal::from(state.total_wins) / Decimal::from(state.total_trades)
                * Decimal::ONE_HUNDRED)
                .round_dp(1)
        } else {
            Decimal::ZERO
        };

        Self {
            trades_today: state.trades_today,
            total_trades: state.total_trades,
            total_wins: state.total_wins,
            total_losses: state.total_losses,
            win_rate_pct,
            daily_pnl: state.daily_pnl,
            total_pnl: state.total_pnl,
        }
    }
}

/// The full summary of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub balance: Decimal,
    pub all_safe: bool,
    pub checks: Vec<SafetyCheck>,
    pub outcome: String,
    pub active_strategy: StrategyKind,
    pub scan_results: Vec<ScanEntry>,
    pub api_calls: u64,
    pub api_calls_per_sec: Decimal,
    pub stats: StatsSummary,
}

/// Appends cycle summaries as JSON lines.
pub struct Reporter {
    path: PathBuf,
}

impl Reporter {
    /// Create a reporter writing to `<dir>/cycles.jsonl`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create report directory {dir:?}"))?;

        Ok(Self {
            path: dir.join("cycles.jsonl"),
        })
    }

    /// Record one cycle.
    pub fn record(&self, report: &CycleReport) -> Result<()> {
        info!(
            outcome = %report.outcome,
            all_safe = report.all_safe,
            scanned = report.scan_results.len(),
            api_calls = report.api_calls,
            "cycle complete"
        );

        let line = serde_json::to_string(report).context("Failed to serialize cycle report")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open report file {:?}", self.path))?;
        writeln!(file, "{line}").context("Failed to append cycle report")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_report() -> CycleReport {
        CycleReport {
            started_at: Utc::now(),
            balance: dec!(500),
            all_safe: true,
            checks: vec![SafetyCheck::pass("BTC 24h: +2.00%")],
            outcome: "Opened SHORT ETHUSDT".to_string(),
            active_strategy: StrategyKind::Volume,
            scan_results: Vec::new(),
            api_calls: 17,
            api_calls_per_sec: dec!(0.02),
            stats: StatsSummary::from_state(&BotState::default()),
        }
    }

    #[test]
    fn report_serializes_to_one_json_line() {
        let dir = std::env::temp_dir().join(format!("shortbot-report-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let reporter = Reporter::new(&dir).unwrap();
        reporter.record(&sample_report()).unwrap();
        reporter.record(&sample_report()).unwrap();

        let contents = std::fs::read_to_string(dir.join("cycles.jsonl")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["outcome"], "Opened SHORT ETHUSDT");
        assert_eq!(parsed["active_strategy"], "volume");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn win_rate_handles_zero_trades() {
        let stats = StatsSummary::from_state(&BotState::default());
        assert_eq!(stats.win_rate_pct, Decimal::ZERO);
    }

    #[test]
    fn win_rate_is_wins_over_total() {
        let state = BotState {
            total_trades: 8,
            total_wins: 6,
            total_losses: 2,
            ..BotState::default()
        };
        assert_eq!(StatsSummary::from_state(&state).win_rate_pct, dec!(75.0));
    }
}
