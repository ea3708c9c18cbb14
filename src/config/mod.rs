//! Configuration management for the short bot.
//!
//! Loads settings from a config file and environment variables.

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::strategy::StrategyKind;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange API credentials
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Risk management parameters
    #[serde(default)]
    pub risk: RiskConfig,
    /// Market scan parameters
    #[serde(default)]
    pub scan: ScanConfig,
    /// Order execution parameters
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Minutes between trading cycles
    #[serde(default = "default_cycle_minutes")]
    pub cycle_minutes: u64,
    /// Scheduled macro events that suspend trading
    #[serde(default)]
    pub news_events: Vec<NewsEvent>,
    /// Path to the SQLite state database
    #[serde(default = "default_state_db")]
    pub state_db: String,
    /// Directory for per-cycle JSON reports
    #[serde(default = "default_report_dir")]
    pub report_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub api_secret: String,
    /// API passphrase
    #[serde(default)]
    pub passphrase: String,
    /// Use the exchange demo environment instead of production
    #[serde(default = "default_demo")]
    pub demo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Daily loss limit as a percentage of the day's start balance
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: Decimal,
    /// Suppress shorting when BTC 24h change reaches this percentage
    #[serde(default = "default_btc_bull_limit_pct")]
    pub btc_bull_limit_pct: Decimal,
    /// Maximum number of concurrent short positions
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    /// Blackout window on either side of a news event, in minutes
    #[serde(default = "default_news_blackout_minutes")]
    pub news_blackout_minutes: i64,
    /// Profit percentage at which the trailing stop activates
    #[serde(default = "default_trailing_start_pct")]
    pub trailing_start_pct: Decimal,
    /// Distance the trailing stop keeps behind the best profit
    #[serde(default = "default_trailing_distance_pct")]
    pub trailing_distance_pct: Decimal,
    /// Percentage of balance deployed across all position slots
    #[serde(default = "default_position_size_pct")]
    pub position_size_pct: Decimal,
    /// Minimum stop-loss distance as a percentage of entry
    #[serde(default = "default_min_stop_pct")]
    pub min_stop_pct: Decimal,
    /// Minimum take-profit distance as a percentage of entry
    #[serde(default = "default_min_tp_pct")]
    pub min_tp_pct: Decimal,
    /// Open-interest change percentage treated as a spike
    #[serde(default = "default_oi_spike_pct")]
    pub oi_spike_pct: Decimal,
    /// Market-wide volume ratio treated as a spike
    #[serde(default = "default_market_volume_spike_multiplier")]
    pub market_volume_spike_multiplier: Decimal,
    /// Whether a failed open-interest check blocks trade execution
    #[serde(default)]
    pub gate_on_oi_spike: bool,
    /// Whether a failed market-volume check blocks trade execution
    #[serde(default)]
    pub gate_on_volume_spike: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Candle timeframe used for analysis
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Number of candles fetched per symbol
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,
    /// Minimum 24h quote volume for a symbol to be scanned
    #[serde(default = "default_min_volume_usd")]
    pub min_volume_usd: Decimal,
    /// Symbols with ATR above this percentage are excluded
    #[serde(default = "default_max_atr_pct")]
    pub max_atr_pct: Decimal,
    /// Minimum signal count required to open a trade
    #[serde(default = "default_min_signals")]
    pub min_signals: u8,
    /// Strategy whose vote decides trade execution
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
    /// Number of ranked scan entries kept for reporting
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Delay between per-symbol evaluations, in milliseconds
    #[serde(default = "default_symbol_delay_ms")]
    pub symbol_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Leverage applied to every short
    #[serde(default = "default_leverage")]
    pub leverage: u32,
}

/// A scheduled macro event (CPI print, FOMC, ...) in UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsEvent {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub label: String,
}

// Default value functions

fn default_demo() -> bool {
    true
}

fn default_daily_loss_limit_pct() -> Decimal {
    Decimal::new(5, 0) // 5%
}

fn default_btc_bull_limit_pct() -> Decimal {
    Decimal::new(5, 0) // 5%
}

fn default_max_positions() -> u32 {
    5
}

fn default_news_blackout_minutes() -> i64 {
    30
}

fn default_trailing_start_pct() -> Decimal {
    Decimal::new(3, 0) // Activate after +3% profit
}

fn default_trailing_distance_pct() -> Decimal {
    Decimal::new(2, 0) // Trail 2% behind
}

fn default_position_size_pct() -> Decimal {
    Decimal::new(50, 0) // Deploy half the balance across all slots
}

fn default_min_stop_pct() -> Decimal {
    Decimal::new(2, 0)
}

fn default_min_tp_pct() -> Decimal {
    Decimal::new(5, 0)
}

fn default_oi_spike_pct() -> Decimal {
    Decimal::new(10, 0) // 10% OI change
}

fn default_market_volume_spike_multiplier() -> Decimal {
    Decimal::new(3, 0) // 3x average volume
}

fn default_timeframe() -> String {
    "15m".to_string()
}

fn default_candle_limit() -> u32 {
    100
}

fn default_min_volume_usd() -> Decimal {
    Decimal::new(5_000_000, 0) // $5M 24h quote volume
}

fn default_max_atr_pct() -> Decimal {
    Decimal::new(15, 0)
}

fn default_min_signals() -> u8 {
    3
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Volume
}

fn default_top_n() -> usize {
    20
}

fn default_symbol_delay_ms() -> u64 {
    100
}

fn default_leverage() -> u32 {
    10
}

fn default_cycle_minutes() -> u64 {
    15
}

fn default_state_db() -> String {
    "data/state.db".to_string()
}

fn default_report_dir() -> String {
    "reports".to_string()
}

impl Config {
    /// Load configuration from `config.toml` and environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("SHORTBOT"),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.risk.max_positions >= 1, "max_positions must be >= 1");

        anyhow::ensure!(
            self.risk.position_size_pct > Decimal::ZERO
                && self.risk.position_size_pct <= Decimal::ONE_HUNDRED,
            "position_size_pct must be between 0 and 100"
        );

        anyhow::ensure!(
            self.risk.trailing_start_pct > Decimal::ZERO,
            "trailing_start_pct must be positive"
        );

        anyhow::ensure!(self.execution.leverage >= 1, "leverage must be >= 1");

        anyhow::ensure!(self.cycle_minutes >= 1, "cycle_minutes must be >= 1");

        if !self.exchange.demo {
            anyhow::ensure!(
                !self.exchange.api_key.is_empty() && !self.exchange.api_secret.is_empty(),
                "live mode requires api_key and api_secret"
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            risk: RiskConfig::default(),
            scan: ScanConfig::default(),
            execution: ExecutionConfig::default(),
            cycle_minutes: default_cycle_minutes(),
            news_events: Vec::new(),
            state_db: default_state_db(),
            report_dir: default_report_dir(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            passphrase: String::new(),
            demo: default_demo(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            btc_bull_limit_pct: default_btc_bull_limit_pct(),
            max_positions: default_max_positions(),
            news_blackout_minutes: default_news_blackout_minutes(),
            trailing_start_pct: default_trailing_start_pct(),
            trailing_distance_pct: default_trailing_distance_pct(),
            position_size_pct: default_position_size_pct(),
            min_stop_pct: default_min_stop_pct(),
            min_tp_pct: default_min_tp_pct(),
            oi_spike_pct: default_oi_spike_pct(),
            market_volume_spike_multiplier: default_market_volume_spike_multiplier(),
            gate_on_oi_spike: false,
            gate_on_volume_spike: false,
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            timeframe: default_timeframe(),
            candle_limit: default_candle_limit(),
            min_volume_usd: default_min_volume_usd(),
            max_atr_pct: default_max_atr_pct(),
            min_signals: default_min_signals(),
            strategy: default_strategy(),
            top_n: default_top_n(),
            symbol_delay_ms: default_symbol_delay_ms(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            leverage: default_leverage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn live_mode_requires_credentials() {
        let mut config = Config::default();
        config.exchange.demo = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_strategy_is_volume() {
        let config = Config::default();
        assert_eq!(config.scan.strategy, StrategyKind::Volume);
    }
}
