//! Risk management: the gate every trade passes through.
//!
//! - Safety checks (loss limit, trend filter, blackouts, anomalies)
//! - Position sizing
//! - Stop-loss / take-profit targets
//! - The trailing-stop rule for open shorts

mod gate;
mod trailing;

pub use gate::{OiChange, RiskGate, SafetyCheck};
