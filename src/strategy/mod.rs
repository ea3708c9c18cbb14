//! Signal generation for short candidates.
//!
//! `indicators` holds the numeric primitives; `signal` holds the
//! signal-voting strategies built on top of them.

pub mod indicators;
mod signal;

pub use signal::{evaluate_all, Signal, SignalResult, StrategyKind, MIN_OBSERVATIONS};
