//! # Perp Short Bot
//!
//! A risk-gated trading bot that periodically scans USDT perpetual futures,
//! opens leveraged short positions when a signal-voting strategy and a set of
//! safety checks agree, and maintains trailing protective stops for positions
//! already open. Local state survives restarts and is reconciled against the
//! exchange every cycle.
//!
//! ## Architecture
//!
//! - `config`: Typed configuration loaded once at startup
//! - `exchange`: Exchange capability boundary (REST client + mock)
//! - `strategy`: Indicator primitives and signal-voting strategies
//! - `risk`: Safety checks, position sizing, and the trailing-stop rule
//! - `state`: Durable position/counter state and exchange reconciliation
//! - `cycle`: The cycle controller orchestrating one full decision cycle
//! - `report`: Per-cycle summary structure and JSON-lines reporter
//! - `api`: Manual-order HTTP endpoint reusing the same risk primitives

pub mod api;
pub mod config;
pub mod cycle;
pub mod exchange;
pub mod report;
pub mod risk;
pub mod state;
pub mod strategy;

pub use config::Config;
