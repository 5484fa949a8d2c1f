//! Phemex Guard - Automated position-risk manager for leveraged perpetuals
//!
//! Features:
//! - Trailing-stop ratchet with persisted per-(symbol, side) state
//! - Liquidation-proximity re-entry orders
//! - Orphan order and stale-state reconciliation
//! - Fixed-interval polling against the Phemex REST API

pub mod api;
pub mod config;
pub mod risk;
pub mod utils;

// Re-export commonly used types
pub use api::{
    AssetBalance, ExchangeError, ExchangeGateway, Market, Order, OrderParams, OrderType,
    PhemexClient, Position, PositionSide, Side,
};
pub use config::Config;
pub use risk::{
    cancel_orphan_orders, cleanup_stale_state, count_sig_digits, liquidation_target_price,
    round_to_sig_figs, CycleOrchestrator, CycleReport, FileStateStore, ReentryEngine,
    ReentryOutcome, StateStore, StoreError, TrailingOutcome, TrailingState, TrailingStopEngine,
};
pub use utils::{rate_limiter, retry};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] api::ExchangeError),
    #[error("State store error: {0}")]
    Store(#[from] risk::StoreError),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid precision value: {0}")]
    InvalidPrecision(f64),
}

/// Daemon version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
