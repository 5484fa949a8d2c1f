//! Exchange types and the gateway capability interface
//! Phemex REST adapter lives in `phemex`; the risk engines only see the trait

pub mod phemex;

pub use phemex::PhemexClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Quote-settlement marker carried by unified perpetual symbols
/// (e.g. "BTC/USDT:USDT"). Spot symbols do not carry it.
pub const PERP_SETTLE_MARKER: &str = ":USDT";

/// Whether a unified symbol denotes a USDT-settled perpetual.
pub fn is_perpetual(symbol: &str) -> bool {
    symbol.contains(PERP_SETTLE_MARKER)
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Name Phemex expects on the wire.
    pub fn exchange_name(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that adds to this position (buy for long, sell for short).
    pub fn order_side(self) -> Side {
        match self {
            PositionSide::Long => Side::Buy,
            PositionSide::Short => Side::Sell,
        }
    }

    /// Order side that closes this position.
    pub fn closing_side(self) -> Side {
        match self {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        }
    }

    /// Position an order on this side pairs with in hedge mode.
    pub fn from_order_side(side: Side) -> Self {
        match side {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        }
    }

    /// `posSide` value Phemex expects on the wire.
    pub fn pos_side_param(self) -> &'static str {
        match self {
            PositionSide::Long => "Long",
            PositionSide::Short => "Short",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => f.write_str("long"),
            PositionSide::Short => f.write_str("short"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Stop,
}

/// Open order as reported by the exchange
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub order_type: OrderType,
    pub side: Side,
    pub price: f64,
    pub amount: f64,
}

/// Position snapshot, borrowed per cycle and never persisted raw.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub side: Option<PositionSide>,
    pub entry_price: f64,
    pub mark_price: f64,
    pub liquidation_price: f64,
    pub contracts: f64,
    pub leverage: f64,
    pub notional: f64,
    /// Realized PnL for the current term, as reported by the venue.
    pub realized_pnl: f64,
}

/// Market precision metadata: tick and step sizes as fractional decimals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Market {
    pub price_precision: f64,
    pub amount_precision: f64,
}

/// Per-asset balance
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AssetBalance {
    pub free: f64,
    pub total: f64,
}

/// Extra parameters attached to create/cancel calls.
///
/// The hedge-mode fields (`pos_side`, `trigger_direction`) are only sent when
/// set; the one-way fallback simply omits them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderParams {
    pub reduce_only: bool,
    pub pos_side: Option<PositionSide>,
    pub stop_px: Option<f64>,
    pub trigger_direction: Option<u8>,
    pub close_on_trigger: bool,
    pub time_in_force: Option<&'static str>,
}

impl OrderParams {
    /// Params for a re-entry limit order (never reduce-only).
    pub fn reentry() -> Self {
        Self {
            reduce_only: false,
            ..Default::default()
        }
    }

    /// Hedge-mode protective stop: reduce-only, close-on-trigger, triggered
    /// by last price moving against the position.
    pub fn protective_stop(stop_px: f64, side: PositionSide) -> Self {
        Self {
            reduce_only: true,
            pos_side: Some(side),
            stop_px: Some(stop_px),
            trigger_direction: Some(match side {
                PositionSide::Long => 1,
                PositionSide::Short => 2,
            }),
            close_on_trigger: true,
            time_in_force: Some("GoodTillCancel"),
        }
    }

    /// One-way-mode protective stop: same trigger set without the
    /// position-side fields.
    pub fn protective_stop_one_way(stop_px: f64, side: PositionSide) -> Self {
        Self {
            pos_side: None,
            ..Self::protective_stop(stop_px, side)
        }
    }

    pub fn with_pos_side(mut self, side: PositionSide) -> Self {
        self.pos_side = Some(side);
        self
    }
}

/// Exchange error taxonomy. The adapter classifies raw venue errors into
/// these variants; the risk engines never look at error text.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Venue reports inconsistent hedge/one-way mode; recoverable by
    /// retrying the same operation once with an explicit `posSide`.
    #[error("inconsistent position mode")]
    PositionMode,
    /// Symbol-specific venue restriction; non-retryable.
    #[error("pilot contract not allowed: {0}")]
    PilotContract(String),
    #[error("exchange error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Capability interface over the exchange. The core consumes this trait;
/// `PhemexClient` is the production implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Precision metadata for every tradable symbol, keyed by unified symbol.
    async fn load_markets(&self) -> Result<HashMap<String, Market>, ExchangeError>;

    /// Position snapshots for the given symbols.
    async fn fetch_positions(&self, symbols: &[String]) -> Result<Vec<Position>, ExchangeError>;

    /// Account balances per asset for the given margin account type.
    async fn fetch_balance(
        &self,
        margin_type: &str,
    ) -> Result<HashMap<String, AssetBalance>, ExchangeError>;

    /// Open orders for one symbol.
    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError>;

    /// Cancel one order, optionally with hedge-mode params.
    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: &str,
        params: Option<OrderParams>,
    ) -> Result<(), ExchangeError>;

    /// Create an order. `price` is `None` for trigger-only stop orders.
    async fn create_order(
        &self,
        symbol: &str,
        order_type: OrderType,
        side: Side,
        amount: f64,
        price: Option<f64>,
        params: OrderParams,
    ) -> Result<Order, ExchangeError>;
}
