//! Trailing-stop ratchet engine
//!
//! Per (symbol, side) state machine driven once per cycle from a position
//! snapshot. Three transitions: flatten (position effectively closed, drop
//! the stop and the state), tighten (profit crossed the threshold, replace
//! the stop closer to the mark), hold.

use tracing::{debug, error, info, warn};

use crate::api::{
    ExchangeError, ExchangeGateway, Order, OrderParams, OrderType, Position, PositionSide,
};
use crate::risk::cancel_order_any_mode;
use crate::risk::store::{StateStore, TrailingState};
use crate::GuardError;

/// What one evaluation did, for logging and cycle accounting.
#[derive(Debug, Clone, PartialEq)]
pub enum TrailingOutcome {
    /// Missing/invalid position data; nothing to do.
    Skipped,
    /// Net PnL at or below the epsilon: stop cancelled, state deleted.
    Flattened,
    /// Profit below the current threshold; no change.
    Hold,
    /// Stop replaced and the ratchet widened.
    Tightened { order_id: String, stop_price: f64 },
    /// Computed stop was not strictly favorable to entry; aborted.
    Rejected { stop_price: f64 },
    /// Stop creation failed in both hedge and one-way mode; state untouched.
    Abandoned,
}

pub struct TrailingStopEngine {
    /// Added to both `threshold` and `profit_target_distance` after every
    /// successful tightening, so repeated triggers need larger moves.
    breath_step: f64,
    /// Net PnL at or below this is treated as a flat position.
    flat_pnl_epsilon: f64,
}

impl TrailingStopEngine {
    pub fn new(breath_step: f64, flat_pnl_epsilon: f64) -> Self {
        Self {
            breath_step,
            flat_pnl_epsilon,
        }
    }

    /// Run one evaluation for one position snapshot.
    pub async fn evaluate(
        &self,
        gateway: &dyn ExchangeGateway,
        store: &dyn StateStore,
        position: &Position,
    ) -> Result<TrailingOutcome, GuardError> {
        let symbol = &position.symbol;
        let entry = position.entry_price;
        let mark = position.mark_price;

        let Some(side) = position.side else {
            return Ok(TrailingOutcome::Skipped);
        };
        if entry == 0.0 || mark == 0.0 || position.contracts <= 0.0 {
            return Ok(TrailingOutcome::Skipped);
        }

        let mut state = store.load(symbol, side)?.unwrap_or_default();

        let change = match side {
            PositionSide::Long => (mark - entry) / entry,
            PositionSide::Short => (entry - mark) / entry,
        };
        let profit_distance = change * position.leverage;

        let unrealized = match side {
            PositionSide::Long => (mark - entry) * position.contracts,
            PositionSide::Short => (entry - mark) * position.contracts,
        };
        let net_pnl = unrealized + position.realized_pnl;

        debug!(
            "{symbol} {side}: unrealized={unrealized:.6} realized={:.6} net={net_pnl:.6} \
             profit_distance={profit_distance:.4} threshold={:.2}",
            position.realized_pnl, state.threshold
        );

        // Flatten: the position is effectively closed.
        if net_pnl <= self.flat_pnl_epsilon {
            if let Some(order_id) = state.order_id.as_deref() {
                match cancel_order_any_mode(gateway, order_id, symbol, side.order_side()).await {
                    Ok(()) => info!("❌ Canceled previous stop-loss {order_id} for {symbol}"),
                    Err(e) => warn!("⚠️ Failed to cancel stop-loss {order_id}: {e}"),
                }
            }
            if store.delete(symbol, side)? {
                info!("🗑️ Deleted trailing state for {symbol} ({side})");
            }
            return Ok(TrailingOutcome::Flattened);
        }

        if profit_distance < state.threshold {
            return Ok(TrailingOutcome::Hold);
        }

        info!(
            "📈 {side} position on {symbol} is up {:.2}%",
            change * 100.0
        );

        let new_stop_price = match side {
            PositionSide::Long => entry * (1.0 + state.profit_target_distance / position.leverage),
            PositionSide::Short => entry * (1.0 - state.profit_target_distance / position.leverage),
        };

        // Inverted-ratchet guard: the stop must be strictly favorable to entry.
        let inverted = match side {
            PositionSide::Long => new_stop_price <= entry,
            PositionSide::Short => new_stop_price >= entry,
        };
        if inverted {
            warn!(
                "New stop loss @ {new_stop_price} is not valid relative to entry price @ {entry} \
                 for {symbol}"
            );
            return Ok(TrailingOutcome::Rejected {
                stop_price: new_stop_price,
            });
        }

        info!(
            "🔄 Moving stop-loss on {symbol} to {:.2}%, at price {new_stop_price:.4}",
            state.profit_target_distance * 100.0
        );

        if let Some(order_id) = state.order_id.as_deref() {
            match cancel_order_any_mode(gateway, order_id, symbol, side.order_side()).await {
                Ok(()) => info!("❌ Canceled previous stop-loss {order_id} for {symbol}"),
                Err(e) => warn!("⚠️ Failed to cancel stop-loss {order_id}: {e}"),
            }
        }

        let order = match place_protective_stop(
            gateway,
            symbol,
            side,
            position.contracts,
            new_stop_price,
        )
        .await
        {
            Ok(order) => order,
            Err(e) => {
                error!("❌ Failed to place stop-loss for {symbol}: {e}");
                return Ok(TrailingOutcome::Abandoned);
            }
        };

        state.order_id = Some(order.id.clone());
        state.profit_target_distance += self.breath_step;
        state.threshold += self.breath_step;
        store.save(symbol, side, &state)?;

        Ok(TrailingOutcome::Tightened {
            order_id: order.id,
            stop_price: new_stop_price,
        })
    }
}

/// Place a reduce-only stop sized to the full position, hedge-mode params
/// first with a one-way fallback.
async fn place_protective_stop(
    gateway: &dyn ExchangeGateway,
    symbol: &str,
    side: PositionSide,
    contracts: f64,
    stop_price: f64,
) -> Result<Order, ExchangeError> {
    let closing = side.closing_side();

    match gateway
        .create_order(
            symbol,
            OrderType::Stop,
            closing,
            contracts,
            None,
            OrderParams::protective_stop(stop_price, side),
        )
        .await
    {
        Ok(order) => {
            info!("✅ Placed new stop-loss at {stop_price:.4} for {symbol}");
            Ok(order)
        }
        Err(e) => {
            warn!("⚠️ Hedge mode failed: {e}, retrying in one-way mode");
            let order = gateway
                .create_order(
                    symbol,
                    OrderType::Stop,
                    closing,
                    contracts,
                    None,
                    OrderParams::protective_stop_one_way(stop_price, side),
                )
                .await?;
            info!("✅ Placed stop-loss in one-way mode at {stop_price:.4} for {symbol}");
            Ok(order)
        }
    }
}
