//! Liquidation-proximity re-entry engine
//!
//! Runs after the trailing engine on every open perpetual position. Places a
//! same-direction limit order between liquidation and entry unless one is
//! already resting. The 80% closeness threshold is informational only and
//! never gates placement.

use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::api::{
    is_perpetual, ExchangeError, ExchangeGateway, Market, OrderParams, OrderType, Position, PositionSide,
};
use crate::risk::precision::{count_sig_digits, liquidation_target_price, round_to_sig_figs};
use crate::GuardError;

/// What one evaluation did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReentryOutcome {
    /// Spot symbol; re-entry only applies to perpetuals.
    SkippedSpot,
    /// A required price field (or precision metadata) was missing.
    SkippedMissingData,
    /// A same-side limit order is already resting.
    AlreadyCovered,
    /// Venue refuses this contract for limit entries; non-retryable.
    SkippedPilotContract,
    Placed {
        order_id: String,
        price: f64,
        amount: f64,
    },
    /// Placement failed; nothing resting, retried next cycle.
    Failed,
}

pub struct ReentryEngine {
    /// Fraction of the liquidation-to-entry distance at which the re-entry
    /// limit price sits.
    liquidation_fraction: f64,
    /// Closeness level that triggers the high-risk warning.
    closeness_warn: f64,
}

impl ReentryEngine {
    pub fn new(liquidation_fraction: f64, closeness_warn: f64) -> Self {
        Self {
            liquidation_fraction,
            closeness_warn,
        }
    }

    /// Evaluate one open position against its market metadata.
    pub async fn evaluate(
        &self,
        gateway: &dyn ExchangeGateway,
        markets: &HashMap<String, Market>,
        position: &Position,
    ) -> Result<ReentryOutcome, GuardError> {
        let symbol = &position.symbol;

        if !is_perpetual(symbol) {
            debug!("Skipping re-entry order for non-futures symbol: {symbol}");
            return Ok(ReentryOutcome::SkippedSpot);
        }

        let entry = position.entry_price;
        let mark = position.mark_price;
        let liquidation = position.liquidation_price;
        if entry == 0.0 || mark == 0.0 || liquidation == 0.0 {
            return Ok(ReentryOutcome::SkippedMissingData);
        }
        if (entry - liquidation).abs() == 0.0 {
            return Ok(ReentryOutcome::SkippedMissingData);
        }
        let Some(side) = position.side else {
            return Ok(ReentryOutcome::SkippedMissingData);
        };
        let Some(market) = markets.get(symbol) else {
            warn!("No market metadata for {symbol}, skipping re-entry");
            return Ok(ReentryOutcome::SkippedMissingData);
        };

        let price_digits = count_sig_digits(market.price_precision)?;
        let amount_digits = count_sig_digits(market.amount_precision)?;

        let closeness = 1.0 - (mark - liquidation).abs() / (entry - liquidation).abs();
        info!(
            "--- {symbol} --- side={side} entry={entry} mark={mark} liquidation={liquidation} \
             closeness={:.2}%",
            closeness * 100.0
        );

        let open_orders = gateway.fetch_open_orders(symbol).await?;
        let order_side = side.order_side();
        let has_same_side_limit = open_orders
            .iter()
            .any(|o| o.order_type == OrderType::Limit && o.side == order_side);
        if has_same_side_limit {
            debug!("Same-side limit order already exists for {symbol}. Doing nothing.");
            return Ok(ReentryOutcome::AlreadyCovered);
        }

        let amount = round_to_sig_figs(2.0 * position.notional / mark, amount_digits);
        let price = liquidation_target_price(entry, liquidation, self.liquidation_fraction, price_digits);
        info!("Re-entry target for {symbol}: price {price} amount {amount}");

        let outcome = place_reentry_order(gateway, symbol, side, amount, price).await;

        if closeness >= self.closeness_warn {
            warn!(
                "⚠️ {symbol} mark price is {:.0}% of the way to liquidation!",
                closeness * 100.0
            );
        } else {
            debug!("{symbol} not close to liquidation ({:.2}%)", closeness * 100.0);
        }

        outcome
    }
}

/// Place the limit order, retrying once with `posSide` on a position-mode
/// error. A pilot-contract refusal is a per-symbol skip, never retried.
async fn place_reentry_order(
    gateway: &dyn ExchangeGateway,
    symbol: &str,
    side: PositionSide,
    amount: f64,
    price: f64,
) -> Result<ReentryOutcome, GuardError> {
    let order_side = side.order_side();

    match gateway
        .create_order(
            symbol,
            OrderType::Limit,
            order_side,
            amount,
            Some(price),
            OrderParams::reentry(),
        )
        .await
    {
        Ok(order) => {
            info!("✅ Re-entry order placed: {order_side} {amount} @ {price}");
            Ok(ReentryOutcome::Placed {
                order_id: order.id,
                price,
                amount,
            })
        }
        Err(ExchangeError::PilotContract(msg)) => {
            warn!("❌ Pilot contract is not allowed for {symbol}: {msg}. Skipping order.");
            Ok(ReentryOutcome::SkippedPilotContract)
        }
        Err(ExchangeError::PositionMode) => {
            info!("🔁 Retrying re-entry with posSide due to inconsistent position mode...");
            match gateway
                .create_order(
                    symbol,
                    OrderType::Limit,
                    order_side,
                    amount,
                    Some(price),
                    OrderParams::reentry().with_pos_side(side),
                )
                .await
            {
                Ok(order) => {
                    info!("✅ Re-entry order (with posSide) placed: {order_side} {amount} @ {price}");
                    Ok(ReentryOutcome::Placed {
                        order_id: order.id,
                        price,
                        amount,
                    })
                }
                Err(e2) => {
                    error!("❌ Re-entry order failed even with posSide: {e2}");
                    Ok(ReentryOutcome::Failed)
                }
            }
        }
        Err(e) => {
            error!("❌ Error placing re-entry order for {symbol}: {e}");
            Ok(ReentryOutcome::Failed)
        }
    }
}
