//! Position risk engines
//! Trailing-stop ratchet, liquidation re-entry, orphan reconciliation and the
//! cycle orchestrator that drives them

pub mod cycle;
pub mod orphans;
pub mod precision;
pub mod reentry;
pub mod store;
pub mod trailing;

pub use cycle::{CycleOrchestrator, CycleReport};
pub use orphans::{cancel_orphan_orders, cleanup_stale_state};
pub use precision::{count_sig_digits, liquidation_target_price, round_to_sig_figs};
pub use store::{FileStateStore, StateStore, StoreError, TrailingState};
pub use trailing::{TrailingOutcome, TrailingStopEngine};
pub use reentry::{ReentryEngine, ReentryOutcome};

use tracing::info;

use crate::api::{ExchangeError, ExchangeGateway, OrderParams, PositionSide, Side};

/// Cancel an order, falling back once to an explicit `posSide` when the
/// venue reports an inconsistent position mode.
pub(crate) async fn cancel_order_any_mode(
    gateway: &dyn ExchangeGateway,
    order_id: &str,
    symbol: &str,
    order_side: Side,
) -> Result<(), ExchangeError> {
    match gateway.cancel_order(order_id, symbol, None).await {
        Ok(()) => Ok(()),
        Err(ExchangeError::PositionMode) => {
            let pos_side = PositionSide::from_order_side(order_side);
            info!(
                "🔁 Retrying cancel of {} with posSide={}",
                order_id,
                pos_side.pos_side_param()
            );
            gateway
                .cancel_order(
                    order_id,
                    symbol,
                    Some(OrderParams::default().with_pos_side(pos_side)),
                )
                .await
        }
        Err(e) => Err(e),
    }
}
