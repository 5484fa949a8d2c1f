//! Orphan reconciliation
//!
//! Two sweeps run at the end of every cycle: cancel resting limit orders on
//! symbols with no open position, and delete persisted trailing records whose
//! (symbol, side) is no longer open. Stop orders are left alone; they belong
//! to the trailing engine.

use std::collections::HashSet;

use tracing::{error, info, warn};

use crate::api::{ExchangeGateway, OrderType, Position, Side};
use crate::risk::cancel_order_any_mode;
use crate::risk::store::{key_to_symbol, safe_key, StateStore};
use crate::GuardError;

/// Cancel open orders of the given type with no backing position: every such
/// order on a symbol with nothing open, and any whose side does not pair with
/// the open position (buy with long, sell with short). The cycle passes
/// `OrderType::Limit` here so protective stops are never touched.
///
/// Returns the number of orders cancelled. Per-order failures are logged and
/// skipped so one bad cancel never blocks the rest of the sweep.
pub async fn cancel_orphan_orders(
    gateway: &dyn ExchangeGateway,
    symbols: &[String],
    positions: &[Position],
    order_type: OrderType,
) -> Result<usize, GuardError> {
    let backed: HashSet<(&str, Side)> = positions
        .iter()
        .filter(|p| p.contracts > 0.0)
        .filter_map(|p| p.side.map(|side| (p.symbol.as_str(), side.order_side())))
        .collect();

    let mut cancelled = 0;
    for symbol in symbols {
        let orders = match gateway.fetch_open_orders(symbol).await {
            Ok(orders) => orders,
            Err(e) => {
                error!("❌ Failed to list open orders for {symbol}: {e}");
                continue;
            }
        };
        for order in orders.iter().filter(|o| o.order_type == order_type) {
            if backed.contains(&(symbol.as_str(), order.side)) {
                continue;
            }
            match cancel_order_any_mode(gateway, &order.id, symbol, order.side).await {
                Ok(()) => {
                    info!("🗑️ Cancelled orphan order {} on {symbol}", order.id);
                    cancelled += 1;
                }
                Err(e) => {
                    warn!("⚠️ Failed to cancel orphan order {} on {symbol}: {e}", order.id);
                }
            }
        }
    }
    Ok(cancelled)
}

/// Delete persisted trailing records whose (symbol, side) no longer matches an
/// open position. Returns the symbols whose records were removed so the caller
/// can re-run the cancel sweep over just those.
pub fn cleanup_stale_state(
    store: &dyn StateStore,
    positions: &[Position],
) -> Result<Vec<String>, GuardError> {
    let live: HashSet<(Side, String)> = positions
        .iter()
        .filter(|p| p.contracts > 0.0)
        .filter_map(|p| {
            p.side
                .map(|side| (side.order_side(), safe_key(&p.symbol)))
        })
        .collect();

    let mut removed = Vec::new();
    for (side, key) in store.list_all()? {
        if live.contains(&(side, key.clone())) {
            continue;
        }
        let symbol = key_to_symbol(&key).unwrap_or_else(|| key.clone());
        match store.remove_entry(side, &key) {
            Ok(true) => {
                info!("🧹 Removed stale trailing state for {symbol} ({side})");
                if !removed.contains(&symbol) {
                    removed.push(symbol);
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!("⚠️ Failed to remove stale state for {symbol} ({side}): {e}");
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ExchangeError, MockExchangeGateway, Order, PositionSide};
    use crate::risk::store::{FileStateStore, TrailingState};
    use tempfile::tempdir;

    fn position(symbol: &str, side: PositionSide, contracts: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            side: Some(side),
            entry_price: 100.0,
            mark_price: 100.0,
            liquidation_price: 90.0,
            contracts,
            leverage: 10.0,
            notional: 100.0 * contracts,
            realized_pnl: 0.0,
        }
    }

    fn limit_order(id: &str, side: Side) -> Order {
        Order {
            id: id.to_string(),
            order_type: OrderType::Limit,
            side,
            price: 84.0,
            amount: 1.0,
        }
    }

    fn stop_order(id: &str) -> Order {
        Order {
            id: id.to_string(),
            order_type: OrderType::Stop,
            side: Side::Sell,
            price: 0.0,
            amount: 1.0,
        }
    }

    #[tokio::test]
    async fn test_cancels_limit_orders_without_position() {
        let mut gateway = MockExchangeGateway::new();
        gateway
            .expect_fetch_open_orders()
            .withf(|symbol| symbol == "BTC/USDT:USDT")
            .times(1)
            .returning(|_| Ok(vec![]));
        gateway
            .expect_fetch_open_orders()
            .withf(|symbol| symbol == "ETH/USDT:USDT")
            .times(1)
            .returning(|_| Ok(vec![limit_order("orphan-1", Side::Buy), stop_order("stop-1")]));
        gateway
            .expect_cancel_order()
            .withf(|order_id, symbol, _| order_id == "orphan-1" && symbol == "ETH/USDT:USDT")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let symbols = vec!["BTC/USDT:USDT".to_string(), "ETH/USDT:USDT".to_string()];
        let positions = vec![position("BTC/USDT:USDT", PositionSide::Long, 2.0)];

        let cancelled = cancel_orphan_orders(&gateway, &symbols, &positions, OrderType::Limit)
            .await
            .unwrap();
        assert_eq!(cancelled, 1);
    }

    #[tokio::test]
    async fn test_matching_side_orders_are_left_alone() {
        let mut gateway = MockExchangeGateway::new();
        gateway
            .expect_fetch_open_orders()
            .times(1)
            .returning(|_| Ok(vec![limit_order("keep", Side::Sell)]));
        gateway.expect_cancel_order().times(0);

        let symbols = vec!["BTC/USDT:USDT".to_string()];
        let positions = vec![position("BTC/USDT:USDT", PositionSide::Short, 1.0)];

        let cancelled = cancel_orphan_orders(&gateway, &symbols, &positions, OrderType::Limit)
            .await
            .unwrap();
        assert_eq!(cancelled, 0);
    }

    #[tokio::test]
    async fn test_mismatched_side_orders_are_cancelled() {
        let mut gateway = MockExchangeGateway::new();
        gateway
            .expect_fetch_open_orders()
            .times(1)
            .returning(|_| {
                Ok(vec![
                    limit_order("keep", Side::Sell),
                    limit_order("wrong-side", Side::Buy),
                ])
            });
        gateway
            .expect_cancel_order()
            .withf(|order_id, _, _| order_id == "wrong-side")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let symbols = vec!["BTC/USDT:USDT".to_string()];
        let positions = vec![position("BTC/USDT:USDT", PositionSide::Short, 1.0)];

        let cancelled = cancel_orphan_orders(&gateway, &symbols, &positions, OrderType::Limit)
            .await
            .unwrap();
        assert_eq!(cancelled, 1);
    }

    #[tokio::test]
    async fn test_zero_contract_position_counts_as_closed() {
        let mut gateway = MockExchangeGateway::new();
        gateway
            .expect_fetch_open_orders()
            .times(1)
            .returning(|_| Ok(vec![limit_order("orphan-2", Side::Sell)]));
        gateway
            .expect_cancel_order()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let symbols = vec!["BTC/USDT:USDT".to_string()];
        let positions = vec![position("BTC/USDT:USDT", PositionSide::Long, 0.0)];

        let cancelled = cancel_orphan_orders(&gateway, &symbols, &positions, OrderType::Limit)
            .await
            .unwrap();
        assert_eq!(cancelled, 1);
    }

    #[tokio::test]
    async fn test_cancel_failure_does_not_stop_the_sweep() {
        let mut gateway = MockExchangeGateway::new();
        gateway
            .expect_fetch_open_orders()
            .times(1)
            .returning(|_| {
                Ok(vec![
                    limit_order("bad", Side::Buy),
                    limit_order("good", Side::Buy),
                ])
            });
        gateway
            .expect_cancel_order()
            .withf(|order_id, _, _| order_id == "bad")
            .times(1)
            .returning(|_, _, _| {
                Err(ExchangeError::Api {
                    code: 500,
                    message: "gone".to_string(),
                })
            });
        gateway
            .expect_cancel_order()
            .withf(|order_id, _, _| order_id == "good")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let symbols = vec!["BTC/USDT:USDT".to_string()];
        let cancelled = cancel_orphan_orders(&gateway, &symbols, &[], OrderType::Limit)
            .await
            .unwrap();
        assert_eq!(cancelled, 1);
    }

    #[test]
    fn test_cleanup_removes_records_without_position() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).unwrap();

        store
            .save("BTC/USDT:USDT", PositionSide::Long, &TrailingState::default())
            .unwrap();
        store
            .save("ETH/USDT:USDT", PositionSide::Short, &TrailingState::default())
            .unwrap();

        let positions = vec![position("BTC/USDT:USDT", PositionSide::Long, 2.0)];
        let removed = cleanup_stale_state(&store, &positions).unwrap();
        assert_eq!(removed, vec!["ETH/USDT:USDT".to_string()]);

        assert!(store.load("BTC/USDT:USDT", PositionSide::Long).unwrap().is_some());
        assert!(store.load("ETH/USDT:USDT", PositionSide::Short).unwrap().is_none());
    }

    #[test]
    fn test_cleanup_is_side_aware() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).unwrap();

        // Record in the short namespace, position open on the long side.
        store
            .save("BTC/USDT:USDT", PositionSide::Short, &TrailingState::default())
            .unwrap();

        let positions = vec![position("BTC/USDT:USDT", PositionSide::Long, 2.0)];
        let removed = cleanup_stale_state(&store, &positions).unwrap();
        assert_eq!(removed, vec!["BTC/USDT:USDT".to_string()]);
        assert!(store.load("BTC/USDT:USDT", PositionSide::Short).unwrap().is_none());
    }

    #[test]
    fn test_cleanup_with_no_records_is_a_no_op() {
        let dir = tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).unwrap();
        let removed = cleanup_stale_state(&store, &[]).unwrap();
        assert!(removed.is_empty());
    }
}
