//! Integration tests for Phemex Guard
//!
//! Full-cycle scenarios against a recording in-memory gateway: created orders
//! land in the fake's open-order book, so a second cycle sees the effects of
//! the first.

use async_trait::async_trait;
use phemex_guard::risk::{CycleOrchestrator, ReentryEngine, TrailingStopEngine};
use phemex_guard::{
    AssetBalance, ExchangeError, ExchangeGateway, FileStateStore, Market, Order, OrderParams,
    OrderType, Position, PositionSide, Side, StateStore, TrailingState,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

struct FakeGateway {
    markets: HashMap<String, Market>,
    balances: HashMap<String, AssetBalance>,
    positions: Mutex<Vec<Position>>,
    open_orders: Mutex<HashMap<String, Vec<Order>>>,
    next_id: AtomicU64,
    creates: Mutex<Vec<(String, Order)>>,
    cancels: Mutex<Vec<String>>,
}

impl FakeGateway {
    fn new(positions: Vec<Position>) -> Self {
        let mut markets = HashMap::new();
        for symbol in ["BTC/USDT:USDT", "ETH/USDT:USDT"] {
            markets.insert(
                symbol.to_string(),
                Market {
                    price_precision: 0.0001,
                    amount_precision: 0.01,
                },
            );
        }
        let mut balances = HashMap::new();
        balances.insert(
            "USDT".to_string(),
            AssetBalance {
                free: 5000.0,
                total: 6000.0,
            },
        );
        Self {
            markets,
            balances,
            positions: Mutex::new(positions),
            open_orders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            creates: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
        }
    }

    fn seed_order(&self, symbol: &str, order: Order) {
        self.open_orders
            .lock()
            .unwrap()
            .entry(symbol.to_string())
            .or_default()
            .push(order);
    }

    fn created(&self) -> Vec<(String, Order)> {
        self.creates.lock().unwrap().clone()
    }

    fn cancelled(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeGateway for FakeGateway {
    async fn load_markets(&self) -> Result<HashMap<String, Market>, ExchangeError> {
        Ok(self.markets.clone())
    }

    async fn fetch_positions(&self, symbols: &[String]) -> Result<Vec<Position>, ExchangeError> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .filter(|p| symbols.is_empty() || symbols.contains(&p.symbol))
            .cloned()
            .collect())
    }

    async fn fetch_balance(
        &self,
        _margin_type: &str,
    ) -> Result<HashMap<String, AssetBalance>, ExchangeError> {
        Ok(self.balances.clone())
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError> {
        Ok(self
            .open_orders
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: &str,
        _params: Option<OrderParams>,
    ) -> Result<(), ExchangeError> {
        self.cancels.lock().unwrap().push(order_id.to_string());
        if let Some(orders) = self.open_orders.lock().unwrap().get_mut(symbol) {
            orders.retain(|o| o.id != order_id);
        }
        Ok(())
    }

    async fn create_order(
        &self,
        symbol: &str,
        order_type: OrderType,
        side: Side,
        amount: f64,
        price: Option<f64>,
        params: OrderParams,
    ) -> Result<Order, ExchangeError> {
        let id = format!("order-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let order = Order {
            id,
            order_type,
            side,
            price: price.or(params.stop_px).unwrap_or(0.0),
            amount,
        };
        self.creates
            .lock()
            .unwrap()
            .push((symbol.to_string(), order.clone()));
        self.seed_order(symbol, order.clone());
        Ok(order)
    }
}

fn long_position(symbol: &str, entry: f64, mark: f64, contracts: f64, leverage: f64) -> Position {
    Position {
        symbol: symbol.to_string(),
        side: Some(PositionSide::Long),
        entry_price: entry,
        mark_price: mark,
        liquidation_price: entry * 0.8,
        contracts,
        leverage,
        notional: mark * contracts,
        realized_pnl: 0.0,
    }
}

async fn orchestrator(
    gateway: Arc<FakeGateway>,
    store: Arc<FileStateStore>,
    symbols: Vec<&str>,
) -> CycleOrchestrator {
    CycleOrchestrator::new(
        gateway,
        store,
        TrailingStopEngine::new(0.10, 0.001),
        ReentryEngine::new(0.20, 0.80),
        symbols.into_iter().map(String::from).collect(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_profitable_position_full_cycle() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStateStore::new(dir.path()).unwrap());
    let gateway = Arc::new(FakeGateway::new(vec![long_position(
        "BTC/USDT:USDT",
        100.0,
        101.1,
        2.0,
        10.0,
    )]));

    let orch = orchestrator(gateway.clone(), store.clone(), vec!["BTC/USDT:USDT"]).await;
    let report = orch.run_cycle().await.unwrap();

    assert_eq!(report.open_positions, 1);
    assert_eq!(report.tightened, 1);
    assert_eq!(report.reentries_placed, 1);
    assert_eq!(report.orphans_cancelled, 0);

    let created = gateway.created();
    assert_eq!(created.len(), 2);

    // Protective stop: closing side, reduce-only, at entry * (1 + 0.06/10).
    let stop = &created[0].1;
    assert_eq!(stop.order_type, OrderType::Stop);
    assert_eq!(stop.side, Side::Sell);
    assert!((stop.price - 100.6).abs() < 1e-9);

    // Re-entry: same direction, 20% of the way from liquidation to entry,
    // twice the notional in contracts.
    let reentry = &created[1].1;
    assert_eq!(reentry.order_type, OrderType::Limit);
    assert_eq!(reentry.side, Side::Buy);
    assert!((reentry.price - 84.0).abs() < 1e-9);
    assert!((reentry.amount - 4.0).abs() < 1e-9);

    // Ratchet persisted only after the successful create.
    let state = store
        .load("BTC/USDT:USDT", PositionSide::Long)
        .unwrap()
        .unwrap();
    assert!((state.threshold - 0.20).abs() < 1e-12);
    assert!((state.profit_target_distance - 0.16).abs() < 1e-12);
    assert_eq!(state.order_id.as_deref(), Some(stop.id.as_str()));
}

#[tokio::test]
async fn test_second_cycle_with_unchanged_snapshot_is_a_no_op() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStateStore::new(dir.path()).unwrap());
    let gateway = Arc::new(FakeGateway::new(vec![long_position(
        "BTC/USDT:USDT",
        100.0,
        101.1,
        2.0,
        10.0,
    )]));

    let orch = orchestrator(gateway.clone(), store.clone(), vec!["BTC/USDT:USDT"]).await;
    orch.run_cycle().await.unwrap();
    let mutations_after_first = gateway.created().len() + gateway.cancelled().len();

    // Same snapshot again: the ratcheted threshold holds the stop, the resting
    // limit covers the re-entry, and nothing is orphaned.
    let report = orch.run_cycle().await.unwrap();
    assert_eq!(report.tightened, 0);
    assert_eq!(report.reentries_placed, 0);
    assert_eq!(report.orphans_cancelled, 0);
    assert_eq!(
        gateway.created().len() + gateway.cancelled().len(),
        mutations_after_first
    );
}

#[tokio::test]
async fn test_flat_position_clears_trailing_state() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStateStore::new(dir.path()).unwrap());

    let mut state = TrailingState::default();
    state.order_id = Some("stop-old".to_string());
    store
        .save("BTC/USDT:USDT", PositionSide::Long, &state)
        .unwrap();

    let gateway = Arc::new(FakeGateway::new(vec![long_position(
        "BTC/USDT:USDT",
        100.0,
        100.0005,
        1.0,
        10.0,
    )]));
    gateway.seed_order(
        "BTC/USDT:USDT",
        Order {
            id: "stop-old".to_string(),
            order_type: OrderType::Stop,
            side: Side::Sell,
            price: 100.6,
            amount: 1.0,
        },
    );

    let orch = orchestrator(gateway.clone(), store.clone(), vec!["BTC/USDT:USDT"]).await;
    let report = orch.run_cycle().await.unwrap();

    assert_eq!(report.flattened, 1);
    assert!(gateway.cancelled().contains(&"stop-old".to_string()));
    assert!(store
        .load("BTC/USDT:USDT", PositionSide::Long)
        .unwrap()
        .is_none());

    // The position is still open, so a re-entry limit is placed for it.
    let created = gateway.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].1.order_type, OrderType::Limit);
}

#[tokio::test]
async fn test_stale_state_sweep_cancels_leftover_orders() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStateStore::new(dir.path()).unwrap());

    // A record for a symbol that is no longer open and sits outside the
    // monitored universe; only the restricted sweep can reach its order.
    store
        .save("ETH/USDT:USDT", PositionSide::Long, &TrailingState::default())
        .unwrap();

    let gateway = Arc::new(FakeGateway::new(vec![]));
    gateway.seed_order(
        "ETH/USDT:USDT",
        Order {
            id: "leftover".to_string(),
            order_type: OrderType::Limit,
            side: Side::Buy,
            price: 1500.0,
            amount: 0.5,
        },
    );

    let orch = orchestrator(gateway.clone(), store.clone(), vec!["BTC/USDT:USDT"]).await;
    let report = orch.run_cycle().await.unwrap();

    assert_eq!(report.open_positions, 0);
    assert_eq!(report.stale_removed, 1);
    assert_eq!(report.orphans_cancelled, 1);
    assert!(gateway.cancelled().contains(&"leftover".to_string()));
    assert!(store.list_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_short_position_mirrors_long_behavior() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStateStore::new(dir.path()).unwrap());

    let position = Position {
        symbol: "BTC/USDT:USDT".to_string(),
        side: Some(PositionSide::Short),
        entry_price: 100.0,
        mark_price: 98.9,
        liquidation_price: 120.0,
        contracts: 2.0,
        leverage: 10.0,
        notional: 197.8,
        realized_pnl: 0.0,
    };
    let gateway = Arc::new(FakeGateway::new(vec![position]));

    let orch = orchestrator(gateway.clone(), store.clone(), vec!["BTC/USDT:USDT"]).await;
    let report = orch.run_cycle().await.unwrap();

    assert_eq!(report.tightened, 1);
    assert_eq!(report.reentries_placed, 1);

    let created = gateway.created();
    // Stop buys back the short below entry; re-entry sells toward liquidation.
    let stop = &created[0].1;
    assert_eq!(stop.side, Side::Buy);
    assert!((stop.price - 99.4).abs() < 1e-9);
    let reentry = &created[1].1;
    assert_eq!(reentry.side, Side::Sell);
    assert!((reentry.price - 116.0).abs() < 1e-9);

    let state = store
        .load("BTC/USDT:USDT", PositionSide::Short)
        .unwrap()
        .unwrap();
    assert_eq!(state.side, Some(Side::Sell));
}
