//! Polling-cycle orchestration
//!
//! One cycle: fetch a fresh snapshot (balance + positions), run the trailing
//! and re-entry engines over each open position, then reconcile orphans and
//! stale state. Cycles are strictly sequential; a snapshot failure aborts the
//! whole cycle and the next tick retries from scratch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::api::{ExchangeGateway, Market, OrderType, Position};
use crate::risk::orphans::{cancel_orphan_orders, cleanup_stale_state};
use crate::risk::reentry::{ReentryEngine, ReentryOutcome};
use crate::risk::store::StateStore;
use crate::risk::trailing::{TrailingOutcome, TrailingStopEngine};
use crate::utils::retry::{retry_with_backoff, RetryConfig};
use crate::GuardError;

/// What one cycle did, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub open_positions: usize,
    pub flattened: usize,
    pub tightened: usize,
    pub reentries_placed: usize,
    pub orphans_cancelled: usize,
    pub stale_removed: usize,
}

pub struct CycleOrchestrator {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn StateStore>,
    trailing: TrailingStopEngine,
    reentry: ReentryEngine,
    symbols: Vec<String>,
    markets: HashMap<String, Market>,
}

impl CycleOrchestrator {
    /// Build the orchestrator. Market metadata is fetched once here; tick and
    /// step sizes do not change over the life of the process.
    ///
    /// An empty `symbols` list means "every listed perpetual": the universe is
    /// taken from the loaded markets so the orphan sweep always has symbols to
    /// inspect.
    pub async fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<dyn StateStore>,
        trailing: TrailingStopEngine,
        reentry: ReentryEngine,
        symbols: Vec<String>,
    ) -> Result<Self, GuardError> {
        let gw = Arc::clone(&gateway);
        let markets = retry_with_backoff("load_markets", RetryConfig::new(2, 500), || {
            let gw = Arc::clone(&gw);
            async move { gw.load_markets().await }
        })
        .await?;
        info!("✅ Loaded metadata for {} markets", markets.len());
        let symbols = if symbols.is_empty() {
            let mut all: Vec<String> = markets.keys().cloned().collect();
            all.sort();
            info!("No symbol list configured, managing all {} perpetuals", all.len());
            all
        } else {
            symbols
        };
        Ok(Self {
            gateway,
            store,
            trailing,
            reentry,
            symbols,
            markets,
        })
    }

    /// Run one full cycle against a fresh snapshot.
    pub async fn run_cycle(&self) -> Result<CycleReport, GuardError> {
        let mut report = CycleReport::default();

        // FetchSnapshot: a failure here aborts the cycle.
        let balances = self.gateway.fetch_balance("swap").await?;
        if let Some(usdt) = balances.get("USDT") {
            info!("💰 Free USDT balance: {:.2}", usdt.free);
        }
        let positions = self.gateway.fetch_positions(&self.symbols).await?;
        let open: Vec<&Position> = positions.iter().filter(|p| p.contracts > 0.0).collect();
        report.open_positions = open.len();
        info!("🔄 Cycle start: {} open position(s)", open.len());

        // EvaluatePositions: per-position failures are logged and contained.
        for position in &open {
            match self.trailing.evaluate(&*self.gateway, &*self.store, position).await {
                Ok(TrailingOutcome::Flattened) => report.flattened += 1,
                Ok(TrailingOutcome::Tightened { .. }) => report.tightened += 1,
                Ok(_) => {}
                Err(e) => {
                    error!("❌ Trailing evaluation failed for {}: {e}", position.symbol);
                    continue;
                }
            }

            match self
                .reentry
                .evaluate(&*self.gateway, &self.markets, position)
                .await
            {
                Ok(ReentryOutcome::Placed { .. }) => report.reentries_placed += 1,
                Ok(_) => {}
                Err(e) => {
                    error!("❌ Re-entry evaluation failed for {}: {e}", position.symbol);
                }
            }
        }

        // Reconcile, with the freshest positions we have. Only limit orders
        // are swept; protective stops belong to the trailing engine.
        report.orphans_cancelled =
            cancel_orphan_orders(&*self.gateway, &self.symbols, &positions, OrderType::Limit)
                .await?;
        let deleted = cleanup_stale_state(&*self.store, &positions)?;
        report.stale_removed = deleted.len();
        if !deleted.is_empty() {
            report.orphans_cancelled +=
                cancel_orphan_orders(&*self.gateway, &deleted, &positions, OrderType::Limit)
                    .await?;
        }

        info!(
            "✅ Cycle done: {} flattened, {} tightened, {} re-entries, {} orphans cancelled, \
             {} stale records removed",
            report.flattened,
            report.tightened,
            report.reentries_placed,
            report.orphans_cancelled,
            report.stale_removed
        );
        Ok(report)
    }
}
