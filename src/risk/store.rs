//! Persisted trailing-stop state, one JSON record per (symbol, side)
//!
//! Records live under a `buy/` and a `sell/` namespace; a long position's
//! record sits in `buy/`, a short's in `sell/`. Nothing outside this module
//! caches records across cycles.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::api::{PositionSide, Side};

/// Starting leveraged-profit fraction required to arm the ratchet.
pub const INITIAL_THRESHOLD: f64 = 0.10;
/// Starting fractional stop distance from entry.
pub const INITIAL_PROFIT_TARGET_DISTANCE: f64 = 0.06;

/// Per-(symbol, side) ratchet state.
///
/// `threshold` and `profit_target_distance` only ever grow over a position's
/// lifetime; each successful tightening adds the breath step to both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingState {
    pub threshold: f64,
    pub profit_target_distance: f64,
    #[serde(rename = "orderId", default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
}

impl Default for TrailingState {
    fn default() -> Self {
        Self {
            threshold: INITIAL_THRESHOLD,
            profit_target_distance: INITIAL_PROFIT_TARGET_DISTANCE,
            order_id: None,
            side: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Key-value persistence for trailing state, keyed by symbol + side.
pub trait StateStore: Send + Sync {
    fn load(&self, symbol: &str, side: PositionSide) -> Result<Option<TrailingState>, StoreError>;

    fn save(
        &self,
        symbol: &str,
        side: PositionSide,
        state: &TrailingState,
    ) -> Result<(), StoreError>;

    /// Delete the record for (symbol, side); returns whether one existed.
    fn delete(&self, symbol: &str, side: PositionSide) -> Result<bool, StoreError>;

    /// Every stored (namespace, key) pair, for the reconciliation sweep.
    fn list_all(&self) -> Result<HashSet<(Side, String)>, StoreError>;

    /// Remove one entry by its raw (namespace, key) pair; returns whether
    /// one existed.
    fn remove_entry(&self, side: Side, key: &str) -> Result<bool, StoreError>;
}

/// File-system key for a unified symbol: "BTC/USDT:USDT" -> "BTC_USDT_USDT".
pub fn safe_key(symbol: &str) -> String {
    symbol.replace(['/', ':'], "_")
}

/// Inverse of `safe_key` for USDT perpetuals:
/// "JELLYJELLY_USDT_USDT" -> "JELLYJELLY/USDT:USDT".
pub fn key_to_symbol(key: &str) -> Option<String> {
    let parts: Vec<&str> = key.split('_').collect();
    if parts.len() < 3 {
        return None;
    }
    Some(format!("{}/{}:USDT", parts[0], parts[1]))
}

/// JSON-file store, one file per record.
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Open (and create) the store under `root`, with its `buy/` and
    /// `sell/` namespaces.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("buy"))?;
        std::fs::create_dir_all(root.join("sell"))?;
        Ok(Self { root })
    }

    fn namespace_dir(&self, side: Side) -> PathBuf {
        self.root.join(side.as_str())
    }

    fn record_path(&self, symbol: &str, side: PositionSide) -> PathBuf {
        self.namespace_dir(side.order_side())
            .join(format!("{}.json", safe_key(symbol)))
    }

    fn list_namespace(&self, side: Side, out: &mut HashSet<(Side, String)>) -> Result<(), StoreError> {
        let dir = self.namespace_dir(side);
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    out.insert((side, stem.to_string()));
                }
            }
        }
        Ok(())
    }

    fn remove_file(path: &Path) -> Result<bool, StoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self, symbol: &str, side: PositionSide) -> Result<Option<TrailingState>, StoreError> {
        let path = self.record_path(symbol, side);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(
        &self,
        symbol: &str,
        side: PositionSide,
        state: &TrailingState,
    ) -> Result<(), StoreError> {
        let mut record = state.clone();
        record.side = Some(side.order_side());
        let content = serde_json::to_string_pretty(&record)?;
        std::fs::write(self.record_path(symbol, side), content)?;
        Ok(())
    }

    fn delete(&self, symbol: &str, side: PositionSide) -> Result<bool, StoreError> {
        Self::remove_file(&self.record_path(symbol, side))
    }

    fn list_all(&self) -> Result<HashSet<(Side, String)>, StoreError> {
        let mut out = HashSet::new();
        self.list_namespace(Side::Buy, &mut out)?;
        self.list_namespace(Side::Sell, &mut out)?;
        Ok(out)
    }

    fn remove_entry(&self, side: Side, key: &str) -> Result<bool, StoreError> {
        Self::remove_file(&self.namespace_dir(side).join(format!("{key}.json")))
    }
}
