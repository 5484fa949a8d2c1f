//! Configuration management
//! Supports TOML, YAML, JSON config files

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("No configuration file found. Expected one of: {0}")]
    NotFound(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange API credentials
    pub api: ApiConfig,
    /// Risk engine parameters
    pub risk: RiskConfig,
    /// Symbols to monitor (unified form, e.g. "BTC/USDT:USDT").
    /// Empty means every listed perpetual.
    pub symbols: Vec<String>,
    /// Directory for persisted trailing state
    pub state_dir: String,
    /// Logging level
    pub log_level: Option<String>,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub key: Option<String>,
    pub secret: Option<String>,
    /// Minimum interval between REST requests in milliseconds (default: 100)
    pub rate_limit_ms: u64,
}

/// Risk engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Ratchet increment applied after each successful tighten (default: 0.10)
    pub breath_step: f64,
    /// Net PnL at or below which a position is flattened (default: 0.001)
    pub flat_pnl_epsilon: f64,
    /// Fraction of the liquidation-to-entry distance for the re-entry price
    /// (default: 0.20)
    pub liquidation_fraction: f64,
    /// Closeness level that triggers the liquidation warning (default: 0.80)
    pub closeness_warn: f64,
    /// Polling interval in seconds (default: 10)
    pub cycle_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                key: None,
                secret: None,
                rate_limit_ms: 100,
            },
            risk: RiskConfig {
                breath_step: 0.10,
                flat_pnl_epsilon: 0.001,
                liquidation_fraction: 0.20,
                closeness_warn: 0.80,
                cycle_interval_secs: 10,
            },
            symbols: Vec::new(),
            state_dir: "trailProfit".to_string(),
            log_level: Some("info".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)?;

        let config = if path.extension().map(|e| e == "toml").unwrap_or(false) {
            toml::from_str(&content)?
        } else if path.extension().map(|e| e == "yaml" || e == "yml").unwrap_or(false) {
            serde_yaml::from_str(&content)?
        } else if path.extension().map(|e| e == "json").unwrap_or(false) {
            serde_json::from_str(&content)?
        } else {
            // Try to auto-detect format
            if content.trim().starts_with('{') {
                serde_json::from_str(&content)?
            } else if content.contains("---") {
                serde_yaml::from_str(&content)?
            } else {
                toml::from_str(&content)?
            }
        };

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Load from default locations, falling back to environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let locations = vec![
            "phemex-guard.toml",
            "phemex-guard.yaml",
            "phemex-guard.yml",
            "config.toml",
            "config.yaml",
            ".phemex-guard.toml",
            ".phemex-guard.yaml",
        ];

        for location in &locations {
            if std::path::Path::new(location).exists() {
                let mut config = Self::from_file(location)?;
                config.fill_credentials_from_env();
                return Ok(config);
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let config_file = config_dir.join("phemex-guard/config.toml");
            if config_file.exists() {
                let mut config = Self::from_file(config_file)?;
                config.fill_credentials_from_env();
                return Ok(config);
            }
        }

        info!("No configuration file found, using defaults with environment overrides");
        from_env()
    }

    /// Credentials always come from the environment when present, so they
    /// never have to live in a config file.
    fn fill_credentials_from_env(&mut self) {
        if let Ok(key) = std::env::var("PHEMEX_API_KEY") {
            self.api.key = Some(key);
        }
        if let Ok(secret) = std::env::var("PHEMEX_API_SECRET") {
            self.api.secret = Some(secret);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.key.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::Invalid(
                "PHEMEX_API_KEY is required".to_string(),
            ));
        }
        if self.api.secret.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::Invalid(
                "PHEMEX_API_SECRET is required".to_string(),
            ));
        }
        if self.risk.breath_step <= 0.0 {
            return Err(ConfigError::Invalid(
                "breath_step must be positive".to_string(),
            ));
        }
        if self.risk.flat_pnl_epsilon < 0.0 {
            return Err(ConfigError::Invalid(
                "flat_pnl_epsilon must not be negative".to_string(),
            ));
        }
        if self.risk.liquidation_fraction <= 0.0 || self.risk.liquidation_fraction >= 1.0 {
            return Err(ConfigError::Invalid(
                "liquidation_fraction must be between 0 and 1".to_string(),
            ));
        }
        if self.risk.cycle_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "cycle_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.state_dir.is_empty() {
            return Err(ConfigError::Invalid("state_dir is required".to_string()));
        }
        Ok(())
    }
}

/// Load config from environment variables (fallback)
pub fn from_env() -> Result<Config, ConfigError> {
    use std::env;

    let mut config = Config::default();
    config.fill_credentials_from_env();
    if let Ok(symbols) = env::var("PHEMEX_SYMBOLS") {
        config.symbols = symbols
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(dir) = env::var("STATE_DIR") {
        config.state_dir = dir;
    }
    if let Ok(interval) = env::var("CYCLE_INTERVAL_SECS") {
        if let Ok(secs) = interval.parse() {
            config.risk.cycle_interval_secs = secs;
        }
    }
    config.log_level = env::var("LOG_LEVEL").ok().or(config.log_level);
    Ok(config)
}
