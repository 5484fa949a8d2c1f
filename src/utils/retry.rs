//! Exponential-backoff retry for idempotent API calls
//!
//! Only snapshot fetches go through here; mutating calls are never retried
//! blindly (the engines own their own single-retry fallbacks).

use std::time::Duration;
use tracing::{error, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay_ms,
            ..Default::default()
        }
    }
}

/// Retry a future with exponential backoff.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    config: RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;
    let mut delay_ms = config.initial_delay_ms;

    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                last_error = Some(e);

                if attempt < config.max_retries {
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {}ms: {}",
                        operation_name,
                        attempt + 1,
                        config.max_retries + 1,
                        delay_ms,
                        last_error.as_ref().unwrap()
                    );

                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                    delay_ms = ((delay_ms as f64 * config.backoff_multiplier) as u64)
                        .min(config.max_delay_ms);
                }
            }
        }
    }

    error!(
        "{} failed after {} attempts: {}",
        operation_name,
        config.max_retries + 1,
        last_error.as_ref().unwrap()
    );

    Err(last_error.unwrap())
}
