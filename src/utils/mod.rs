//! Shared utilities

pub mod rate_limiter;
pub mod retry;
