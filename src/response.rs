use crate::rate_limiter::epoch_millis;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RateLimitStatusResponse {
    pub identity: String,
    pub tier: String,
    pub ceiling: u32,
    pub total_hits: i64,
    pub remaining: u64,
    pub reset_at_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub identity: String,
    pub windows_cleared: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp_ms: u64,
    pub version: String,
    pub store_connected: bool,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp_ms: epoch_millis(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store_connected: true,
        }
    }

    /// The service keeps serving without its store; limits and caching are
    /// simply inert until it returns.
    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
            timestamp_ms: epoch_millis(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store_connected: false,
        }
    }
}
