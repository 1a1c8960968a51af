//! Administrative and health endpoints, plus the shared application state.

use crate::analytics::{AnalyticsPipeline, AnalyticsReport, RealTimeReport};
use crate::cache::ResponseCache;
use crate::error::GateError;
use crate::invalidation::CacheInvalidator;
use crate::rate_limiter::FixedWindowLimiter;
use crate::response::{HealthResponse, RateLimitStatusResponse, ResetResponse};
use crate::store::KeyValueStore;
use crate::tiers::Tiers;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Longest analytics range the admin surface will answer in one query.
const MAX_RANGE_DAYS: i64 = 366;

/// One store connection, many consumers: every component is built over the
/// same injected [`KeyValueStore`] instance.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KeyValueStore>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub cache: Arc<ResponseCache>,
    pub invalidator: Arc<CacheInvalidator>,
    pub analytics: Arc<AnalyticsPipeline>,
    pub tiers: Arc<Tiers>,
}

impl AppState {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            limiter: Arc::new(FixedWindowLimiter::new(store.clone())),
            cache: Arc::new(ResponseCache::new(store.clone())),
            invalidator: Arc::new(CacheInvalidator::new(store.clone())),
            analytics: Arc::new(AnalyticsPipeline::new(store.clone())),
            tiers: Arc::new(Tiers::standard()),
            store,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Day-by-day analytics over an inclusive date range.
pub async fn get_analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<AnalyticsReport>, GateError> {
    if query.start > query.end {
        return Err(GateError::InvalidQuery(
            "start date must not be after end date".to_string(),
        ));
    }
    if (query.end - query.start).num_days() >= MAX_RANGE_DAYS {
        return Err(GateError::InvalidQuery(format!(
            "date range must be shorter than {} days",
            MAX_RANGE_DAYS
        )));
    }

    let report = state.analytics.get_analytics(query.start, query.end).await?;
    Ok(Json(report))
}

/// Last-hour activity approximation.
pub async fn get_realtime_analytics(
    State(state): State<AppState>,
) -> Result<Json<RealTimeReport>, GateError> {
    Ok(Json(state.analytics.get_real_time_analytics().await?))
}

#[derive(Debug, Deserialize)]
pub struct TierQuery {
    pub tier: Option<String>,
}

/// Current window count for an identity without consuming a hit.
pub async fn get_rate_limit_status(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    Query(query): Query<TierQuery>,
) -> Result<Json<RateLimitStatusResponse>, GateError> {
    let tier_name = query.tier.as_deref().unwrap_or("lax");
    let tier = state
        .tiers
        .by_name(tier_name)
        .ok_or_else(|| GateError::InvalidQuery(format!("Unknown tier '{}'", tier_name)))?;

    let status = state.limiter.status(&identity, tier).await?;
    Ok(Json(RateLimitStatusResponse {
        identity,
        tier: tier.name.clone(),
        ceiling: status.ceiling,
        total_hits: status.total_hits,
        remaining: status.remaining(),
        reset_at_ms: status.reset_at_ms,
    }))
}

/// Administrative reset: clear every live window for an identity.
pub async fn reset_rate_limit(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<ResetResponse>, GateError> {
    let windows_cleared = state.limiter.reset(&identity).await?;
    info!(identity = %identity, windows_cleared, "rate limit reset");
    Ok(Json(ResetResponse {
        identity,
        windows_cleared,
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    match state.store.ping().await {
        Ok(()) => Json(HealthResponse::healthy()),
        Err(_) => Json(HealthResponse::degraded()),
    }
}

pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "connected"
            })),
        ),
        Err(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "disconnected",
                "note": "serving without rate limits or caching"
            })),
        ),
    }
}
