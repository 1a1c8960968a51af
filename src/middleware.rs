//! Request filters exposed to the hosting application.
//!
//! `rate_limit` and `track` are attached per route group with
//! `axum::middleware::from_fn_with_state`, each carrying its own small state
//! record; `observe_page_views` sits once at the router root. All of them
//! fail open: nothing in here is allowed to turn a store problem into a
//! failed request.

use crate::analytics::{AnalyticsPipeline, PageViewEvent, UserActionEvent};
use crate::error::GateError;
use crate::identity;
use crate::rate_limiter::{epoch_millis, FixedWindowLimiter, RateLimitDecision};
use crate::tiers::RateLimitTier;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{info, warn};

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// Session header set by the storefront frontend; used to approximate
/// distinct active users in the real-time view.
pub const SESSION_HEADER: &str = "x-session-id";

/// Binds one tier to the limiter for a route group.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<FixedWindowLimiter>,
    pub tier: RateLimitTier,
}

impl RateLimitState {
    pub fn new(limiter: Arc<FixedWindowLimiter>, tier: RateLimitTier) -> Self {
        Self { limiter, tier }
    }
}

/// Fixed-window rate limiting filter.
///
/// Both outcomes expose the ceiling, the remaining budget, and the window
/// reset time as headers, so clients can build backoff logic without ever
/// being rejected. Rejections carry `Retry-After` and a JSON body.
pub async fn rate_limit(
    State(st): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let who = identity::resolve(st.tier.identity, &request);
    let decision = st.limiter.check(&who, &st.tier).await;

    if !decision.allowed {
        warn!(
            identity = %who,
            tier = %st.tier.name,
            total_hits = decision.total_hits,
            "request rejected by rate limit"
        );
        let mut response = GateError::RateLimitExceeded {
            retry_after_secs: decision.retry_after_secs(),
            reset_at_ms: decision.reset_at_ms,
        }
        .into_response();
        apply_rate_limit_headers(&mut response, &decision);
        return response;
    }

    let mut response = next.run(request).await;
    if st.tier.skip_successful && response.status().is_success() {
        st.limiter.forgive(&decision).await;
    }
    apply_rate_limit_headers(&mut response, &decision);
    response
}

fn apply_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.ceiling));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining()));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_at_ms));
}

/// Binds a named action to the analytics pipeline for a route.
#[derive(Clone)]
pub struct TrackState {
    pub analytics: Arc<AnalyticsPipeline>,
    pub event: String,
}

impl TrackState {
    pub fn new(analytics: Arc<AnalyticsPipeline>, event: &str) -> Self {
        Self {
            analytics,
            event: event.to_string(),
        }
    }
}

/// Fire a named user action whenever the route is invoked. The tracking
/// call runs on its own task and never delays or fails the response.
pub async fn track(State(st): State<TrackState>, request: Request, next: Next) -> Response {
    let event = UserActionEvent {
        action: st.event.clone(),
        path: request.uri().path().to_string(),
        visitor: identity::client_address(&request),
        session_id: header_value(&request, SESSION_HEADER),
        timestamp_ms: epoch_millis(),
    };
    let analytics = st.analytics.clone();
    tokio::spawn(async move {
        analytics.track_user_action(event).await;
    });

    next.run(request).await
}

/// Router-level observer recording a page view for every GET request,
/// whatever its outcome downstream.
pub async fn observe_page_views(
    State(analytics): State<Arc<AnalyticsPipeline>>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::GET {
        let event = PageViewEvent {
            path: request.uri().path().to_string(),
            visitor: identity::client_address(&request),
            session_id: header_value(&request, SESSION_HEADER),
            referrer: header_value(&request, header::REFERER.as_str()),
            timestamp_ms: epoch_millis(),
        };
        let analytics = analytics.clone();
        tokio::spawn(async move {
            analytics.track_page_view(event).await;
        });
    }

    next.run(request).await
}

/// Request/response logging for every route.
pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client = identity::client_address(&request);

    let response = next.run(request).await;

    info!(
        target: "shelfgate::middleware",
        method = %method,
        uri = %uri,
        client = %client,
        status = %response.status(),
        "request completed"
    );

    response
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::time::Duration;
    use tower::ServiceExt;

    fn limited_router(ceiling: u32) -> Router {
        let limiter = Arc::new(FixedWindowLimiter::new(Arc::new(MemoryStore::new())));
        let tier = RateLimitTier::new("test", ceiling, Duration::from_secs(60));
        Router::new()
            .route("/api/books", get(|| async { "ok" }))
            .route_layer(axum::middleware::from_fn_with_state(
                RateLimitState::new(limiter, tier),
                rate_limit,
            ))
    }

    fn request_from(ip: &str) -> Request {
        axum::http::Request::builder()
            .uri("/api/books")
            .header("x-real-ip", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn allowed_responses_carry_rate_limit_headers() {
        let app = limited_router(5);
        let response = app.oneshot(request_from("1.2.3.4")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[LIMIT_HEADER], "5");
        assert_eq!(response.headers()[REMAINING_HEADER], "4");
        assert!(response.headers().contains_key(RESET_HEADER));
    }

    #[tokio::test]
    async fn rejection_carries_retry_after_and_zero_remaining() {
        let app = limited_router(1);
        assert_eq!(
            app.clone()
                .oneshot(request_from("1.2.3.4"))
                .await
                .unwrap()
                .status(),
            StatusCode::OK
        );

        let rejected = app.oneshot(request_from("1.2.3.4")).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejected.headers()[REMAINING_HEADER], "0");
        assert!(rejected.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn distinct_clients_do_not_share_a_budget() {
        let app = limited_router(1);
        assert_eq!(
            app.clone()
                .oneshot(request_from("1.1.1.1"))
                .await
                .unwrap()
                .status(),
            StatusCode::OK
        );
        assert_eq!(
            app.oneshot(request_from("2.2.2.2")).await.unwrap().status(),
            StatusCode::OK
        );
    }
}
