//! Router assembly and server lifecycle.
//!
//! The hosting application attaches this crate's filters to its own route
//! groups (catalog under Lax + cache, login under Auth, payments under
//! Payment); the router built here carries the surfaces the gate owns
//! itself: the Moderate-tier admin analytics endpoints, rate-limit
//! administration, and health/readiness.

use crate::config::Config;
use crate::error::GateError;
use crate::handlers::{self, AppState};
use crate::middleware::{self, RateLimitState};
use crate::store::{KeyValueStore, MemoryStore, RedisStore};
use axum::middleware as axum_middleware;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn build_router(state: AppState) -> Router {
    let moderate = RateLimitState::new(state.limiter.clone(), state.tiers.moderate.clone());

    let admin = Router::new()
        .route("/admin/analytics", get(handlers::get_analytics))
        .route(
            "/admin/analytics/realtime",
            get(handlers::get_realtime_analytics),
        )
        .route(
            "/admin/rate-limits/:identity",
            get(handlers::get_rate_limit_status).delete(handlers::reset_rate_limit),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            moderate,
            middleware::rate_limit,
        ));

    Router::new()
        .merge(admin)
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::readiness))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(axum_middleware::from_fn(middleware::request_logging)),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.analytics.clone(),
            middleware::observe_page_views,
        ))
        .with_state(state)
}

pub struct Server {
    router: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self, GateError> {
        let store: Arc<dyn KeyValueStore> = match &config.redis_url {
            Some(url) => {
                let store = RedisStore::connect(url).await?;
                info!("connected to Redis store");
                Arc::new(store)
            }
            None => {
                info!("no Redis URL configured, using in-process store");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self {
            router: build_router(AppState::new(store)),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> Result<(), GateError> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        info!("shelfgate listening on {}", self.bind_addr);

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("received terminate signal, initiating graceful shutdown");
        },
    }
}
