pub mod analytics;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod invalidation;
pub mod middleware;
pub mod rate_limiter;
pub mod response;
pub mod server;
pub mod store;
pub mod tiers;

pub use config::Config;
pub use error::{GateError, Result};
pub use handlers::AppState;
pub use server::{build_router, Server};
