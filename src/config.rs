use crate::error::GateError;
use std::env;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address.
    pub bind_addr: SocketAddr,
    /// Redis connection URL. When unset the service runs on the in-process
    /// store, which limits rate limiting and caching to a single node.
    pub redis_url: Option<String>,
    /// Default log level when RUST_LOG is not set.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, GateError> {
        let bind = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let bind_addr = bind
            .parse()
            .map_err(|_| GateError::Config(format!("Invalid bind address '{}'", bind)))?;

        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.is_empty());
        if let Some(url) = &redis_url {
            validate_redis_url(url)?;
        }

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            bind_addr,
            redis_url,
            log_level,
        })
    }
}

pub fn validate_redis_url(url: &str) -> Result<(), GateError> {
    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
        return Err(GateError::Config(
            "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
        ));
    }
    Ok(())
}
