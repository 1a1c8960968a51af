use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GateError>;

/// Errors produced by the request-shaping layer.
///
/// Store failures are almost always swallowed at the middleware boundary
/// (fail-open); these variants surface only on the admin/query endpoints,
/// where hiding an outage behind zeroed counters would be worse than a 503.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("rate limit exceeded")]
    RateLimitExceeded {
        retry_after_secs: u64,
        reset_at_ms: u64,
    },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    fn new(error: &'static str, message: String, code: u16) -> Self {
        Self {
            error,
            message,
            code,
            retry_after: None,
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let body = match &self {
            GateError::Store(e) => ErrorBody::new("service_unavailable", e.to_string(), 503),
            GateError::StoreUnavailable(msg) => {
                ErrorBody::new("service_unavailable", msg.clone(), 503)
            }
            GateError::Serialization(e) => ErrorBody::new("internal_error", e.to_string(), 500),
            GateError::RateLimitExceeded {
                retry_after_secs, ..
            } => ErrorBody {
                error: "rate_limit_exceeded",
                message: "Request rate limit exceeded".to_string(),
                code: 429,
                retry_after: Some(*retry_after_secs),
            },
            GateError::InvalidQuery(msg) => ErrorBody::new("bad_request", msg.clone(), 400),
            GateError::Config(msg) => ErrorBody::new("configuration_error", msg.clone(), 500),
            GateError::Io(e) => ErrorBody::new("internal_error", e.to_string(), 500),
        };

        let status = StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(body)).into_response();

        if let GateError::RateLimitExceeded {
            retry_after_secs, ..
        } = self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, retry_after_secs.into());
        }

        response
    }
}
