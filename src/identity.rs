//! Identity resolution for rate limiting.
//!
//! The identity strategy decides *who* a counter belongs to. The default is
//! the client network address; the per-user strategy prefers the
//! authenticated principal and falls back to the address for anonymous
//! traffic.

use axum::extract::{ConnectInfo, Request};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Marker extension inserted by the authentication layer for signed-in
/// requests. This crate only reads it.
#[derive(Debug, Clone)]
pub struct PrincipalId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Client network address, taken from proxy headers when present.
    ClientAddress,
    /// Authenticated principal id, falling back to the client address.
    Principal,
}

/// Resolve the rate-limit identity for a request under the given strategy.
pub fn resolve(strategy: IdentityStrategy, request: &Request) -> String {
    match strategy {
        IdentityStrategy::ClientAddress => client_address(request),
        IdentityStrategy::Principal => match request.extensions().get::<PrincipalId>() {
            Some(PrincipalId(id)) => format!("user:{}", sanitize(id)),
            None => client_address(request),
        },
    }
}

/// Client address from proxy headers, then connection info.
pub fn client_address(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first) = forwarded_str.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return sanitize(first);
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip) = real_ip.to_str() {
            return sanitize(ip.trim());
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return sanitize(&addr.ip().to_string());
    }

    "unknown".to_string()
}

/// Restrict a key component to a charset safe for store keys. Colons are
/// excluded so components can never masquerade as namespace separators.
pub fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
