//! Store-backed response cache for read-style routes.
//!
//! The middleware only ever touches GET requests. A hit replays the stored
//! body without invoking the downstream handler; a miss lets the handler
//! run, then persists the body best-effort when the response was a success.
//! Either way the response carries an `X-Cache` status token so clients can
//! observe the cache from the outside.
//!
//! Keys compose the route namespace, the full request path, and a
//! canonicalized JSON rendering of the query parameters, so two requests
//! differing in any parameter value land on distinct entries while parameter
//! order does not matter.

use crate::store::KeyValueStore;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Response header carrying the cache outcome, `HIT` or `MISS`.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// List/browse endpoints: 30 minutes.
pub const LIST_TTL: Duration = Duration::from_secs(1800);
/// Single-resource and featured lookups: 1 hour.
pub const DETAIL_TTL: Duration = Duration::from_secs(3600);
/// Near-static reference data (categories, authors): 2 hours.
pub const REFERENCE_TTL: Duration = Duration::from_secs(7200);

/// Compose a cache key from namespace, path, and raw query string.
pub fn cache_key(namespace: &str, path: &str, query: Option<&str>) -> String {
    format!("{}:{}:{}", namespace, path, canonical_query(query))
}

/// Render query parameters as sorted-key JSON. Repeated parameters keep the
/// last value; a missing or empty query canonicalizes to `{}`.
fn canonical_query(raw: Option<&str>) -> String {
    let mut params = BTreeMap::new();
    if let Some(raw) = raw {
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) => params.insert(key.to_string(), value.to_string()),
                None => params.insert(pair.to_string(), String::new()),
            };
        }
    }
    serde_json::to_string(&params).unwrap_or_else(|_| "{}".to_string())
}

pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Fetch a cached body. A store failure is a miss, never an error.
    pub async fn lookup(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Persist a body under a key, best-effort.
    pub async fn store_body(&self, key: &str, body: &str, ttl: Duration) {
        if let Err(e) = self.store.set_with_ttl(key, body, ttl).await {
            warn!(key = %key, error = %e, "cache write failed, response served uncached");
        }
    }
}

/// Per-route-group configuration for [`cache_response`].
#[derive(Clone)]
pub struct CacheState {
    pub cache: Arc<ResponseCache>,
    pub namespace: String,
    pub ttl: Duration,
}

impl CacheState {
    pub fn new(cache: Arc<ResponseCache>, namespace: &str, ttl: Duration) -> Self {
        Self {
            cache,
            namespace: namespace.to_string(),
            ttl,
        }
    }
}

/// Response-caching middleware. Attach per read route group with
/// `axum::middleware::from_fn_with_state`.
pub async fn cache_response(
    State(st): State<CacheState>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = cache_key(&st.namespace, request.uri().path(), request.uri().query());

    if let Some(body) = st.cache.lookup(&key).await {
        debug!(key = %key, "cache hit");
        let mut response = (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            body,
        )
            .into_response();
        response
            .headers_mut()
            .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("HIT"));
        return response;
    }

    let response = next.run(request).await;
    let (mut parts, body) = response.into_parts();
    parts
        .headers
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static("MISS"));

    // Only success bodies are ever cached; error responses pass through.
    if !parts.status.is_success() {
        return Response::from_parts(parts, body);
    }

    match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            match std::str::from_utf8(&bytes) {
                Ok(text) => st.cache.store_body(&key, text, st.ttl).await,
                Err(_) => {
                    warn!(key = %key, "response body is not UTF-8, skipping cache");
                }
            }
            Response::from_parts(parts, Body::from(bytes))
        }
        Err(e) => {
            // The body stream already failed; nothing left to deliver.
            warn!(key = %key, error = %e, "failed to read response body for caching");
            Response::from_parts(parts, Body::empty())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn key_includes_namespace_path_and_query() {
        let key = cache_key("books", "/api/books", Some("page=2&sort=title"));
        assert_eq!(key, "books:/api/books:{\"page\":\"2\",\"sort\":\"title\"}");
    }

    #[test]
    fn empty_query_canonicalizes_to_empty_object() {
        assert_eq!(cache_key("books", "/api/books", None), "books:/api/books:{}");
        assert_eq!(
            cache_key("books", "/api/books", Some("")),
            "books:/api/books:{}"
        );
    }

    #[test]
    fn parameter_order_does_not_change_the_key() {
        let a = cache_key("books", "/api/books", Some("a=1&b=2"));
        let b = cache_key("books", "/api/books", Some("b=2&a=1"));
        assert_eq!(a, b);
    }

    #[test]
    fn differing_parameter_values_produce_distinct_keys() {
        let a = cache_key("books", "/api/books", Some("page=1"));
        let b = cache_key("books", "/api/books", Some("page=2"));
        assert_ne!(a, b);
    }

    #[test]
    fn valueless_parameter_is_kept() {
        let key = cache_key("books", "/api/books", Some("featured"));
        assert_eq!(key, "books:/api/books:{\"featured\":\"\"}");
    }

    #[tokio::test]
    async fn lookup_returns_stored_body_within_ttl() {
        let cache = ResponseCache::new(Arc::new(MemoryStore::new()));
        cache
            .store_body("books:/api/books:{}", "[\"dune\"]", Duration::from_secs(60))
            .await;
        assert_eq!(
            cache.lookup("books:/api/books:{}").await.as_deref(),
            Some("[\"dune\"]")
        );
    }

    #[tokio::test]
    async fn lookup_misses_after_ttl() {
        let cache = ResponseCache::new(Arc::new(MemoryStore::new()));
        cache
            .store_body("books:/api/books:{}", "[]", Duration::from_millis(20))
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.lookup("books:/api/books:{}").await, None);
    }
}
