//! Write-triggered cache invalidation.
//!
//! There is no dependency tracking: every mutation endpoint pairs with an
//! explicit [`CacheInvalidator::invalidate`] call after its write commits.
//! A missed pairing does not crash anything, it serves stale reads — which
//! is why each cached resource enumerates its own key groups here instead
//! of leaving the wiring to the call sites.

use crate::cache;
use crate::store::KeyValueStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cached resource types of the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Book,
    Event,
    User,
}

impl Resource {
    /// Namespace the resource's list/browse responses are cached under.
    pub fn list_namespace(&self) -> &'static str {
        match self {
            Resource::Book => "books",
            Resource::Event => "events",
            Resource::User => "users",
        }
    }

    /// Namespace the resource's single-item responses are cached under.
    pub fn detail_namespace(&self) -> &'static str {
        match self {
            Resource::Book => "book",
            Resource::Event => "event",
            Resource::User => "user",
        }
    }

    fn collection_path(&self) -> &'static str {
        match self {
            Resource::Book => "/api/books",
            Resource::Event => "/api/events",
            Resource::User => "/api/users",
        }
    }

    /// Cache key of the id-specific detail response.
    pub fn detail_key(&self, id: &str) -> String {
        cache::cache_key(
            self.detail_namespace(),
            &format!("{}/{}", self.collection_path(), id),
            None,
        )
    }

    /// Singleton keys that must be dropped on any mutation of the type,
    /// independent of which id changed.
    pub fn singleton_keys(&self) -> Vec<String> {
        match self {
            Resource::Book => vec![cache::cache_key(
                self.detail_namespace(),
                "/api/books/featured",
                None,
            )],
            Resource::Event => vec![cache::cache_key(
                self.detail_namespace(),
                "/api/events/upcoming",
                None,
            )],
            Resource::User => Vec::new(),
        }
    }
}

pub struct CacheInvalidator {
    store: Arc<dyn KeyValueStore>,
}

impl CacheInvalidator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Drop every cached response a mutation of `resource` could have made
    /// stale: the whole list namespace by prefix, the singleton keys, and
    /// the id's detail entry when an id is known.
    ///
    /// Deleting keys that do not exist is a no-op success. Store failures
    /// are logged and swallowed; an unreachable store must not fail the
    /// mutation that already committed.
    pub async fn invalidate(&self, resource: Resource, id: Option<&str>) -> u64 {
        let list_prefix = format!("{}:", resource.list_namespace());
        let mut removed = match self.store.delete_by_prefix(&list_prefix).await {
            Ok(count) => count,
            Err(e) => {
                warn!(prefix = %list_prefix, error = %e, "list cache invalidation failed");
                0
            }
        };

        let mut singles = resource.singleton_keys();
        if let Some(id) = id {
            singles.push(resource.detail_key(id));
        }
        for key in singles {
            match self.store.delete(&key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = %key, error = %e, "cache invalidation failed"),
            }
        }

        debug!(
            resource = ?resource,
            id = id.unwrap_or("-"),
            removed,
            "invalidated cached responses"
        );
        removed
    }
}
