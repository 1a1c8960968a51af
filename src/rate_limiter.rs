//! Distributed fixed-window rate limiter.
//!
//! Time is divided into non-overlapping windows of the tier's length; all
//! requests from one identity in one window share a single store counter
//! under `rate_limit:{identity}:{window_start}`. The counter is incremented
//! atomically, given a TTL on its first hit so it cannot outlive its window,
//! and left to lapse — nothing deletes it except the administrative reset.
//!
//! The window bucket is computed exactly once per logical operation and
//! threaded through the returned decision, so a follow-up such as the
//! skip-successful refund can never land in a different window than the
//! check that preceded it.

use crate::error::GateError;
use crate::identity;
use crate::store::KeyValueStore;
use crate::tiers::RateLimitTier;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const RATE_LIMIT_PREFIX: &str = "rate_limit:";

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Outcome of a rate-limit check.
///
/// Carries the exact window key the check incremented so later operations on
/// this decision reuse it instead of recomputing a bucket from a fresh clock
/// read.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub total_hits: i64,
    pub ceiling: u32,
    pub reset_at_ms: u64,
    window_key: String,
    /// False when the store was unreachable and the decision was
    /// synthesized fail-open; a refund must not touch the store then.
    counted: bool,
}

impl RateLimitDecision {
    pub fn remaining(&self) -> u64 {
        u64::from(self.ceiling).saturating_sub(self.total_hits.max(0) as u64)
    }

    pub fn retry_after_secs(&self) -> u64 {
        let remaining_ms = self.reset_at_ms.saturating_sub(epoch_millis());
        remaining_ms.div_ceil(1000)
    }
}

pub struct FixedWindowLimiter {
    store: Arc<dyn KeyValueStore>,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn window_key(identity: &str, window_start: u64) -> String {
        format!(
            "{}{}:{}",
            RATE_LIMIT_PREFIX,
            identity::sanitize(identity),
            window_start
        )
    }

    fn window_ttl(window: Duration) -> Duration {
        // Whole seconds, rounded up, so the key never outlives its window
        // by less than it must nor survives into the next one unexpired.
        Duration::from_secs((window.as_millis() as u64).div_ceil(1000))
    }

    /// Count this request against the identity's current window and decide
    /// whether it is allowed.
    ///
    /// A store failure yields an allowed decision with a synthesized count
    /// of one: an outage of the store must never block application traffic.
    pub async fn check(&self, identity: &str, tier: &RateLimitTier) -> RateLimitDecision {
        let now_ms = epoch_millis();
        let window_ms = tier.window.as_millis() as u64;
        let window_start = now_ms - now_ms % window_ms;
        let window_key = Self::window_key(identity, window_start);
        let reset_at_ms = window_start + window_ms;

        match self.store.increment(&window_key).await {
            Ok(count) => {
                if count == 1 {
                    // First hit of the window owns setting the TTL. This also
                    // re-arms expiry on leftover state from clock skew.
                    if let Err(e) = self.store.expire(&window_key, Self::window_ttl(tier.window)).await {
                        warn!(key = %window_key, error = %e, "failed to arm window TTL");
                    }
                }

                let allowed = count <= i64::from(tier.ceiling);
                if !allowed {
                    debug!(
                        identity = %identity,
                        tier = %tier.name,
                        total_hits = count,
                        "rate limit ceiling exceeded"
                    );
                }

                RateLimitDecision {
                    allowed,
                    total_hits: count,
                    ceiling: tier.ceiling,
                    reset_at_ms,
                    window_key,
                    counted: true,
                }
            }
            Err(e) => {
                warn!(
                    identity = %identity,
                    tier = %tier.name,
                    error = %e,
                    "store unavailable during rate limit check, failing open"
                );
                RateLimitDecision {
                    allowed: true,
                    total_hits: 1,
                    ceiling: tier.ceiling,
                    reset_at_ms: now_ms + window_ms,
                    window_key,
                    counted: false,
                }
            }
        }
    }

    /// Refund the hit a decision consumed, for tiers that only count
    /// failures. Reuses the decision's window key; best-effort.
    pub async fn forgive(&self, decision: &RateLimitDecision) {
        if !decision.counted {
            return;
        }
        if let Err(e) = self.store.decrement(&decision.window_key).await {
            warn!(key = %decision.window_key, error = %e, "failed to refund rate limit hit");
        }
    }

    /// Current window count for an identity without consuming a hit.
    pub async fn status(
        &self,
        identity: &str,
        tier: &RateLimitTier,
    ) -> Result<RateLimitDecision, GateError> {
        let now_ms = epoch_millis();
        let window_ms = tier.window.as_millis() as u64;
        let window_start = now_ms - now_ms % window_ms;
        let window_key = Self::window_key(identity, window_start);

        let total_hits = match self.store.get(&window_key).await? {
            Some(raw) => raw.parse::<i64>().unwrap_or(0),
            None => 0,
        };

        Ok(RateLimitDecision {
            allowed: total_hits < i64::from(tier.ceiling),
            total_hits,
            ceiling: tier.ceiling,
            reset_at_ms: window_start + window_ms,
            window_key,
            counted: false,
        })
    }

    /// Administrative reset: drop every live window for one identity.
    /// Returns the number of windows cleared.
    pub async fn reset(&self, identity: &str) -> Result<u64, GateError> {
        let prefix = format!("{}{}:", RATE_LIMIT_PREFIX, identity::sanitize(identity));
        self.store.delete_by_prefix(&prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        async fn set_with_ttl(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> Result<(), GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        async fn delete(&self, _key: &str) -> Result<(), GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        async fn delete_by_prefix(&self, _prefix: &str) -> Result<u64, GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        async fn increment(&self, _key: &str) -> Result<i64, GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        async fn decrement(&self, _key: &str) -> Result<i64, GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        async fn scan_prefix(&self, _prefix: &str) -> Result<Vec<String>, GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        async fn ping(&self) -> Result<(), GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
    }

    fn tier(ceiling: u32, window: Duration) -> RateLimitTier {
        RateLimitTier::new("test", ceiling, window)
    }

    #[tokio::test]
    async fn ceiling_enforced_within_one_window() {
        let limiter = FixedWindowLimiter::new(Arc::new(MemoryStore::new()));
        let tier = tier(3, Duration::from_secs(60));

        for hit in 1..=3 {
            let decision = limiter.check("1.2.3.4", &tier).await;
            assert!(decision.allowed, "hit {} should be allowed", hit);
            assert_eq!(decision.total_hits, hit);
        }

        let rejected = limiter.check("1.2.3.4", &tier).await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.total_hits, 4);
        assert_eq!(rejected.remaining(), 0);
    }

    #[tokio::test]
    async fn identities_do_not_share_windows() {
        let limiter = FixedWindowLimiter::new(Arc::new(MemoryStore::new()));
        let tier = tier(1, Duration::from_secs(60));

        assert!(limiter.check("1.1.1.1", &tier).await.allowed);
        assert!(!limiter.check("1.1.1.1", &tier).await.allowed);
        assert!(limiter.check("2.2.2.2", &tier).await.allowed);
    }

    #[tokio::test]
    async fn counter_restarts_after_window_lapses() {
        let limiter = FixedWindowLimiter::new(Arc::new(MemoryStore::new()));
        let tier = tier(2, Duration::from_millis(300));

        assert!(limiter.check("1.2.3.4", &tier).await.allowed);
        assert!(limiter.check("1.2.3.4", &tier).await.allowed);
        assert!(!limiter.check("1.2.3.4", &tier).await.allowed);

        // TTL rounds up to a whole second; wait it out plus a margin, then
        // the next window must start counting from scratch.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let decision = limiter.check("1.2.3.4", &tier).await;
        assert!(decision.allowed);
        assert_eq!(decision.total_hits, 1);
    }

    #[tokio::test]
    async fn forgive_refunds_exactly_one_hit() {
        let limiter = FixedWindowLimiter::new(Arc::new(MemoryStore::new()));
        let tier = tier(2, Duration::from_secs(60));

        let first = limiter.check("1.2.3.4", &tier).await;
        limiter.forgive(&first).await;

        // The refunded hit frees room for two more before the ceiling.
        assert!(limiter.check("1.2.3.4", &tier).await.allowed);
        assert!(limiter.check("1.2.3.4", &tier).await.allowed);
        assert!(!limiter.check("1.2.3.4", &tier).await.allowed);
    }

    #[tokio::test]
    async fn store_outage_fails_open() {
        let limiter = FixedWindowLimiter::new(Arc::new(FailingStore));
        let tier = tier(1, Duration::from_secs(60));

        for _ in 0..10 {
            let decision = limiter.check("1.2.3.4", &tier).await;
            assert!(decision.allowed);
            assert_eq!(decision.total_hits, 1);
        }
    }

    #[tokio::test]
    async fn forgive_after_fail_open_skips_the_store() {
        let limiter = FixedWindowLimiter::new(Arc::new(FailingStore));
        let tier = tier(1, Duration::from_secs(60));
        let decision = limiter.check("1.2.3.4", &tier).await;
        // Must not panic or log a spurious refund against a dead store.
        limiter.forgive(&decision).await;
    }

    #[tokio::test]
    async fn reset_clears_live_windows() {
        let limiter = FixedWindowLimiter::new(Arc::new(MemoryStore::new()));
        let tier = tier(1, Duration::from_secs(60));

        assert!(limiter.check("1.2.3.4", &tier).await.allowed);
        assert!(!limiter.check("1.2.3.4", &tier).await.allowed);

        let cleared = limiter.reset("1.2.3.4").await.unwrap();
        assert_eq!(cleared, 1);
        assert!(limiter.check("1.2.3.4", &tier).await.allowed);
    }

    #[tokio::test]
    async fn status_reads_without_consuming() {
        let limiter = FixedWindowLimiter::new(Arc::new(MemoryStore::new()));
        let tier = tier(5, Duration::from_secs(60));

        limiter.check("1.2.3.4", &tier).await;
        limiter.check("1.2.3.4", &tier).await;

        let status = limiter.status("1.2.3.4", &tier).await.unwrap();
        assert_eq!(status.total_hits, 2);
        assert_eq!(status.remaining(), 3);

        let again = limiter.status("1.2.3.4", &tier).await.unwrap();
        assert_eq!(again.total_hits, 2);
    }

    #[tokio::test]
    async fn status_of_unseen_identity_is_zero() {
        let limiter = FixedWindowLimiter::new(Arc::new(MemoryStore::new()));
        let tier = tier(5, Duration::from_secs(60));
        let status = limiter.status("9.9.9.9", &tier).await.unwrap();
        assert_eq!(status.total_hits, 0);
        assert_eq!(status.remaining(), 5);
    }
}
