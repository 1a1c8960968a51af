//! Rate-limit tier registry.
//!
//! Each tier is a plain configuration record bound to a route prefix at
//! router assembly: Lax for general API traffic, Moderate for the admin
//! analytics surface, Strict for sensitive endpoints, Auth for login
//! attempts (only failures count), and Payment for payment initiation.

use crate::identity::IdentityStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitTier {
    pub name: String,
    /// Requests allowed per identity per window.
    pub ceiling: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub identity: IdentityStrategy,
    /// When set, a success response refunds the hit it consumed, so only
    /// failed requests count toward the ceiling.
    pub skip_successful: bool,
}

impl RateLimitTier {
    pub fn new(name: &str, ceiling: u32, window: Duration) -> Self {
        Self {
            name: name.to_string(),
            ceiling,
            window,
            identity: IdentityStrategy::ClientAddress,
            skip_successful: false,
        }
    }

    /// 200 requests / 15 minutes, default for general API traffic.
    pub fn lax() -> Self {
        Self::new("lax", 200, Duration::from_secs(15 * 60))
    }

    /// 100 requests / 15 minutes, for the admin analytics routes.
    pub fn moderate() -> Self {
        Self::new("moderate", 100, Duration::from_secs(15 * 60))
    }

    /// 50 requests / 15 minutes, reserved for sensitive endpoints.
    pub fn strict() -> Self {
        Self::new("strict", 50, Duration::from_secs(15 * 60))
    }

    /// 5 requests / 5 minutes, counting only failed attempts so repeated
    /// legitimate logins are never penalized.
    pub fn auth() -> Self {
        Self {
            skip_successful: true,
            ..Self::new("auth", 5, Duration::from_secs(5 * 60))
        }
    }

    /// 10 requests / 60 minutes on payment initiation, keyed per user.
    pub fn payment() -> Self {
        Self {
            identity: IdentityStrategy::Principal,
            ..Self::new("payment", 10, Duration::from_secs(60 * 60))
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Tier name cannot be empty".to_string());
        }
        if self.ceiling == 0 {
            return Err("Ceiling must be greater than 0".to_string());
        }
        if self.window.as_millis() == 0 {
            return Err("Window must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// The five standard tiers, instantiated once at startup.
#[derive(Debug, Clone)]
pub struct Tiers {
    pub lax: RateLimitTier,
    pub moderate: RateLimitTier,
    pub strict: RateLimitTier,
    pub auth: RateLimitTier,
    pub payment: RateLimitTier,
}

impl Tiers {
    pub fn standard() -> Self {
        Self {
            lax: RateLimitTier::lax(),
            moderate: RateLimitTier::moderate(),
            strict: RateLimitTier::strict(),
            auth: RateLimitTier::auth(),
            payment: RateLimitTier::payment(),
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&RateLimitTier> {
        match name {
            "lax" => Some(&self.lax),
            "moderate" => Some(&self.moderate),
            "strict" => Some(&self.strict),
            "auth" => Some(&self.auth),
            "payment" => Some(&self.payment),
            _ => None,
        }
    }
}

impl Default for Tiers {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_tiers_match_published_limits() {
        let tiers = Tiers::standard();
        assert_eq!(tiers.lax.ceiling, 200);
        assert_eq!(tiers.lax.window, Duration::from_secs(900));
        assert_eq!(tiers.moderate.ceiling, 100);
        assert_eq!(tiers.strict.ceiling, 50);
        assert_eq!(tiers.auth.ceiling, 5);
        assert_eq!(tiers.auth.window, Duration::from_secs(300));
        assert_eq!(tiers.payment.ceiling, 10);
        assert_eq!(tiers.payment.window, Duration::from_secs(3600));
    }

    #[test]
    fn only_auth_skips_successful_requests() {
        let tiers = Tiers::standard();
        assert!(tiers.auth.skip_successful);
        assert!(!tiers.lax.skip_successful);
        assert!(!tiers.payment.skip_successful);
    }

    #[test]
    fn payment_tier_keys_per_user() {
        assert_eq!(
            RateLimitTier::payment().identity,
            IdentityStrategy::Principal
        );
        assert_eq!(
            RateLimitTier::lax().identity,
            IdentityStrategy::ClientAddress
        );
    }

    #[test]
    fn by_name_resolves_every_tier() {
        let tiers = Tiers::standard();
        for name in ["lax", "moderate", "strict", "auth", "payment"] {
            assert_eq!(tiers.by_name(name).unwrap().name, name);
        }
        assert!(tiers.by_name("turbo").is_none());
    }

    #[test]
    fn validate_rejects_zero_ceiling_and_window() {
        assert!(RateLimitTier::new("t", 0, Duration::from_secs(60))
            .validate()
            .is_err());
        assert!(RateLimitTier::new("t", 10, Duration::ZERO)
            .validate()
            .is_err());
        assert!(RateLimitTier::lax().validate().is_ok());
    }
}
