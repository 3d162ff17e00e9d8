//! Per-rule outbound rate limiting.
//!
//! Token bucket per rule: `capacity` requests per `window_seconds`, with
//! burst up to capacity. Exhausted rules get a computed delay instead of a
//! drop; the delivery is re-queued for that moment.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::RateLimitPolicy;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    /// Token bucket exhausted; retry after the delay.
    Delay(Duration),
}

impl RateDecision {
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Process-wide registry of per-rule token buckets.
pub struct RateLimiterRegistry {
    limiters: RwLock<HashMap<Uuid, (RateLimitPolicy, Arc<DirectLimiter>)>>,
    clock: DefaultClock,
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self { limiters: RwLock::new(HashMap::new()), clock: DefaultClock::default() }
    }

    fn build_limiter(policy: &RateLimitPolicy) -> Option<Arc<DirectLimiter>> {
        let capacity = NonZeroU32::new(policy.capacity)?;
        let window = Duration::from_secs(u64::from(policy.window_seconds.max(1)));
        // One token replenished every window/capacity, burst up to capacity.
        let period = window / policy.capacity.max(1);
        let quota = Quota::with_period(period)?.allow_burst(capacity);
        Some(Arc::new(RateLimiter::direct(quota)))
    }

    /// Check the rule's bucket. Rules without a policy are unlimited.
    pub async fn check(&self, rule_id: Uuid, policy: Option<&RateLimitPolicy>) -> RateDecision {
        let Some(policy) = policy else {
            return RateDecision::Allow;
        };

        let limiter = {
            let mut limiters = self.limiters.write().await;
            match limiters.get(&rule_id) {
                // Rebuild when the policy changed under us.
                Some((stored, limiter)) if stored == policy => Arc::clone(limiter),
                _ => match Self::build_limiter(policy) {
                    Some(limiter) => {
                        limiters.insert(rule_id, (*policy, Arc::clone(&limiter)));
                        limiter
                    }
                    None => return RateDecision::Allow,
                },
            }
        };

        match limiter.check() {
            Ok(()) => RateDecision::Allow,
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                RateDecision::Delay(wait)
            }
        }
    }

    /// Drop a rule's bucket (config change or rule removal).
    pub async fn remove(&self, rule_id: Uuid) {
        self.limiters.write().await.remove(&rule_id);
    }

    /// Clear all state on shutdown.
    pub async fn clear(&self) {
        self.limiters.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_policy_means_unlimited() {
        let registry = RateLimiterRegistry::new();
        let rule_id = Uuid::new_v4();
        for _ in 0..100 {
            assert_eq!(registry.check(rule_id, None).await, RateDecision::Allow);
        }
    }

    #[tokio::test]
    async fn bucket_exhaustion_yields_a_delay() {
        let registry = RateLimiterRegistry::new();
        let rule_id = Uuid::new_v4();
        let policy = RateLimitPolicy { capacity: 2, window_seconds: 60 };

        assert!(registry.check(rule_id, Some(&policy)).await.is_allowed());
        assert!(registry.check(rule_id, Some(&policy)).await.is_allowed());

        match registry.check(rule_id, Some(&policy)).await {
            RateDecision::Delay(wait) => assert!(wait > Duration::ZERO),
            RateDecision::Allow => panic!("third request should be limited"),
        }
    }

    #[tokio::test]
    async fn buckets_are_per_rule() {
        let registry = RateLimiterRegistry::new();
        let policy = RateLimitPolicy { capacity: 1, window_seconds: 60 };

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(registry.check(a, Some(&policy)).await.is_allowed());
        assert!(registry.check(b, Some(&policy)).await.is_allowed());
        assert!(!registry.check(a, Some(&policy)).await.is_allowed());
    }

    #[tokio::test]
    async fn policy_change_rebuilds_the_bucket() {
        let registry = RateLimiterRegistry::new();
        let rule_id = Uuid::new_v4();
        let tight = RateLimitPolicy { capacity: 1, window_seconds: 60 };
        let loose = RateLimitPolicy { capacity: 10, window_seconds: 60 };

        assert!(registry.check(rule_id, Some(&tight)).await.is_allowed());
        assert!(!registry.check(rule_id, Some(&tight)).await.is_allowed());

        // New policy: fresh bucket.
        assert!(registry.check(rule_id, Some(&loose)).await.is_allowed());
    }
}
