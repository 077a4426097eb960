//! Fixed-window request admission control.
//!
//! Counts are kept per `identity:operation:window` bucket. Bursts that
//! straddle a window boundary can admit up to twice the configured maximum;
//! that is the accepted cost of a fixed window.

use crate::error::PipelineError;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Identity used for the system-wide tier.
pub const GLOBAL_IDENTITY: &str = "*";

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    pub reset_time: DateTime<Utc>,
}

/// Admission control seam.
pub trait RateLimiter: Send + Sync {
    /// Count one request against `identity` / `operation`.
    fn allow(
        &self,
        identity: &str,
        operation: &str,
        window_ms: u64,
        max_requests: u32,
    ) -> RateDecision;

    /// Drop every window.
    fn reset(&self);
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    reset_time: DateTime<Utc>,
}

/// In-process limiter backed by a mutex-protected map.
///
/// Counters live in this process only, so limits hold for a single-instance
/// deployment. Several instances need a shared counter store behind
/// [`RateLimiter`] instead. A restart clears every window.
#[derive(Debug, Default)]
pub struct InMemoryRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same as [`RateLimiter::allow`] with an explicit clock.
    pub fn allow_at(
        &self,
        identity: &str,
        operation: &str,
        window_ms: u64,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let window_ms = window_ms.max(1);
        let bucket = now.timestamp_millis().div_euclid(window_ms as i64);
        let key = format!("{}:{}:{}", identity, operation, bucket);

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|_, w| w.reset_time >= now);

        let window = windows.entry(key).or_insert_with(|| Window {
            count: 0,
            reset_time: now + Duration::milliseconds(window_ms as i64),
        });

        if window.count >= max_requests {
            debug!(
                "Rate window full for {}:{} ({}/{})",
                identity, operation, window.count, max_requests
            );
            return RateDecision {
                allowed: false,
                reset_time: window.reset_time,
            };
        }

        window.count += 1;
        RateDecision {
            allowed: true,
            reset_time: window.reset_time,
        }
    }

    /// Number of live windows.
    #[allow(dead_code)] // Used by tests and diagnostics
    pub fn active_windows(&self) -> usize {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn allow(
        &self,
        identity: &str,
        operation: &str,
        window_ms: u64,
        max_requests: u32,
    ) -> RateDecision {
        self.allow_at(identity, operation, window_ms, max_requests, Utc::now())
    }

    fn reset(&self) {
        self.windows.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Window size and ceilings for the two tiers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    pub window_ms: u64,
    pub global_max_requests: u32,
    pub identity_max_requests: u32,
}

/// Global tier first, then the caller's own tier.
pub struct TieredRateLimiter {
    limiter: Arc<dyn RateLimiter>,
    policy: RateLimitPolicy,
}

impl TieredRateLimiter {
    pub fn new(limiter: Arc<dyn RateLimiter>, policy: RateLimitPolicy) -> Self {
        Self { limiter, policy }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Admit one call or return `RateLimitExceeded` for the tier that refused.
    ///
    /// The identity tier is only consulted once the global tier admits.
    pub fn check(&self, identity: &str, operation: &str) -> Result<RateDecision, PipelineError> {
        let global = self.limiter.allow(
            GLOBAL_IDENTITY,
            operation,
            self.policy.window_ms,
            self.policy.global_max_requests,
        );
        if !global.allowed {
            return Err(PipelineError::RateLimitExceeded {
                identity: GLOBAL_IDENTITY.to_string(),
                operation: operation.to_string(),
                reset_time: global.reset_time,
            });
        }

        let own = self.limiter.allow(
            identity,
            operation,
            self.policy.window_ms,
            self.policy.identity_max_requests,
        );
        if !own.allowed {
            return Err(PipelineError::RateLimitExceeded {
                identity: identity.to_string(),
                operation: operation.to_string(),
                reset_time: own.reset_time,
            });
        }

        Ok(own)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_fixed_window_admits_max_then_refuses() {
        let limiter = InMemoryRateLimiter::new();
        let start = 600_000;

        for i in 0..3 {
            let d = limiter.allow_at("alice", "analyze", 60_000, 3, at(start + i * 10));
            assert!(d.allowed, "call {} should pass", i + 1);
        }

        let fourth = limiter.allow_at("alice", "analyze", 60_000, 3, at(start + 100));
        assert!(!fourth.allowed);
        assert_eq!(fourth.reset_time, at(start + 60_000));

        let after = limiter.allow_at("alice", "analyze", 60_000, 3, at(start + 60_001));
        assert!(after.allowed);
        assert_eq!(after.reset_time, at(start + 60_001 + 60_000));
    }

    #[test]
    fn test_refusal_does_not_increment() {
        let limiter = InMemoryRateLimiter::new();
        let now = at(0);
        assert!(limiter.allow_at("a", "op", 1_000, 1, now).allowed);
        for _ in 0..5 {
            assert!(!limiter.allow_at("a", "op", 1_000, 1, now).allowed);
        }
        let windows = limiter.windows.lock().unwrap();
        assert_eq!(windows.values().next().map(|w| w.count), Some(1));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = InMemoryRateLimiter::new();
        let now = at(5_000);
        assert!(limiter.allow_at("a", "op", 1_000, 1, now).allowed);
        assert!(limiter.allow_at("b", "op", 1_000, 1, now).allowed);
        assert!(limiter.allow_at("a", "other", 1_000, 1, now).allowed);
        assert!(!limiter.allow_at("a", "op", 1_000, 1, now).allowed);
    }

    #[test]
    fn test_expired_windows_are_purged() {
        let limiter = InMemoryRateLimiter::new();
        limiter.allow_at("a", "op", 1_000, 5, at(0));
        limiter.allow_at("b", "op", 1_000, 5, at(0));
        assert_eq!(limiter.active_windows(), 2);

        limiter.allow_at("c", "op", 1_000, 5, at(10_000));
        assert_eq!(limiter.active_windows(), 1);

    }

    #[test]
    fn test_boundary_burst_is_preserved() {
        let limiter = InMemoryRateLimiter::new();
        let admitted = (0..2)
            .filter(|i| limiter.allow_at("a", "op", 1_000, 2, at(999 - i)).allowed)
            .count()
            + (0..2)
                .filter(|i| limiter.allow_at("a", "op", 1_000, 2, at(1_000 + i)).allowed)
                .count();
        assert_eq!(admitted, 4);
    }

    #[test]
    fn test_reset_clears_windows() {
        let limiter = InMemoryRateLimiter::new();
        limiter.allow_at("a", "op", 60_000, 1, Utc::now());
        limiter.reset();
        assert_eq!(limiter.active_windows(), 0);
    }

    #[test]
    fn test_tiered_global_checked_first() {
        let limiter = Arc::new(InMemoryRateLimiter::new());
        let tiered = TieredRateLimiter::new(
            limiter.clone(),
            RateLimitPolicy {
                window_ms: 60_000,
                global_max_requests: 2,
                identity_max_requests: 5,
            },
        );

        assert!(tiered.check("alice", "generate").is_ok());
        assert!(tiered.check("bob", "generate").is_ok());

        match tiered.check("carol", "generate") {
            Err(PipelineError::RateLimitExceeded { identity, .. }) => {
                assert_eq!(identity, GLOBAL_IDENTITY)
            }
            other => panic!("expected global refusal, got {:?}", other),
        }
        // carol's own tier was never touched
        assert_eq!(limiter.active_windows(), 3);
    }

    #[test]
    fn test_tiered_identity_limit() {
        let tiered = TieredRateLimiter::new(
            Arc::new(InMemoryRateLimiter::new()),
            RateLimitPolicy {
                window_ms: 60_000,
                global_max_requests: 100,
                identity_max_requests: 1,
            },
        );

        assert!(tiered.check("alice", "generate").is_ok());
        match tiered.check("alice", "generate") {
            Err(PipelineError::RateLimitExceeded { identity, .. }) => assert_eq!(identity, "alice"),
            other => panic!("expected identity refusal, got {:?}", other),
        }
        assert!(tiered.check("bob", "generate").is_ok());
    }
}
