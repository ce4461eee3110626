//! Core rate limiter implementation.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::key::RateLimitKey;
use super::rules::RuleSet;
use super::store::{WindowRecord, WindowStore};
use crate::error::Result;

/// Default number of windows a record must be idle before a sweep drops it.
pub const DEFAULT_GRACE_MULTIPLE: u64 = 2;

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// The rule's request quota per window
    pub limit: u64,
    /// Requests left in the current window after this one
    pub remaining: u64,
    /// How long a denied caller should wait, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// When the current window closes, ms since epoch
    pub reset_at: u64,
}

impl Decision {
    /// `retry_after_ms` rounded up to whole seconds, as sent in `Retry-After`.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after_ms.map(|ms| ms.div_ceil(1000))
    }
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    /// Records removed by this pass
    pub evicted: usize,
    /// Records left in the store afterwards
    pub remaining: usize,
}

/// The fixed-window rate limiter.
///
/// Owns its window store exclusively; construct one per process (or per test)
/// and share it behind an `Arc`.
pub struct RateLimiter {
    /// Registered rules
    rules: RuleSet,
    /// Counter records indexed by rule and identity
    store: WindowStore,
    /// Time source
    clock: Arc<dyn Clock>,
    /// Idle windows before a record is evictable
    grace_multiple: u64,
}

impl RateLimiter {
    /// Create a rate limiter over `rules` using the system clock.
    pub fn new(rules: RuleSet) -> Self {
        Self::with_clock(rules, Arc::new(SystemClock))
    }

    /// Create a rate limiter with an explicit time source.
    pub fn with_clock(rules: RuleSet, clock: Arc<dyn Clock>) -> Self {
        Self {
            rules,
            store: WindowStore::new(),
            clock,
            grace_multiple: DEFAULT_GRACE_MULTIPLE,
        }
    }

    /// Set how many windows a record may sit idle before it is evictable.
    pub fn with_grace_multiple(mut self, grace_multiple: u64) -> Self {
        self.grace_multiple = grace_multiple.max(1);
        self
    }

    /// Check and count one request from `identity` against the rule `rule_name`.
    ///
    /// Fails only when the rule is unknown. A throttled request is an `Ok`
    /// decision with `allowed == false`.
    pub fn check(&self, identity: &str, rule_name: &str) -> Result<Decision> {
        self.check_at(identity, rule_name, self.clock.now_ms())
    }

    /// [`check`](Self::check) at an explicit time.
    pub fn check_at(&self, identity: &str, rule_name: &str, now: u64) -> Result<Decision> {
        // Resolve before touching the store so an unknown rule leaves no record.
        let rule = self.rules.get(rule_name)?;
        let key = RateLimitKey::new(rule.name(), identity);

        trace!(key = %key, now = now, "Checking rate limit");

        let limit = rule.max_requests();
        let decision = self
            .store
            .with_record(key.clone(), now, rule.window_ms(), |record| {
                if record.is_future(now) {
                    warn!(
                        key = %key,
                        window_start = record.window_start(),
                        now = now,
                        "Window starts in the future, resetting"
                    );
                    record.reset(now);
                } else if record.is_expired(now) {
                    record.reset(now);
                }

                if record.count() >= limit {
                    Decision {
                        allowed: false,
                        limit,
                        remaining: 0,
                        retry_after_ms: Some(record.reset_at().saturating_sub(now)),
                        reset_at: record.reset_at(),
                    }
                } else {
                    record.admit();
                    Decision {
                        allowed: true,
                        limit,
                        remaining: limit - record.count(),
                        retry_after_ms: None,
                        reset_at: record.reset_at(),
                    }
                }
            });

        if !decision.allowed {
            debug!(
                key = %key,
                retry_after_ms = ?decision.retry_after_ms,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Drop up to `budget` stale records using the limiter's clock.
    pub fn sweep(&self, budget: usize) -> SweepReport {
        self.sweep_at(self.clock.now_ms(), budget)
    }

    /// [`sweep`](Self::sweep) at an explicit time.
    pub fn sweep_at(&self, now: u64, budget: usize) -> SweepReport {
        let evicted = self.store.evict(now, self.grace_multiple, budget);
        let report = SweepReport {
            evicted,
            remaining: self.store.len(),
        };

        if evicted > 0 {
            debug!(
                evicted = report.evicted,
                remaining = report.remaining,
                "Swept stale rate limit windows"
            );
        }

        report
    }

    /// The current record for `identity` under `rule_name`, without counting.
    ///
    /// An expired window is reported as `None`, matching what the next check
    /// would see.
    pub fn peek(&self, identity: &str, rule_name: &str) -> Result<Option<WindowRecord>> {
        let rule = self.rules.get(rule_name)?;
        let now = self.clock.now_ms();
        Ok(self
            .store
            .get(&RateLimitKey::new(rule.name(), identity))
            .filter(|record| record.is_live(now)))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Read-only view of the window store.
    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    /// Get the number of tracked keys.
    pub fn tracked_keys(&self) -> usize {
        self.store.len()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.store.clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RuleSet::presets())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FloodgateError;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::rules::RateLimitRule;

    fn limiter(window_ms: u64, max_requests: u64) -> RateLimiter {
        let rules =
            RuleSet::from_rules([RateLimitRule::new("test", window_ms, max_requests).unwrap()])
                .unwrap();
        RateLimiter::with_clock(rules, Arc::new(ManualClock::new(0)))
    }

    #[test]
    fn test_scenario_window_exhaustion() {
        let limiter = limiter(1000, 3);

        let remaining: Vec<u64> = (0..3)
            .map(|_| {
                let d = limiter.check_at("u1", "test", 0).unwrap();
                assert!(d.allowed);
                d.remaining
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter.check_at("u1", "test", 0).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after_ms, Some(1000));
        assert_eq!(denied.retry_after_secs(), Some(1));
    }

    #[test]
    fn test_scenario_boundary_starts_new_window() {
        let limiter = limiter(1000, 3);

        limiter.check_at("u1", "test", 0).unwrap();
        let d = limiter.check_at("u1", "test", 1000).unwrap();

        assert!(d.allowed);
        assert_eq!(d.remaining, 2);
        assert_eq!(d.reset_at, 2000);
        let record = limiter.store().get(&RateLimitKey::new("test", "u1")).unwrap();
        assert_eq!(record.count(), 1);
        assert_eq!(record.window_start(), 1000);
    }

    #[test]
    fn test_scenario_keys_are_isolated() {
        let limiter = limiter(1000, 3);

        for identity in ["u1", "u2"] {
            for _ in 0..3 {
                assert!(limiter.check_at(identity, "test", 0).unwrap().allowed);
            }
        }
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_scenario_unknown_rule_creates_nothing() {
        let limiter = limiter(1000, 3);

        let err = limiter.check_at("u1", "nope", 0).unwrap_err();
        assert!(matches!(err, FloodgateError::UnknownRule(_)));
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_denial_does_not_count() {
        let limiter = limiter(1000, 2);

        for _ in 0..10 {
            limiter.check_at("u1", "test", 100).unwrap();
        }
        let record = limiter.store().get(&RateLimitKey::new("test", "u1")).unwrap();
        assert_eq!(record.count(), 2);
    }

    #[test]
    fn test_retry_after_is_honoured() {
        let limiter = limiter(1000, 1);

        assert!(limiter.check_at("u1", "test", 250).unwrap().allowed);
        let denied = limiter.check_at("u1", "test", 600).unwrap();
        assert_eq!(denied.retry_after_ms, Some(650));
        assert_eq!(denied.reset_at, 1250);

        let retry = 600 + denied.retry_after_ms.unwrap();
        assert!(!limiter.check_at("u1", "test", retry - 1).unwrap().allowed);
        assert!(limiter.check_at("u1", "test", retry).unwrap().allowed);
    }

    #[test]
    fn test_remaining_decreases_monotonically() {
        let limiter = limiter(10_000, 50);

        let mut previous = None;
        for t in 0..50 {
            let d = limiter.check_at("u1", "test", t).unwrap();
            assert!(d.allowed);
            if let Some(prev) = previous {
                assert_eq!(d.remaining, prev - 1);
            }
            previous = Some(d.remaining);
        }
        assert_eq!(previous, Some(0));
    }

    #[test]
    fn test_clock_going_backwards_resets_window() {
        let limiter = limiter(1000, 1);

        assert!(limiter.check_at("u1", "test", 50_000).unwrap().allowed);
        assert!(!limiter.check_at("u1", "test", 50_500).unwrap().allowed);

        // The clock jumps back; the record would otherwise hold a window far
        // into the future.
        let d = limiter.check_at("u1", "test", 10_000).unwrap();
        assert!(d.allowed);
        assert_eq!(d.reset_at, 11_000);
    }

    #[test]
    fn test_check_uses_clock() {
        let clock = Arc::new(ManualClock::new(5_000));
        let rules = RuleSet::from_rules([RateLimitRule::new("test", 1000, 1).unwrap()]).unwrap();
        let limiter = RateLimiter::with_clock(rules, clock.clone());

        assert!(limiter.check("u1", "test").unwrap().allowed);
        assert!(!limiter.check("u1", "test").unwrap().allowed);

        clock.advance(1000);
        assert!(limiter.check("u1", "test").unwrap().allowed);
    }

    #[test]
    fn test_peek_does_not_mutate() {
        let clock = Arc::new(ManualClock::new(0));
        let rules = RuleSet::from_rules([RateLimitRule::new("test", 1000, 5).unwrap()]).unwrap();
        let limiter = RateLimiter::with_clock(rules, clock.clone());

        assert_eq!(limiter.peek("u1", "test").unwrap(), None);
        limiter.check("u1", "test").unwrap();
        assert_eq!(limiter.peek("u1", "test").unwrap().map(|r| r.count()), Some(1));
        assert_eq!(limiter.peek("u1", "test").unwrap().map(|r| r.count()), Some(1));

        clock.advance(1000);
        assert_eq!(limiter.peek("u1", "test").unwrap(), None);
        assert!(limiter.peek("u1", "other").is_err());
    }

    #[test]
    fn test_sweep_drops_only_stale_records() {
        let limiter = limiter(1000, 3);

        limiter.check_at("old", "test", 0).unwrap();
        limiter.check_at("recent", "test", 1_500).unwrap();

        assert_eq!(limiter.sweep_at(1_999, 100).evicted, 0);

        let report = limiter.sweep_at(2_000, 100);
        assert_eq!(report, SweepReport { evicted: 1, remaining: 1 });
        assert!(limiter.store().get(&RateLimitKey::new("test", "recent")).is_some());
    }

    #[test]
    fn test_grace_multiple_is_configurable() {
        let limiter = limiter(1000, 3).with_grace_multiple(5);

        limiter.check_at("u1", "test", 0).unwrap();
        assert_eq!(limiter.sweep_at(4_999, 10).evicted, 0);
        assert_eq!(limiter.sweep_at(5_000, 10).evicted, 1);
    }

    #[test]
    fn test_concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(limiter(60_000, 500));

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = limiter.clone();
                    scope.spawn(move || {
                        (0..100)
                            .filter(|_| limiter.check_at("shared", "test", 10).unwrap().allowed)
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 500);
    }

    #[test]
    fn test_clear_counters() {
        let limiter = limiter(1000, 3);
        limiter.check_at("u1", "test", 0).unwrap();
        assert_eq!(limiter.tracked_keys(), 1);

        limiter.clear();
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
