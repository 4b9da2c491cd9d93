//! Per-identifier frequency limiting.
//!
//! Three strategies share one bookkeeping shape: a deque of request
//! timestamps pruned to the window on every check. Identifiers without a
//! configured limit are always allowed.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Limiting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Count requests in the window anchored at the current check.
    FixedWindow,
    /// Count requests in a window that always ends now; reset tracks the
    /// oldest stored request.
    SlidingWindow,
    /// Tokens refill continuously at `max_requests / window` up to the cap.
    TokenBucket,
}

/// Limit configuration for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub strategy: Strategy,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
            strategy: Strategy::SlidingWindow,
        }
    }
}

/// Outcome of a limit check. `remaining` is -1 for unlimited identifiers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub reset_after: Duration,
}

/// Aggregate counters across all identifiers.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LimiterStats {
    pub identifiers: usize,
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub block_rate: f64,
}

struct IdentifierData {
    config: LimitConfig,
    timestamps: VecDeque<Instant>,
    last_refill: Instant,
}

#[derive(Default)]
struct Inner {
    data: HashMap<String, IdentifierData>,
    total_requests: u64,
    blocked_requests: u64,
}

/// Thread-safe frequency limiter keyed by identifier string.
#[derive(Default)]
pub struct FrequencyLimiter {
    inner: Mutex<Inner>,
}

impl FrequencyLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the limit for an identifier. Existing request
    /// history is kept.
    pub fn set_limit(&self, identifier: &str, config: LimitConfig) {
        let mut inner = self.inner.lock().unwrap();
        let data = inner
            .data
            .entry(identifier.to_string())
            .or_insert_with(|| IdentifierData {
                config,
                timestamps: VecDeque::new(),
                last_refill: Instant::now(),
            });
        data.config = config;
    }

    /// Check and record a request for the identifier.
    pub fn check(&self, identifier: &str) -> LimitDecision {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        let Some(data) = inner.data.get_mut(identifier) else {
            // No configured limit.
            return LimitDecision {
                allowed: true,
                remaining: -1,
                reset_after: Duration::ZERO,
            };
        };

        prune_expired(data, now);
        let decision = match data.config.strategy {
            Strategy::FixedWindow => check_fixed_window(data, now),
            Strategy::SlidingWindow => check_sliding_window(data, now),
            Strategy::TokenBucket => check_token_bucket(data, now),
        };
        if decision.allowed {
            data.timestamps.push_back(now);
        } else {
            debug!(identifier, "request rate limited");
        }

        inner.total_requests += 1;
        if !decision.allowed {
            inner.blocked_requests += 1;
        }
        decision
    }

    /// Convenience wrapper returning only the allow/deny result.
    pub fn try_acquire(&self, identifier: &str) -> bool {
        self.check(identifier).allowed
    }

    /// Current standing without recording a request.
    pub fn status(&self, identifier: &str) -> LimitDecision {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        match inner.data.get_mut(identifier) {
            Some(data) => {
                prune_expired(data, now);
                match data.config.strategy {
                    Strategy::FixedWindow => check_fixed_window(data, now),
                    Strategy::SlidingWindow => check_sliding_window(data, now),
                    Strategy::TokenBucket => check_token_bucket(data, now),
                }
            }
            None => LimitDecision {
                allowed: true,
                remaining: -1,
                reset_after: Duration::ZERO,
            },
        }
    }

    /// Drop an identifier's configuration and history entirely.
    pub fn remove_limit(&self, identifier: &str) {
        self.inner.lock().unwrap().data.remove(identifier);
    }

    /// Clear recorded requests; `None` clears every identifier.
    pub fn reset(&self, identifier: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        match identifier {
            Some(id) => {
                if let Some(data) = inner.data.get_mut(id) {
                    data.timestamps.clear();
                }
            }
            None => inner.data.clear(),
        }
    }

    /// Drop timestamps that have aged out of their windows.
    pub fn cleanup(&self, identifier: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        match identifier {
            Some(id) => {
                if let Some(data) = inner.data.get_mut(id) {
                    prune_expired(data, now);
                }
            }
            None => {
                for data in inner.data.values_mut() {
                    prune_expired(data, now);
                }
            }
        }
    }

    pub fn stats(&self) -> LimiterStats {
        let inner = self.inner.lock().unwrap();
        let block_rate = if inner.total_requests > 0 {
            inner.blocked_requests as f64 / inner.total_requests as f64
        } else {
            0.0
        };
        LimiterStats {
            identifiers: inner.data.len(),
            total_requests: inner.total_requests,
            blocked_requests: inner.blocked_requests,
            block_rate,
        }
    }
}

fn prune_expired(data: &mut IdentifierData, now: Instant) {
    let window = data.config.window;
    while let Some(front) = data.timestamps.front() {
        if now.duration_since(*front) > window {
            data.timestamps.pop_front();
        } else {
            break;
        }
    }
}

fn check_fixed_window(data: &IdentifierData, _now: Instant) -> LimitDecision {
    let count = data.timestamps.len() as u32;
    LimitDecision {
        allowed: count < data.config.max_requests,
        remaining: data.config.max_requests.saturating_sub(count) as i64,
        reset_after: data.config.window,
    }
}

fn check_sliding_window(data: &IdentifierData, now: Instant) -> LimitDecision {
    let count = data.timestamps.len() as u32;
    let reset_after = data
        .timestamps
        .front()
        .map(|earliest| {
            data.config
                .window
                .saturating_sub(now.duration_since(*earliest))
        })
        .unwrap_or(Duration::ZERO);
    LimitDecision {
        allowed: count < data.config.max_requests,
        remaining: data.config.max_requests.saturating_sub(count) as i64,
        reset_after,
    }
}

fn check_token_bucket(data: &mut IdentifierData, now: Instant) -> LimitDecision {
    let window_ms = data.config.window.as_millis().max(1) as u64;
    let elapsed_ms = now.duration_since(data.last_refill).as_millis() as u64;
    let refilled = elapsed_ms * data.config.max_requests as u64 / window_ms;
    let tokens = refilled.min(data.config.max_requests as u64);
    data.last_refill = now;

    let ms_per_token = window_ms / data.config.max_requests.max(1) as u64;
    LimitDecision {
        allowed: tokens > 0,
        remaining: tokens as i64,
        reset_after: Duration::from_millis(ms_per_token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: u32, window_ms: u64, strategy: Strategy) -> LimitConfig {
        LimitConfig {
            max_requests: max,
            window: Duration::from_millis(window_ms),
            strategy,
        }
    }

    #[test]
    fn unknown_identifier_is_unlimited() {
        let limiter = FrequencyLimiter::new();
        let decision = limiter.check("anything");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, -1);
    }

    #[test]
    fn sliding_window_blocks_and_recovers() {
        let limiter = FrequencyLimiter::new();
        limiter.set_limit("rule-1", config(3, 1000, Strategy::SlidingWindow));

        // Five rapid checks: three allowed, two denied.
        let mut allowed = 0;
        for _ in 0..5 {
            if limiter.try_acquire("rule-1") {
                allowed += 1;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        assert_eq!(allowed, 3);

        // After the window slides past the early requests, we are allowed
        // again.
        std::thread::sleep(Duration::from_millis(700));
        assert!(limiter.try_acquire("rule-1"));
    }

    #[test]
    fn fixed_window_counts_against_max() {
        let limiter = FrequencyLimiter::new();
        limiter.set_limit("x", config(2, 60_000, Strategy::FixedWindow));
        assert!(limiter.check("x").allowed);
        let second = limiter.check("x");
        assert!(second.allowed);
        assert_eq!(second.remaining, 1);
        let third = limiter.check("x");
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
    }

    #[test]
    fn token_bucket_starts_empty_and_refills() {
        let limiter = FrequencyLimiter::new();
        // 10 tokens per 100 ms: one token every 10 ms.
        limiter.set_limit("x", config(10, 100, Strategy::TokenBucket));

        // Immediately after configuration nothing has refilled.
        assert!(!limiter.try_acquire("x"));
        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.try_acquire("x"));
    }

    #[test]
    fn status_does_not_record() {
        let limiter = FrequencyLimiter::new();
        limiter.set_limit("x", config(1, 60_000, Strategy::SlidingWindow));
        assert!(limiter.status("x").allowed);
        assert!(limiter.status("x").allowed);
        assert!(limiter.check("x").allowed);
        assert!(!limiter.status("x").allowed);
    }

    #[test]
    fn reset_clears_history() {
        let limiter = FrequencyLimiter::new();
        limiter.set_limit("x", config(1, 60_000, Strategy::SlidingWindow));
        assert!(limiter.try_acquire("x"));
        assert!(!limiter.try_acquire("x"));
        limiter.reset(Some("x"));
        assert!(limiter.try_acquire("x"));
    }

    #[test]
    fn stats_track_block_rate() {
        let limiter = FrequencyLimiter::new();
        limiter.set_limit("x", config(1, 60_000, Strategy::SlidingWindow));
        limiter.try_acquire("x");
        limiter.try_acquire("x");
        limiter.try_acquire("x");
        limiter.try_acquire("x");

        let stats = limiter.stats();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.blocked_requests, 3);
        assert!((stats.block_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(stats.identifiers, 1);
    }
}
