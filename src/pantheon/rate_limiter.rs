//! Per-provider token-bucket rate limiting across minute/hour/day tiers.
//!
//! Each provider gets three independently refilling buckets. `acquire` only succeeds when all
//! three have at least one token available; otherwise it waits for whichever bucket regenerates
//! soonest, up to the caller's deadline, and times out rather than erroring.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// One tier's configuration: capacity and refill window.
#[derive(Debug, Clone, Copy)]
struct Tier {
    capacity: f64,
    window: Duration,
    tokens: f64,
    last_refill: Instant,
}

impl Tier {
    fn new(capacity: f64, window: Duration) -> Self {
        Tier {
            capacity,
            window,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Continuously refill based on elapsed wall-clock time, capped at capacity.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        let rate = self.capacity / self.window.as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Seconds until at least one token is available.
    fn wait_for_one(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let rate = self.capacity / self.window.as_secs_f64();
        let deficit = 1.0 - self.tokens;
        Duration::from_secs_f64(deficit / rate)
    }
}

/// Per-tier capacities for a provider. Defaults: 60/minute, 1000/hour, 10000/day.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub per_minute: u32,
    pub per_hour: u32,
    pub per_day: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            per_minute: 60,
            per_hour: 1000,
            per_day: 10000,
        }
    }
}

struct Buckets {
    minute: Tier,
    hour: Tier,
    day: Tier,
}

impl Buckets {
    fn new(config: RateLimitConfig) -> Self {
        Buckets {
            minute: Tier::new(config.per_minute as f64, Duration::from_secs(60)),
            hour: Tier::new(config.per_hour as f64, Duration::from_secs(3600)),
            day: Tier::new(config.per_day as f64, Duration::from_secs(86400)),
        }
    }

    fn refill_all(&mut self) {
        self.minute.refill();
        self.hour.refill();
        self.day.refill();
    }

    /// Attempt to take one token from each tier. Returns `true` and debits all three tiers on
    /// success; leaves state untouched on failure.
    fn try_take(&mut self) -> bool {
        self.refill_all();
        if self.minute.tokens >= 1.0 && self.hour.tokens >= 1.0 && self.day.tokens >= 1.0 {
            self.minute.tokens -= 1.0;
            self.hour.tokens -= 1.0;
            self.day.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Longest of the three per-tier wait times (the binding constraint).
    fn soonest_wait(&mut self) -> Duration {
        self.refill_all();
        self.minute
            .wait_for_one()
            .max(self.hour.wait_for_one())
            .max(self.day.wait_for_one())
    }
}

/// Snapshot of a provider's current bucket levels, for status reporting.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub minute_tokens: f64,
    pub hour_tokens: f64,
    pub day_tokens: f64,
}

/// Rate limiter holding one bucket set per registered provider, each behind its own mutex.
pub struct RateLimiter {
    providers: Mutex<HashMap<String, Buckets>>,
    default_config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter that falls back to `default_config` for any provider not explicitly
    /// configured via [`RateLimiter::configure`].
    pub fn new(default_config: RateLimitConfig) -> Self {
        RateLimiter {
            providers: Mutex::new(HashMap::new()),
            default_config,
        }
    }

    /// Explicitly size the buckets for `provider`, replacing any existing state.
    pub fn configure(&self, provider: &str, config: RateLimitConfig) {
        let mut providers = self.providers.lock().expect("rate limiter lock poisoned");
        providers.insert(provider.to_string(), Buckets::new(config));
    }

    fn ensure_provider<'a>(
        &self,
        providers: &'a mut HashMap<String, Buckets>,
        provider: &str,
    ) -> &'a mut Buckets {
        providers
            .entry(provider.to_string())
            .or_insert_with(|| Buckets::new(self.default_config))
    }

    /// Try to acquire one token per tier for `provider`, waiting up to `max_wait` if none is
    /// immediately available. Returns `true` on success, `false` on timeout — the gateway maps
    /// a `false` result to `PantheonError::RateLimited`.
    pub async fn acquire(&self, provider: &str, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            let wait = {
                let mut providers = self.providers.lock().expect("rate limiter lock poisoned");
                let buckets = self.ensure_provider(&mut providers, provider);
                if buckets.try_take() {
                    return true;
                }
                buckets.soonest_wait()
            };

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let remaining = deadline - now;
            sleep(wait.min(remaining)).await;
            if Instant::now() >= deadline {
                // One last attempt in case refill landed exactly on the deadline.
                let mut providers = self.providers.lock().expect("rate limiter lock poisoned");
                let buckets = self.ensure_provider(&mut providers, provider);
                return buckets.try_take();
            }
        }
    }

    /// Current bucket levels for `provider`, for diagnostics/status endpoints.
    pub fn status(&self, provider: &str) -> RateLimitStatus {
        let mut providers = self.providers.lock().expect("rate limiter lock poisoned");
        let buckets = self.ensure_provider(&mut providers, provider);
        buckets.refill_all();
        RateLimitStatus {
            minute_tokens: buckets.minute.tokens,
            hour_tokens: buckets.hour.tokens,
            day_tokens: buckets.day.tokens,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_n_requests_within_capacity_succeed_immediately() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        limiter.configure("echo", RateLimitConfig { per_minute: 2, per_hour: 1000, per_day: 10000 });

        assert!(limiter.acquire("echo", Duration::from_millis(100)).await);
        assert!(limiter.acquire("echo", Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn third_request_over_minute_cap_times_out() {
        let limiter = RateLimiter::new(RateLimitConfig::default());
        limiter.configure("echo", RateLimitConfig { per_minute: 2, per_hour: 1000, per_day: 10000 });

        assert!(limiter.acquire("echo", Duration::from_millis(50)).await);
        assert!(limiter.acquire("echo", Duration::from_millis(50)).await);
        assert!(!limiter.acquire("echo", Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn unconfigured_provider_uses_default_capacity() {
        let limiter = RateLimiter::default();
        assert!(limiter.acquire("anything", Duration::from_millis(50)).await);
        let status = limiter.status("anything");
        assert!(status.minute_tokens < 60.0);
    }
}
