//! Named circuit breakers guarding providers and internal components.
//!
//! Each breaker is an independent closed/open/half-open state machine with its own failure
//! threshold and recovery timeout. State transitions are linearizable per breaker: every
//! transition happens under that breaker's own mutex, never a crate-wide lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::pantheon::error::PantheonError;

/// Where a breaker currently sits in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Failure threshold and recovery timeout for one breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

/// The four breakers recognised by name throughout the gateway, with their default configs.
pub mod defaults {
    use super::BreakerConfig;
    use std::time::Duration;

    pub const OUTBOUND_PROVIDER: &str = "outbound_provider";
    pub const PERSISTENCE: &str = "persistence";
    pub const AGENT_COORDINATOR: &str = "agent_coordinator";
    pub const TOOL_CALL: &str = "tool_call";

    pub fn outbound_provider() -> BreakerConfig {
        BreakerConfig { failure_threshold: 3, recovery_timeout: Duration::from_secs(30) }
    }
    pub fn persistence() -> BreakerConfig {
        BreakerConfig { failure_threshold: 5, recovery_timeout: Duration::from_secs(60) }
    }
    pub fn agent_coordinator() -> BreakerConfig {
        BreakerConfig { failure_threshold: 2, recovery_timeout: Duration::from_secs(15) }
    }
    pub fn tool_call() -> BreakerConfig {
        BreakerConfig { failure_threshold: 3, recovery_timeout: Duration::from_secs(45) }
    }
}

struct BreakerInner {
    state: BreakerState,
    config: BreakerConfig,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl BreakerInner {
    fn new(config: BreakerConfig) -> Self {
        BreakerInner { state: BreakerState::Closed, config, consecutive_failures: 0, opened_at: None }
    }

    /// Move `open -> half-open` if the recovery timeout has elapsed. Called lazily before every
    /// read or transition so the breaker never needs a background timer.
    fn refresh(&mut self) {
        if self.state == BreakerState::Open {
            if let Some(opened_at) = self.opened_at {
                if Instant::now() >= opened_at + self.config.recovery_timeout {
                    self.state = BreakerState::HalfOpen;
                }
            }
        }
    }

    fn on_success(&mut self) {
        self.refresh();
        self.state = BreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    fn on_failure(&mut self) {
        self.refresh();
        match self.state {
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
                self.consecutive_failures = self.config.failure_threshold;
            }
            BreakerState::Closed | BreakerState::Open => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
        }
    }

    fn allow_call(&mut self) -> bool {
        self.refresh();
        self.state != BreakerState::Open
    }
}

/// Named set of circuit breakers, one mutex per breaker so unrelated breakers never contend.
pub struct BreakerSet {
    breakers: Mutex<HashMap<String, BreakerInner>>,
}

impl BreakerSet {
    /// Construct the set pre-populated with the four well-known breakers at their default
    /// configs.
    pub fn with_defaults() -> Self {
        let mut breakers = HashMap::new();
        breakers.insert(defaults::OUTBOUND_PROVIDER.to_string(), BreakerInner::new(defaults::outbound_provider()));
        breakers.insert(defaults::PERSISTENCE.to_string(), BreakerInner::new(defaults::persistence()));
        breakers.insert(defaults::AGENT_COORDINATOR.to_string(), BreakerInner::new(defaults::agent_coordinator()));
        breakers.insert(defaults::TOOL_CALL.to_string(), BreakerInner::new(defaults::tool_call()));
        BreakerSet { breakers: Mutex::new(breakers) }
    }

    /// Register (or reconfigure) a breaker under `name`.
    pub fn configure(&self, name: &str, config: BreakerConfig) {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        breakers.insert(name.to_string(), BreakerInner::new(config));
    }

    fn with_breaker<T>(&self, name: &str, f: impl FnOnce(&mut BreakerInner) -> T) -> T {
        let mut breakers = self.breakers.lock().expect("breaker lock poisoned");
        let entry = breakers
            .entry(name.to_string())
            .or_insert_with(|| BreakerInner::new(defaults::outbound_provider()));
        f(entry)
    }

    /// Current state of `name`, advancing `open -> half-open` if the timeout has elapsed.
    pub fn state(&self, name: &str) -> BreakerState {
        self.with_breaker(name, |b| {
            b.refresh();
            b.state
        })
    }

    /// Guard a call through the breaker: short-circuits with `BreakerOpen` if the breaker is
    /// open, otherwise runs `f` and records the outcome.
    pub async fn call<T, F, Fut>(&self, name: &str, f: F) -> Result<T, PantheonError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, PantheonError>>,
    {
        let allowed = self.with_breaker(name, |b| b.allow_call());
        if !allowed {
            return Err(PantheonError::BreakerOpen { breaker: name.to_string() });
        }

        match f().await {
            Ok(value) => {
                self.record_success(name);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(name);
                Err(err)
            }
        }
    }

    /// Record a success against `name` without routing a call through [`BreakerSet::call`].
    pub fn record_success(&self, name: &str) {
        self.with_breaker(name, |b| b.on_success());
    }

    /// Record a failure against `name` without routing a call through [`BreakerSet::call`].
    pub fn record_failure(&self, name: &str) {
        self.with_breaker(name, |b| b.on_failure());
    }
}

impl Default for BreakerSet {
    fn default() -> Self {
        Self::with_defaults()
    }
}
