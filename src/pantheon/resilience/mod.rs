//! Circuit breakers and the Magic vitality/heal system.

pub mod breaker;
pub mod magic;

pub use breaker::{BreakerConfig, BreakerSet, BreakerState};
pub use magic::{HealStrategy, Magic, TokenBudgetConfig, TokenBudgeted};
