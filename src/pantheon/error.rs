//! The closed set of failure kinds the core can raise.
//!
//! Every public operation across the bus, gateway, resilience layer, and coordinator returns
//! `Result<T, PantheonError>`. The connector boundary is the one place a foreign
//! `Box<dyn std::error::Error>` is allowed to exist (see
//! [`crate::pantheon::gateway::connector::ProviderConnector`]); it is converted into
//! [`PantheonError::ProviderUnavailable`] or [`PantheonError::ProviderMalformed`] before it
//! leaves the gateway.

use std::fmt;

/// The thirteen failure kinds recognised by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum PantheonError {
    /// The bus has no participant registered under the given name.
    UnknownRecipient(String),
    /// A `Bus::request` deadline elapsed before a reply arrived.
    RequestTimeout,
    /// A cooperative cancellation signal was observed.
    Cancelled,
    /// A bounded queue dropped the lowest-priority oldest message. Never raised to a caller —
    /// surfaced only via a telemetry counter — but kept in the enum so components can log it
    /// uniformly.
    QueueOverflow { participant: String },
    /// No provider is registered under the requested name.
    ProviderNotFound(String),
    /// The rate limiter did not grant a token within the caller's wait budget.
    RateLimited { provider: String },
    /// All retries, plus the post-heal retry, failed.
    ProviderUnavailable { provider: String, reason: String },
    /// The provider replied but the response could not be parsed.
    ProviderMalformed { provider: String, reason: String },
    /// A circuit breaker short-circuited the call.
    BreakerOpen { breaker: String },
    /// Both the primary and fallback stores failed.
    StoreUnavailable(String),
    /// A budget debit would exceed the task's limit.
    BudgetExhausted { task_id: String, requested: u64, remaining: u64 },
    /// A permission evaluation scored below the grant threshold.
    PermissionDenied { agent_id: String, resource_kind: String, score: f64 },
    /// A blackboard key did not carry the required `task:` or `agent:` prefix.
    ForbiddenKey(String),
}

impl fmt::Display for PantheonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PantheonError::UnknownRecipient(name) => {
                write!(f, "no participant registered under name '{name}'")
            }
            PantheonError::RequestTimeout => write!(f, "request timed out waiting for a reply"),
            PantheonError::Cancelled => write!(f, "operation was cancelled"),
            PantheonError::QueueOverflow { participant } => {
                write!(f, "queue overflow dropped a message for '{participant}'")
            }
            PantheonError::ProviderNotFound(name) => {
                write!(f, "no provider registered under name '{name}'")
            }
            PantheonError::RateLimited { provider } => {
                write!(f, "rate limit wait exceeded for provider '{provider}'")
            }
            PantheonError::ProviderUnavailable { provider, reason } => {
                write!(f, "provider '{provider}' unavailable after retries: {reason}")
            }
            PantheonError::ProviderMalformed { provider, reason } => {
                write!(f, "provider '{provider}' returned an unparseable reply: {reason}")
            }
            PantheonError::BreakerOpen { breaker } => {
                write!(f, "circuit breaker '{breaker}' is open")
            }
            PantheonError::StoreUnavailable(reason) => {
                write!(f, "both store backends are unavailable: {reason}")
            }
            PantheonError::BudgetExhausted { task_id, requested, remaining } => {
                write!(
                    f,
                    "task '{task_id}' budget exhausted: requested {requested}, {remaining} remaining"
                )
            }
            PantheonError::PermissionDenied { agent_id, resource_kind, score } => {
                write!(
                    f,
                    "permission denied for agent '{agent_id}' on resource '{resource_kind}' (score {score:.2})"
                )
            }
            PantheonError::ForbiddenKey(key) => {
                write!(f, "blackboard key '{key}' lacks a task:/agent: prefix")
            }
        }
    }
}

impl std::error::Error for PantheonError {}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PantheonError>;
