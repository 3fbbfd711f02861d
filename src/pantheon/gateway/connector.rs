//! Provider-agnostic connector trait and the request/response types every connector speaks.
//!
//! A minimal async surface that hides vendor wire formats behind one `send` method, plus a name
//! used for rate limiting, breaker naming, and telemetry component labels.

use async_trait::async_trait;
use std::error::Error;

/// A single chat turn sent to a provider.
#[derive(Debug, Clone)]
pub struct ConnectorMessage {
    pub role: ConnectorRole,
    pub content: String,
}

/// Role of a [`ConnectorMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorRole {
    System,
    User,
    Assistant,
}

/// Token accounting returned by a provider call, when available.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectorUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ConnectorUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Bound on how many tokens a single call may consume, scaled by [`crate::pantheon::resilience::Magic`]
/// acorn boosts before the call is placed.
#[derive(Debug, Clone, Copy)]
pub struct ConnectorBudget {
    pub max_tokens: u64,
}

/// Outcome of one provider call.
#[derive(Debug, Clone)]
pub struct ConnectorResponse {
    pub content: String,
    pub usage: ConnectorUsage,
}

/// A connector-reported failure, classified so the gateway can decide whether to retry.
#[derive(Debug)]
pub enum ConnectorError {
    /// Network/5xx/timeout-style failure a retry is likely to resolve.
    Transient(String),
    /// 4xx-style failure a retry will not resolve (bad request, auth, malformed payload).
    Permanent(String),
}

impl std::fmt::Display for ConnectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorError::Transient(msg) => write!(f, "transient provider error: {msg}"),
            ConnectorError::Permanent(msg) => write!(f, "permanent provider error: {msg}"),
        }
    }
}

impl Error for ConnectorError {}

impl ConnectorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Transient(_))
    }
}

/// Vendor-specific chat transport. Every connector in `connectors/` implements this by
/// delegating to the shared OpenAI-compatible transport under a vendor-specific base URL.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Stable provider name used for rate limiting, breaker naming, and telemetry labels.
    fn name(&self) -> &str;

    /// Send `messages` and return the assistant's reply, honoring `budget` as a soft cap on
    /// requested completion tokens.
    async fn send(
        &self,
        messages: &[ConnectorMessage],
        budget: ConnectorBudget,
    ) -> Result<ConnectorResponse, ConnectorError>;
}
