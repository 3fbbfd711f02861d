//! Network-free connector used by tests and local development.
//!
//! Reverses the concatenated input content and reports zero token usage, so gateway and
//! coordinator tests can exercise the full send pipeline (admission, rate limiting, retries,
//! telemetry, persistence) without a live provider or mocked HTTP layer.

use async_trait::async_trait;

use super::super::connector::{
    ConnectorBudget, ConnectorError, ConnectorMessage, ConnectorResponse, ProviderConnector,
    ConnectorUsage,
};

pub struct EchoConnector {
    /// When set, `send` fails with a transient error this many times before succeeding, so
    /// retry/auto-heal paths can be exercised deterministically.
    fail_first_n: std::sync::atomic::AtomicU32,
}

impl EchoConnector {
    pub fn new() -> Self {
        EchoConnector { fail_first_n: std::sync::atomic::AtomicU32::new(0) }
    }

    /// Configure the connector to fail the next `n` calls with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.fail_first_n.store(n, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for EchoConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderConnector for EchoConnector {
    fn name(&self) -> &str {
        "echo"
    }

    async fn send(
        &self,
        messages: &[ConnectorMessage],
        _budget: ConnectorBudget,
    ) -> Result<ConnectorResponse, ConnectorError> {
        use std::sync::atomic::Ordering;
        let remaining = self.fail_first_n.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first_n.store(remaining - 1, Ordering::SeqCst);
            return Err(ConnectorError::Transient("echo: simulated failure".to_string()));
        }

        let combined: String = messages.iter().map(|m| m.content.as_str()).collect();
        let reversed: String = combined.chars().rev().collect();

        Ok(ConnectorResponse { content: reversed, usage: ConnectorUsage::default() })
    }
}
