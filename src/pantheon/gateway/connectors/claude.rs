//! Anthropic Claude connector, routed through the OpenAI-compatible transport.
//!
//! Delegates to the same [`openai_rust2::Client`] machinery as [`super::openai::OpenAiConnector`]
//! with a different base URL.

use async_trait::async_trait;

use super::super::connector::{
    ConnectorBudget, ConnectorError, ConnectorMessage, ConnectorResponse, ProviderConnector,
};
use super::common::{chat_completion, SHARED_HTTP_CLIENT};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

pub struct ClaudeConnector {
    client: openai_rust2::Client,
    model: String,
}

impl ClaudeConnector {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn new_with_base_url(api_key: &str, model: impl Into<String>, base_url: &str) -> Self {
        ClaudeConnector {
            client: openai_rust2::Client::new_with_client_and_base_url(
                api_key,
                SHARED_HTTP_CLIENT.clone(),
                base_url,
            ),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ProviderConnector for ClaudeConnector {
    fn name(&self) -> &str {
        "claude"
    }

    async fn send(
        &self,
        messages: &[ConnectorMessage],
        budget: ConnectorBudget,
    ) -> Result<ConnectorResponse, ConnectorError> {
        chat_completion(&self.client, &self.model, messages, budget).await
    }
}
