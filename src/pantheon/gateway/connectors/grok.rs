//! xAI Grok connector, routed through the OpenAI-compatible transport.

use async_trait::async_trait;

use super::super::connector::{
    ConnectorBudget, ConnectorError, ConnectorMessage, ConnectorResponse, ProviderConnector,
};
use super::common::{chat_completion, SHARED_HTTP_CLIENT};

const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";

pub struct GrokConnector {
    client: openai_rust2::Client,
    model: String,
}

impl GrokConnector {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn new_with_base_url(api_key: &str, model: impl Into<String>, base_url: &str) -> Self {
        GrokConnector {
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
impl ProviderConnector for GrokConnector {
    fn name(&self) -> &str {
        "grok"
    }

    async fn send(
        &self,
        messages: &[ConnectorMessage],
        budget: ConnectorBudget,
    ) -> Result<ConnectorResponse, ConnectorError> {
        chat_completion(&self.client, &self.model, messages, budget).await
    }
}
