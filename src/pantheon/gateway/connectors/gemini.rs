//! Google Gemini connector, routed through the OpenAI-compatible transport (Gemini publishes an
//! OpenAI-compatible chat-completions endpoint alongside its native API).

use async_trait::async_trait;

use super::super::connector::{
    ConnectorBudget, ConnectorError, ConnectorMessage, ConnectorResponse, ProviderConnector,
};
use super::common::{chat_completion, SHARED_HTTP_CLIENT};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

pub struct GeminiConnector {
    client: openai_rust2::Client,
    model: String,
}

impl GeminiConnector {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn new_with_base_url(api_key: &str, model: impl Into<String>, base_url: &str) -> Self {
        GeminiConnector {
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
impl ProviderConnector for GeminiConnector {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn send(
        &self,
        messages: &[ConnectorMessage],
        budget: ConnectorBudget,
    ) -> Result<ConnectorResponse, ConnectorError> {
        chat_completion(&self.client, &self.model, messages, budget).await
    }
}
