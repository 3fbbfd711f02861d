//! OpenAI Chat Completions connector.

use async_trait::async_trait;

use super::super::connector::{
    ConnectorBudget, ConnectorError, ConnectorMessage, ConnectorResponse, ProviderConnector,
};
use super::common::{chat_completion, SHARED_HTTP_CLIENT};

pub struct OpenAiConnector {
    client: openai_rust2::Client,
    model: String,
}

impl OpenAiConnector {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        OpenAiConnector {
            client: openai_rust2::Client::new_with_client(api_key, SHARED_HTTP_CLIENT.clone()),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ProviderConnector for OpenAiConnector {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send(
        &self,
        messages: &[ConnectorMessage],
        budget: ConnectorBudget,
    ) -> Result<ConnectorResponse, ConnectorError> {
        chat_completion(&self.client, &self.model, messages, budget).await
    }
}
