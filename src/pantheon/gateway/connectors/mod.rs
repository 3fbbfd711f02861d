//! Concrete provider connectors.

pub mod common;

pub mod claude;
pub mod echo;
pub mod gemini;
pub mod grok;
pub mod openai;

pub use claude::ClaudeConnector;
pub use echo::EchoConnector;
pub use gemini::GeminiConnector;
pub use grok::GrokConnector;
pub use openai::OpenAiConnector;
