//! Azure OpenAI chat-completions backend for the agent.

pub mod client;
pub mod config;
pub mod output;

pub use client::AzureOpenAiClient;
pub use config::OpenAiConfig;
pub use output::{ChatCompletionRequest, ChatCompletionResponse, Choice, TokenUsage};

/// Errors talking to the chat-completions endpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Response contained no choices")]
    EmptyResponse,
}

impl From<Error> for react_agent_core::Error {
    fn from(err: Error) -> Self {
        react_agent_core::Error::Provider(err.to_string())
    }
}
