//! HTTP client for Azure OpenAI chat completions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use react_agent_core::{ChatMessage, ChatModel, Completion};

use crate::Error;
use crate::config::OpenAiConfig;
use crate::output::{ApiErrorBody, ChatCompletionRequest, ChatCompletionResponse};

const INITIAL_BACKOFF_MS: u64 = 500;

/// Chat model backed by an Azure OpenAI deployment.
pub struct AzureOpenAiClient {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl AzureOpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    /// Send one chat-completions request.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatCompletionResponse, Error> {
        let url = self.config.chat_completions_url();
        let request = ChatCompletionRequest {
            messages,
            temperature: self.config.temperature,
            stop: &self.config.stop,
            max_tokens: None,
        };
        debug!(deployment = %self.config.deployment, messages = messages.len(), "Chat completion request");

        let mut attempt = 0;
        loop {
            let result = self
                .http
                .post(&url)
                .header("api-key", &self.config.api_key)
                .json(&request)
                .send()
                .await;

            let retryable = match &result {
                Ok(resp) => is_retryable_status(resp.status()),
                Err(err) => is_retryable(err),
            };
            if retryable && attempt < self.config.max_retries {
                let delay = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
                attempt += 1;
                warn!(
                    attempt,
                    max = self.config.max_retries,
                    delay_ms = delay,
                    "Retrying chat completion request"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                continue;
            }

            let resp = result?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::Api {
                    status: status.as_u16(),
                    message: ApiErrorBody::message_from(&body),
                });
            }

            let response: ChatCompletionResponse = resp.json().await?;
            info!(
                model = response.model.as_deref().unwrap_or_default(),
                finish_reason = response
                    .choices
                    .first()
                    .and_then(|c| c.finish_reason.as_deref())
                    .unwrap_or_default(),
                input_tokens = response.usage().input_tokens,
                output_tokens = response.usage().output_tokens,
                "Chat completion received"
            );
            return Ok(response);
        }
    }
}

#[async_trait]
impl ChatModel for AzureOpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, react_agent_core::Error> {
        let response = self.chat(messages).await?;
        Ok(response.into_completion().ok_or(Error::EmptyResponse)?)
    }
}

/// Timeouts and connection failures.
fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
