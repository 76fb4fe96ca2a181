//! Azure OpenAI connection settings.

use std::env;
use std::time::Duration;

pub const DEFAULT_DEPLOYMENT: &str = "gpt-4o";
pub const DEFAULT_API_VERSION: &str = "2024-10-21";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Connection settings for an Azure OpenAI deployment.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
    pub temperature: f32,
    /// Stop sequences; the model must not write its own observations.
    pub stop: Vec<String>,
    pub request_timeout: Duration,
    /// Retries for connection failures, timeouts, 429 and 5xx responses.
    pub max_retries: u32,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("endpoint", &self.endpoint)
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl OpenAiConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            deployment: DEFAULT_DEPLOYMENT.into(),
            api_version: DEFAULT_API_VERSION.into(),
            temperature: DEFAULT_TEMPERATURE,
            stop: vec!["\nObservation:".into()],
            request_timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }

    /// Read settings from the environment.
    ///
    /// Returns `None` unless both `AZURE_OPENAI_ENDPOINT` and
    /// `AZURE_OPENAI_API_KEY` are set.
    pub fn from_env() -> Option<Self> {
        let endpoint = env::var("AZURE_OPENAI_ENDPOINT").ok().filter(|v| !v.is_empty())?;
        let api_key = env::var("AZURE_OPENAI_API_KEY").ok().filter(|v| !v.is_empty())?;
        let mut config = Self::new(endpoint, api_key);
        if let Ok(deployment) = env::var("AZURE_OPENAI_DEPLOYMENT_NAME") {
            config.deployment = deployment;
        }
        if let Ok(api_version) = env::var("AZURE_OPENAI_API_VERSION") {
            config.api_version = api_version;
        }
        Some(config)
    }

    pub fn with_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.deployment = deployment.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn chat_completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let config = OpenAiConfig::new("https://demo.openai.azure.com/", "secret");
        assert_eq!(
            config.chat_completions_url(),
            "https://demo.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-10-21"
        );
    }

    #[test]
    fn test_debug_hides_key() {
        let config = OpenAiConfig::new("https://demo.openai.azure.com", "secret");
        assert!(!format!("{config:?}").contains("secret"));
    }
}
