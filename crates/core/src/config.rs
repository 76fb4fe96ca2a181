//! Agent configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

/// Runtime limits and identity for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Reported as `gen_ai.agent.name`.
    pub agent_name: String,
    /// Externally supplied resource id, reported as `gen_ai.agent.id`.
    pub agent_id: Option<String>,
    /// Model or deployment name, reported as `gen_ai.request.model`.
    pub model: String,
    /// Reported as `gen_ai.provider.name`.
    pub provider_name: String,
    /// Maximum number of reasoning steps per run.
    pub max_iterations: u32,
    /// Wall-clock budget for a whole run.
    pub max_duration: Duration,
    /// Per-call tool timeout.
    pub tool_timeout: Duration,
    /// Clarifying re-prompts issued for an unparseable model response.
    pub malformed_retries: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: "demo-agent".into(),
            agent_id: None,
            model: "gpt-4o".into(),
            provider_name: "azure.ai.openai".into(),
            max_iterations: 5,
            max_duration: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(10),
            malformed_retries: 1,
        }
    }
}

impl AgentConfig {
    /// Read configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, Error> {
        let defaults = Self::default();
        Ok(Self {
            agent_name: env::var("AGENT_NAME").unwrap_or(defaults.agent_name),
            agent_id: env::var("AGENT_ID").ok().filter(|id| !id.is_empty()),
            model: env::var("AZURE_OPENAI_DEPLOYMENT_NAME").unwrap_or(defaults.model),
            provider_name: env::var("GEN_AI_PROVIDER_NAME").unwrap_or(defaults.provider_name),
            max_iterations: parse_var("AGENT_MAX_ITERATIONS")?.unwrap_or(defaults.max_iterations),
            max_duration: parse_var("AGENT_MAX_DURATION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_duration),
            tool_timeout: parse_var("AGENT_TOOL_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.tool_timeout),
            malformed_retries: parse_var("AGENT_MALFORMED_RETRIES")?
                .unwrap_or(defaults.malformed_retries),
        })
    }

    pub fn with_agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = name.into();
        self
    }

    pub fn with_agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    pub fn with_tool_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self
    }

    pub fn with_malformed_retries(mut self, retries: u32) -> Self {
        self.malformed_retries = retries;
        self
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, Error> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(None),
    }
}

/// Blank values count as unset.
fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<Option<T>, Error> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| Error::Config(format!("{name} has invalid value '{raw}'")))
}
