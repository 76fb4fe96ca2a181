//! Server configuration from the environment.

use std::env;

use anyhow::{Context, Result};

use react_agent_core::AgentConfig;
use react_agent_openai::OpenAiConfig;

pub const DEFAULT_SERVICE_NAME: &str = "demo-agent-app";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub service_name: String,
    /// Set when `APPLICATIONINSIGHTS_CONNECTION_STRING` is present.
    pub telemetry_connection_string_set: bool,
    pub json_logs: bool,
    pub agent: AgentConfig,
    /// `None` when the model endpoint or key is missing.
    pub openai: Option<OpenAiConfig>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let agent = AgentConfig::from_env().context("Invalid agent configuration")?;
        let openai = OpenAiConfig::from_env().map(|c| c.with_deployment(agent.model.clone()));
        Ok(Self {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.into()),
            service_name: env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| DEFAULT_SERVICE_NAME.into()),
            telemetry_connection_string_set: env::var("APPLICATIONINSIGHTS_CONNECTION_STRING")
                .is_ok_and(|v| !v.is_empty()),
            json_logs: env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")),
            agent,
            openai,
        })
    }
}
