//! HTTP front end for the agent.

pub mod config;
pub mod routes;

pub use config::ServerConfig;
pub use routes::{Agent, AppError, AppState, ConfigInfo, router};

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use react_agent_core::{AgentSession, ModelReasoner, ReasoningExecutor, SpanEmitter};
use react_agent_openai::AzureOpenAiClient;
use react_agent_tools::builtin_registry;

/// Build the agent, or `None` when no model is configured.
pub fn build_agent(config: &ServerConfig) -> Result<Option<Arc<Agent>>> {
    let Some(openai) = config.openai.clone() else {
        warn!("AZURE_OPENAI_ENDPOINT or AZURE_OPENAI_API_KEY not set, chat is disabled");
        return Ok(None);
    };

    let client = AzureOpenAiClient::new(openai).context("Failed to build Azure OpenAI client")?;
    let reasoner: Box<dyn ReasoningExecutor> =
        Box::new(ModelReasoner::new(client).with_malformed_retries(config.agent.malformed_retries));
    let tools = builtin_registry(config.agent.tool_timeout);

    Ok(Some(Arc::new(AgentSession::new(
        config.agent.clone(),
        reasoner,
        Arc::new(tools),
        Arc::new(SpanEmitter::default()),
    ))))
}
