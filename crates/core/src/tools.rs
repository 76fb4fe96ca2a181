//! Tool definitions and the read-only tool registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::{ToolErrorKind, ToolResult};

/// String-typed tool arguments.
pub type ToolArguments = BTreeMap<String, String>;

/// A declared input of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ToolParameter {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, description)
        }
    }
}

/// Name, description and input schema of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    /// Shown to the model in the prompt.
    pub description: String,
    /// Reported as `gen_ai.tool.type`.
    pub tool_type: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    pub fn function(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tool_type: "function".into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Parameter that receives plain-text input.
    pub fn primary_parameter(&self) -> Option<&str> {
        self.parameters.first().map(|p| p.name.as_str())
    }

    fn missing_required(&self, args: &ToolArguments) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| p.required && !args.contains_key(&p.name))
            .map(|p| p.name.as_str())
            .collect()
    }
}

/// Error raised by a tool implementation.
#[derive(Debug, thiserror::Error)]
pub enum ToolExecutionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Failed(String),
}

/// A named capability the agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    async fn call(&self, args: &ToolArguments) -> Result<String, ToolExecutionError>;
}

/// Fixed set of tools, read-only once built.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    timeout: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: Vec::new(),
            timeout,
        }
    }

    /// Add a tool. A later tool with the same name replaces the earlier one.
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name.clone();
        self.tools.retain(|t| t.definition().name != name);
        self.tools.push(tool);
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|t| t.definition().name == name)
            .cloned()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.iter().map(|t| t.definition())
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions().map(|d| d.name.as_str()).collect()
    }

    /// `name: description` lines for the prompt.
    pub fn describe(&self) -> String {
        self.definitions()
            .map(|d| format!("{}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Run a tool under the registry timeout. Never fails: errors become a
    /// failed [`ToolResult`].
    pub async fn invoke(&self, tool: &dyn Tool, args: &ToolArguments) -> ToolResult {
        let definition = tool.definition();
        let started = Instant::now();

        let missing = definition.missing_required(args);
        if !missing.is_empty() {
            warn!(tool = %definition.name, missing = ?missing, "Missing required tool arguments");
            return ToolResult::failed(
                &definition.name,
                ToolErrorKind::Execution,
                format!("missing required argument(s): {}", missing.join(", ")),
                started.elapsed(),
            );
        }

        debug!(tool = %definition.name, args = ?args, "Invoking tool");
        match tokio::time::timeout(self.timeout, tool.call(args)).await {
            Ok(Ok(output)) => ToolResult::succeeded(&definition.name, output, started.elapsed()),
            Ok(Err(e)) => {
                warn!(tool = %definition.name, error = %e, "Tool execution failed");
                ToolResult::failed(
                    &definition.name,
                    ToolErrorKind::Execution,
                    e.to_string(),
                    started.elapsed(),
                )
            }
            Err(_) => {
                warn!(tool = %definition.name, timeout_ms = self.timeout.as_millis() as u64, "Tool timed out");
                ToolResult::failed(
                    &definition.name,
                    ToolErrorKind::Timeout,
                    format!("{} timed out after {:?}", definition.name, self.timeout),
                    started.elapsed(),
                )
            }
        }
    }
}
