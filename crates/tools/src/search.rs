//! Mock web search.

use async_trait::async_trait;
use tracing::debug;

use react_agent_core::{Tool, ToolArguments, ToolDefinition, ToolExecutionError, ToolParameter};

pub struct WebSearch {
    definition: ToolDefinition,
}

impl WebSearch {
    pub fn new() -> Self {
        Self {
            definition: ToolDefinition::function(
                "web_search",
                "Search the web for information. Returns relevant search results.",
            )
            .with_parameter(ToolParameter::required("query", "What to search for")),
        }
    }
}

impl Default for WebSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn call(&self, args: &ToolArguments) -> Result<String, ToolExecutionError> {
        let query = args.get("query").map(|q| q.trim()).unwrap_or_default();
        if query.is_empty() {
            return Err(ToolExecutionError::InvalidInput("query must not be empty".into()));
        }
        debug!(query = %query, "Searching");
        Ok([
            format!("Result 1: Information about '{query}' from Wikipedia - A comprehensive overview of the topic."),
            format!("Result 2: Latest news about '{query}' - Recent developments and updates."),
            format!("Result 3: Expert analysis on '{query}' - In-depth research and findings."),
        ]
        .join("\n"))
    }
}
