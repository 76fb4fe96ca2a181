//! Built-in tools for the agent.

pub mod calculator;
pub mod search;
pub mod weather;

use std::time::Duration;

use react_agent_core::ToolRegistry;

pub use calculator::{Calculator, evaluate};
pub use search::WebSearch;
pub use weather::Weather;

/// Registry with `calculator`, `get_weather` and `web_search`.
pub fn builtin_registry(timeout: Duration) -> ToolRegistry {
    ToolRegistry::new(timeout)
        .with_tool(Calculator::new())
        .with_tool(Weather::new())
        .with_tool(WebSearch::new())
}
