//! Turn types for the agent scratchpad.
//!
//! Turns flow between the agent and its tools:
//! - User turns: the question being answered
//! - Agent turns: reasoning text, optionally carrying a tool invocation
//! - Tool turns: observations produced by executing a tool

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    Tool,
}

/// A request from the model to run a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocationIntent {
    pub tool: String,
    pub arguments: BTreeMap<String, String>,
    /// Reasoning text that preceded the action.
    pub thought: String,
}

impl ToolInvocationIntent {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            arguments: BTreeMap::new(),
            thought: String::new(),
        }
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = thought.into();
        self
    }

    /// Render the invocation back into ReAct text form.
    pub fn to_react_text(&self) -> String {
        let input = serde_json::to_string(&self.arguments).unwrap_or_else(|_| "{}".into());
        let mut text = String::new();
        if !self.thought.is_empty() {
            text.push_str(&self.thought);
            text.push('\n');
        }
        text.push_str(&format!("Action: {}\nAction Input: {}", self.tool, input));
        text
    }
}

/// Failure classes for a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    NotFound,
    Execution,
    Timeout,
}

impl ToolErrorKind {
    /// Stable error code, also used as the `error.type` span attribute.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "tool_not_found",
            Self::Execution => "tool_execution_error",
            Self::Timeout => "tool_timeout",
        }
    }
}

/// Outcome of a single tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    /// Result text on success, error text on failure.
    pub output: String,
    pub error: Option<ToolErrorKind>,
    pub duration: Duration,
}

impl ToolResult {
    pub fn succeeded(tool_name: impl Into<String>, output: impl Into<String>, duration: Duration) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            output: output.into(),
            error: None,
            duration,
        }
    }

    pub fn failed(
        tool_name: impl Into<String>,
        kind: ToolErrorKind,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            output: message.into(),
            error: Some(kind),
            duration,
        }
    }

    /// Synthetic result for a tool name the registry does not know.
    pub fn not_found(tool_name: &str, available: &[&str]) -> Self {
        Self::failed(
            tool_name,
            ToolErrorKind::NotFound,
            format!(
                "{tool_name} is not a valid tool, try one of [{}].",
                available.join(", ")
            ),
            Duration::ZERO,
        )
    }

    /// Text fed back to the model as the observation.
    pub fn observation(&self) -> String {
        match self.error {
            None => self.output.clone(),
            Some(ToolErrorKind::NotFound) => self.output.clone(),
            Some(kind) => format!("Error ({}): {}", kind.code(), self.output),
        }
    }
}

/// A timestamped, immutable entry in the scratchpad.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    pub tool_call: Option<ToolInvocationIntent>,
}

impl ConversationTurn {
    fn new(role: Role, content: String, tool_call: Option<ToolInvocationIntent>) -> Self {
        Self {
            id: TurnId::new(),
            timestamp: Utc::now(),
            role,
            content,
            tool_call,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), None)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content.into(), None)
    }

    pub fn tool_call(intent: ToolInvocationIntent) -> Self {
        Self::new(Role::Agent, intent.to_react_text(), Some(intent))
    }

    pub fn observation(result: &ToolResult) -> Self {
        Self::new(Role::Tool, result.observation(), None)
    }
}
