//! Run state management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;
use crate::config::AgentConfig;

/// Unique identifier for a single agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current state of the ReAct loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Run created, user message not yet seeded.
    #[default]
    Started,
    /// Waiting on the reasoning step executor.
    Reasoning,
    /// Waiting on a tool.
    ActingOnTool,
    /// Run produced an answer.
    Finished,
    /// Run gave up without an answer.
    Aborted,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }

    pub fn can_transition_to(&self, next: LoopState) -> bool {
        use LoopState::*;
        matches!(
            (self, next),
            (Started, Reasoning)
                | (Reasoning, Reasoning)
                | (Reasoning, ActingOnTool)
                | (Reasoning, Finished)
                | (Reasoning, Aborted)
                | (ActingOnTool, Reasoning)
        )
    }
}

/// Token usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Complete state of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunContext {
    pub run_id: RunId,
    pub agent_name: String,
    pub agent_id: Option<String>,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub usage: Usage,
    /// Number of reasoning steps started.
    pub iteration: u32,
    /// Number of tools actually executed.
    pub tool_calls: u32,
    pub state: LoopState,
    /// Reason for an aborted run.
    pub error: Option<String>,
}

impl AgentRunContext {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            run_id: RunId::new(),
            agent_name: config.agent_name.clone(),
            agent_id: config.agent_id.clone(),
            model: config.model.clone(),
            started_at: Utc::now(),
            finished_at: None,
            usage: Usage::default(),
            iteration: 0,
            tool_calls: 0,
            state: LoopState::Started,
            error: None,
        }
    }

    /// Move to `next`, rejecting transitions the loop never makes.
    pub fn advance(&mut self, next: LoopState) -> Result<(), Error> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn set_aborted(&mut self, reason: impl Into<String>) -> Result<(), Error> {
        self.advance(LoopState::Aborted)?;
        self.error = Some(reason.into());
        Ok(())
    }

    pub fn begin_iteration(&mut self) -> u32 {
        self.iteration += 1;
        self.iteration
    }

    pub fn record_usage(&mut self, usage: Usage) {
        self.usage.add(usage);
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }
}
