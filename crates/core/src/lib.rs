//! Core ReAct loop, tool registry and GenAI tracing for the conversational agent.

pub mod config;
pub mod controller;
pub mod event;
pub mod reasoning;
pub mod scratchpad;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod tools;

pub use config::AgentConfig;
pub use controller::{AgentController, FinishReason, LoopReport, RunOutcome};
pub use event::{ConversationTurn, Role, ToolErrorKind, ToolInvocationIntent, ToolResult, TurnId};
pub use reasoning::{
    ChatMessage, ChatModel, ChatRole, Completion, ModelReasoner, ParsedResponse, Reasoning,
    ReasoningExecutor, StepOutput, StepRequest, parse_response,
};
pub use scratchpad::Scratchpad;
pub use session::{AgentReply, AgentSession, RunStatus, SessionError};
pub use state::{AgentRunContext, LoopState, RunId, Usage};
pub use telemetry::{
    AttributeValue, CompositeSink, InMemorySink, SpanEmitter, SpanGuard, SpanId, SpanKind,
    SpanRecord, SpanSink, SpanStatus, TracingSink,
};
pub use tools::{
    Tool, ToolArguments, ToolDefinition, ToolExecutionError, ToolParameter, ToolRegistry,
};

/// Error types for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Model provider error: {0}")]
    Provider(String),

    #[error("Invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: LoopState, to: LoopState },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}
