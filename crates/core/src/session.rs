//! Agent session facade: one call per user message.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info};

use crate::Error;
use crate::config::AgentConfig;
use crate::controller::{AgentController, FinishReason, RunOutcome};
use crate::reasoning::ReasoningExecutor;
use crate::state::{AgentRunContext, RunId, Usage};
use crate::telemetry::{SpanEmitter, SpanKind, SpanStatus, attributes, attrs, operations};
use crate::tools::ToolRegistry;

/// Answer shown to the user when the model never produced anything usable.
pub const FAILURE_ANSWER: &str = "Sorry, I couldn't come up with an answer to that. Please try rephrasing your question.";

/// How a run ended, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Answer is the model's raw text or a best-effort budget answer.
    Degraded,
    Failed,
}

/// Result of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub answer: String,
    pub usage: Usage,
    pub run_id: RunId,
    pub iterations: u32,
    pub status: RunStatus,
}

impl AgentReply {
    pub fn degraded(&self) -> bool {
        self.status == RunStatus::Degraded
    }

    pub fn failed(&self) -> bool {
        self.status == RunStatus::Failed
    }
}

/// Errors surfaced to callers of [`AgentSession`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model provider error: {0}")]
    Provider(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<Error> for SessionError {
    fn from(err: Error) -> Self {
        match err {
            Error::Provider(msg) => Self::Provider(msg),
            Error::Cancelled => Self::Cancelled,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Runs the agent for a single user message inside an `invoke_agent` span.
pub struct AgentSession<R> {
    config: AgentConfig,
    reasoner: R,
    tools: Arc<ToolRegistry>,
    emitter: Arc<SpanEmitter>,
}

impl<R: ReasoningExecutor> AgentSession<R> {
    pub fn new(config: AgentConfig, reasoner: R, tools: Arc<ToolRegistry>, emitter: Arc<SpanEmitter>) -> Self {
        Self {
            config,
            reasoner,
            tools,
            emitter,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub async fn run(&self, user_message: &str) -> Result<AgentReply, SessionError> {
        self.run_with_cancel(user_message, CancellationToken::new()).await
    }

    /// Run with a caller-owned cancellation token.
    pub async fn run_with_cancel(
        &self,
        user_message: &str,
        cancel: CancellationToken,
    ) -> Result<AgentReply, SessionError> {
        let message = user_message.trim();
        if message.is_empty() {
            return Err(SessionError::InvalidInput("message must not be empty".into()));
        }

        let context = AgentRunContext::new(&self.config);
        let run_id = context.run_id;

        let mut span_attributes = attrs([
            (attributes::OPERATION_NAME, operations::INVOKE_AGENT.into()),
            (attributes::AGENT_NAME, self.config.agent_name.as_str().into()),
            (attributes::REQUEST_MODEL, self.config.model.as_str().into()),
            (attributes::CONVERSATION_ID, run_id.to_string().into()),
        ]);
        if let Some(agent_id) = &self.config.agent_id {
            span_attributes.insert(attributes::AGENT_ID.into(), agent_id.as_str().into());
        }
        let mut span = self.emitter.begin(
            format!("{} {}", operations::INVOKE_AGENT, self.config.agent_name),
            SpanKind::Internal,
            span_attributes,
            None,
        );

        let controller = AgentController::new(context, &self.config, &self.reasoner, &self.tools, &self.emitter)
            .with_cancellation(cancel)
            .with_parent_span(span.id());

        let report = match controller
            .run(message)
            .instrument(span.tracing_span().clone())
            .await
        {
            Ok(report) => report,
            Err(Error::Cancelled) => {
                info!(run_id = %run_id, "Agent run cancelled");
                span.end(SpanStatus::Cancelled);
                return Err(SessionError::Cancelled);
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Agent run failed");
                let error_type = match e {
                    Error::Provider(_) => "provider_error",
                    _ => "internal_error",
                };
                span.set_attribute(attributes::ERROR_TYPE, error_type);
                span.end(SpanStatus::error(e.to_string()));
                return Err(e.into());
            }
        };

        let ctx = &report.context;
        span.set_attribute(attributes::USAGE_INPUT_TOKENS, ctx.usage.input_tokens);
        span.set_attribute(attributes::USAGE_OUTPUT_TOKENS, ctx.usage.output_tokens);
        span.set_attribute(attributes::AGENT_ITERATIONS, ctx.iteration);

        let (answer, status) = match report.outcome {
            RunOutcome::Finished { answer, reason } => {
                span.set_attribute(attributes::AGENT_FINISH_REASON, reason.as_str());
                span.end(SpanStatus::Ok);
                let status = match reason {
                    FinishReason::FinalAnswer => RunStatus::Completed,
                    FinishReason::Verbatim | FinishReason::BudgetExhausted => RunStatus::Degraded,
                };
                (answer, status)
            }
            RunOutcome::Aborted { reason } => {
                error!(run_id = %run_id, reason = %reason, "Agent run aborted");
                span.set_attribute(attributes::ERROR_TYPE, "reasoning_failure");
                span.end(SpanStatus::error(reason));
                (FAILURE_ANSWER.to_string(), RunStatus::Failed)
            }
        };

        info!(
            run_id = %run_id,
            iterations = ctx.iteration,
            tool_calls = ctx.tool_calls,
            input_tokens = ctx.usage.input_tokens,
            output_tokens = ctx.usage.output_tokens,
            total_tokens = ctx.usage.total(),
            status = ?status,
            "Agent run completed"
        );

        Ok(AgentReply {
            answer,
            usage: ctx.usage,
            run_id,
            iterations: ctx.iteration,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{Reasoning, StepOutput, StepRequest};
    use crate::telemetry::{AttributeValue, InMemorySink};
    use async_trait::async_trait;
    use std::time::Duration;

    enum Script {
        Answer(&'static str),
        Verbatim(&'static str),
        Malformed,
        ProviderDown,
    }

    struct ScriptedReasoner(Script);

    #[async_trait]
    impl ReasoningExecutor for ScriptedReasoner {
        async fn step(&self, _request: StepRequest<'_>) -> Result<StepOutput, Error> {
            let usage = Usage::new(10, 5);
            match &self.0 {
                Script::Answer(text) => Ok(StepOutput::new(Reasoning::FinalAnswer(text.to_string())).with_usage(usage)),
                Script::Verbatim(text) => {
                    let mut output = StepOutput::new(Reasoning::FinalAnswer(text.to_string())).with_usage(usage);
                    output.degraded = true;
                    Ok(output)
                }
                Script::Malformed => Ok(StepOutput::new(Reasoning::Malformed(String::new()))),
                Script::ProviderDown => Err(Error::Provider("503 Service Unavailable".into())),
            }
        }
    }

    fn session(script: Script, config: AgentConfig) -> (AgentSession<ScriptedReasoner>, Arc<InMemorySink>) {
        let sink = Arc::new(InMemorySink::new());
        let session = AgentSession::new(
            config,
            ScriptedReasoner(script),
            Arc::new(ToolRegistry::new(Duration::from_secs(1))),
            Arc::new(SpanEmitter::new(sink.clone())),
        );
        (session, sink)
    }

    #[tokio::test]
    async fn test_reply_and_top_level_span() {
        let (session, sink) = session(Script::Answer("Hi there!"), AgentConfig::default().with_agent_id("asst_42"));
        let reply = session.run("Hello").await.unwrap();

        assert_eq!(reply.answer, "Hi there!");
        assert_eq!(reply.status, RunStatus::Completed);
        assert_eq!(reply.usage, Usage::new(10, 5));
        assert_eq!(reply.iterations, 1);

        let run = &sink.named("invoke_agent demo-agent")[0];
        assert_eq!(run.status, Some(SpanStatus::Ok));
        assert_eq!(run.attribute(attributes::AGENT_ID).and_then(AttributeValue::as_str), Some("asst_42"));
        assert_eq!(
            run.attribute(attributes::CONVERSATION_ID).and_then(AttributeValue::as_str),
            Some(reply.run_id.to_string().as_str())
        );
        assert_eq!(run.attribute(attributes::USAGE_INPUT_TOKENS).and_then(AttributeValue::as_int), Some(10));

        let chat = &sink.named("chat gpt-4o")[0];
        assert_eq!(chat.parent, Some(run.id));
    }

    #[tokio::test]
    async fn test_agent_id_omitted_when_unset() {
        let (session, sink) = session(Script::Answer("ok"), AgentConfig::default());
        session.run("Hello").await.unwrap();
        assert!(sink.named("invoke_agent")[0].attribute(attributes::AGENT_ID).is_none());
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let (session, sink) = session(Script::Answer("ok"), AgentConfig::default());
        let err = session.run("   ").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidInput(_)));
        assert_eq!(sink.started_count(), 0);
    }

    #[tokio::test]
    async fn test_verbatim_is_degraded() {
        let (session, sink) = session(Script::Verbatim("84, I think"), AgentConfig::default());
        let reply = session.run("What is 12 * 7?").await.unwrap();
        assert!(reply.degraded());
        assert_eq!(reply.answer, "84, I think");
        let run = &sink.named("invoke_agent")[0];
        assert_eq!(run.status, Some(SpanStatus::Ok));
        assert_eq!(
            run.attribute(attributes::AGENT_FINISH_REASON).and_then(AttributeValue::as_str),
            Some("verbatim")
        );
    }

    #[tokio::test]
    async fn test_reasoning_failure_is_generic_answer() {
        let (session, sink) = session(Script::Malformed, AgentConfig::default());
        let reply = session.run("Hello").await.unwrap();
        assert!(reply.failed());
        assert_eq!(reply.answer, FAILURE_ANSWER);

        let run = &sink.named("invoke_agent")[0];
        assert!(matches!(run.status, Some(SpanStatus::Error(_))));
        assert_eq!(
            run.attribute(attributes::ERROR_TYPE).and_then(AttributeValue::as_str),
            Some("reasoning_failure")
        );
    }

    #[tokio::test]
    async fn test_provider_error_closes_spans_with_error() {
        let (session, sink) = session(Script::ProviderDown, AgentConfig::default());
        let err = session.run("Hello").await.unwrap_err();
        assert!(matches!(err, SessionError::Provider(_)));

        assert_eq!(sink.started_count(), sink.finished_count());
        for span in sink.finished() {
            assert!(matches!(span.status, Some(SpanStatus::Error(_))), "{} not error", span.name);
        }
    }
}
