//! Agent controller - the ReAct execution loop.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::Error;
use crate::config::AgentConfig;
use crate::event::{ConversationTurn, ToolErrorKind, ToolInvocationIntent, ToolResult};
use crate::reasoning::{Reasoning, ReasoningExecutor, StepOutput, StepRequest};
use crate::scratchpad::Scratchpad;
use crate::state::{AgentRunContext, LoopState};
use crate::telemetry::{SpanEmitter, SpanId, SpanKind, SpanStatus, attributes, attrs, operations};
use crate::tools::{Tool, ToolRegistry};

/// Answer returned when a budget runs out before the model produced one.
pub const BUDGET_EXHAUSTED_ANSWER: &str = "Agent stopped due to iteration limit or time limit.";

/// Why a finished run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The model gave a parseable final answer.
    FinalAnswer,
    /// The model never followed the format; its text was used as-is.
    Verbatim,
    /// Iteration or time budget ran out.
    BudgetExhausted,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FinalAnswer => "final_answer",
            Self::Verbatim => "verbatim",
            Self::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Terminal outcome of the loop, reported exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished { answer: String, reason: FinishReason },
    Aborted { reason: String },
}

/// Final state of a run.
#[derive(Debug)]
pub struct LoopReport {
    pub context: AgentRunContext,
    pub outcome: RunOutcome,
    pub scratchpad: Scratchpad,
}

/// The ReAct loop controller.
///
/// Consumed by [`AgentController::run`], so a run cannot be re-entered once
/// it has terminated.
pub struct AgentController<'a, R: ?Sized> {
    context: AgentRunContext,
    scratchpad: Scratchpad,
    config: &'a AgentConfig,
    reasoner: &'a R,
    tools: &'a ToolRegistry,
    emitter: &'a SpanEmitter,
    cancel: CancellationToken,
    parent: Option<SpanId>,
    /// At least one reasoning step produced a usable decision.
    reasoned: bool,
}

impl<'a, R> AgentController<'a, R>
where
    R: ReasoningExecutor + ?Sized,
{
    pub fn new(
        context: AgentRunContext,
        config: &'a AgentConfig,
        reasoner: &'a R,
        tools: &'a ToolRegistry,
        emitter: &'a SpanEmitter,
    ) -> Self {
        Self {
            context,
            scratchpad: Scratchpad::new(),
            config,
            reasoner,
            tools,
            emitter,
            cancel: CancellationToken::new(),
            parent: None,
            reasoned: false,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Nest step and tool spans under `parent`.
    pub fn with_parent_span(mut self, parent: SpanId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Run the loop until it finishes, aborts, or fails.
    pub async fn run(mut self, user_message: &str) -> Result<LoopReport, Error> {
        info!(run_id = %self.context.run_id, agent = %self.context.agent_name, "Starting agent loop");
        self.scratchpad.push(ConversationTurn::user(user_message));
        self.context.advance(LoopState::Reasoning)?;

        let deadline = Instant::now() + self.config.max_duration;

        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.context.iteration >= self.config.max_iterations || Instant::now() >= deadline {
                return self.exhausted();
            }

            let iteration = self.context.begin_iteration();
            debug!(iteration, turns = self.scratchpad.len(), "Agent iteration");

            let Some(step) = self.reason(deadline).await? else {
                return self.exhausted();
            };

            match step.outcome {
                Reasoning::FinalAnswer(answer) => {
                    info!(iterations = iteration, degraded = step.degraded, "Agent finished with answer");
                    let reason = if step.degraded {
                        FinishReason::Verbatim
                    } else {
                        FinishReason::FinalAnswer
                    };
                    self.scratchpad.push(ConversationTurn::agent(&answer));
                    self.context.advance(LoopState::Finished)?;
                    return Ok(self.report(RunOutcome::Finished { answer, reason }));
                }

                Reasoning::Malformed(text) => {
                    warn!(iterations = iteration, "No usable model response, aborting");
                    let reason = format!("unusable model response ({} chars)", text.len());
                    self.context.set_aborted(&reason)?;
                    return Ok(self.report(RunOutcome::Aborted { reason }));
                }

                Reasoning::ToolCall(intent) => {
                    self.scratchpad.push(ConversationTurn::tool_call(intent.clone()));

                    let result = match self.tools.resolve(&intent.tool) {
                        Some(tool) => {
                            self.context.advance(LoopState::ActingOnTool)?;
                            let result = self.act(tool, &intent, deadline).await?;
                            self.context.advance(LoopState::Reasoning)?;
                            match result {
                                Some(result) => result,
                                None => return self.exhausted(),
                            }
                        }
                        None => {
                            warn!(tool = %intent.tool, "Model requested unknown tool");
                            ToolResult::not_found(&intent.tool, &self.tools.names())
                        }
                    };
                    self.scratchpad.push(ConversationTurn::observation(&result));
                }
            }
        }
    }

    /// One reasoning step inside a `chat <model>` span.
    ///
    /// Returns `None` when the wall-clock budget ran out mid-step.
    async fn reason(&mut self, deadline: Instant) -> Result<Option<StepOutput>, Error> {
        let mut span = self.emitter.begin(
            format!("{} {}", operations::CHAT, self.context.model),
            SpanKind::Client,
            attrs([
                (attributes::OPERATION_NAME, operations::CHAT.into()),
                (attributes::REQUEST_MODEL, self.context.model.as_str().into()),
                (attributes::PROVIDER_NAME, self.config.provider_name.as_str().into()),
            ]),
            self.parent,
        );

        let request = StepRequest {
            scratchpad: &self.scratchpad,
            tools: self.tools,
        };
        let step = self
            .reasoner
            .step(request)
            .instrument(span.tracing_span().clone());

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                span.end(SpanStatus::Cancelled);
                return Err(Error::Cancelled);
            }
            result = tokio::time::timeout_at(deadline, step) => result,
        };

        let output = match result {
            Err(_) => {
                warn!("Time budget exceeded during reasoning");
                span.end(SpanStatus::error("time budget exceeded"));
                return Ok(None);
            }
            Ok(Err(e)) => {
                span.end(SpanStatus::error(e.to_string()));
                return Err(e);
            }
            Ok(Ok(output)) => output,
        };

        self.context.record_usage(output.usage);
        span.set_attribute(attributes::USAGE_INPUT_TOKENS, output.usage.input_tokens);
        span.set_attribute(attributes::USAGE_OUTPUT_TOKENS, output.usage.output_tokens);
        if let Some(model) = &output.response_model {
            span.set_attribute(attributes::RESPONSE_MODEL, model.as_str());
        }

        match &output.outcome {
            Reasoning::Malformed(_) => span.end(SpanStatus::error("malformed response")),
            _ => {
                self.reasoned = true;
                span.end(SpanStatus::Ok);
            }
        }
        Ok(Some(output))
    }

    /// Execute a resolved tool inside an `execute_tool <name>` span.
    ///
    /// Returns `None` when the wall-clock budget ran out mid-call.
    async fn act(
        &mut self,
        tool: Arc<dyn Tool>,
        intent: &ToolInvocationIntent,
        deadline: Instant,
    ) -> Result<Option<ToolResult>, Error> {
        let definition = tool.definition();
        let mut span = self.emitter.begin(
            format!("{} {}", operations::EXECUTE_TOOL, definition.name),
            SpanKind::Internal,
            attrs([
                (attributes::OPERATION_NAME, operations::EXECUTE_TOOL.into()),
                (attributes::TOOL_NAME, definition.name.as_str().into()),
                (attributes::TOOL_TYPE, definition.tool_type.as_str().into()),
                (attributes::TOOL_DESCRIPTION, definition.description.as_str().into()),
            ]),
            self.parent,
        );

        self.context.record_tool_call();
        info!(tool = %definition.name, "Executing tool");

        let invoke = self
            .tools
            .invoke(tool.as_ref(), &intent.arguments)
            .instrument(span.tracing_span().clone());

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                span.end(SpanStatus::Cancelled);
                return Err(Error::Cancelled);
            }
            result = tokio::time::timeout_at(deadline, invoke) => result,
        };

        let Ok(result) = result else {
            warn!(tool = %definition.name, "Time budget exceeded during tool call");
            span.set_attribute(attributes::ERROR_TYPE, ToolErrorKind::Timeout.code());
            span.end(SpanStatus::error("time budget exceeded"));
            return Ok(None);
        };

        match result.error {
            None => span.end(SpanStatus::Ok),
            Some(kind) => {
                span.set_attribute(attributes::ERROR_TYPE, kind.code());
                span.end(SpanStatus::error(result.output.as_str()));
            }
        }
        Ok(Some(result))
    }

    fn exhausted(mut self) -> Result<LoopReport, Error> {
        warn!(
            iterations = self.context.iteration,
            max_iterations = self.config.max_iterations,
            "Agent budget exhausted"
        );
        if !self.reasoned {
            let reason = "budget exhausted before any reasoning step succeeded".to_string();
            self.context.set_aborted(&reason)?;
            return Ok(self.report(RunOutcome::Aborted { reason }));
        }

        let answer = self
            .scratchpad
            .last_thought()
            .map(str::to_string)
            .unwrap_or_else(|| BUDGET_EXHAUSTED_ANSWER.to_string());
        self.context.advance(LoopState::Finished)?;
        Ok(self.report(RunOutcome::Finished {
            answer,
            reason: FinishReason::BudgetExhausted,
        }))
    }

    fn report(self, outcome: RunOutcome) -> LoopReport {
        LoopReport {
            context: self.context,
            outcome,
            scratchpad: self.scratchpad,
        }
    }
}
