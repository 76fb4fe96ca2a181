//! End-to-end runs through the session facade with a scripted model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use react_agent_core::telemetry::attributes;
use react_agent_core::{
    AgentConfig, AgentSession, AttributeValue, ChatMessage, ChatModel, Completion, Error, InMemorySink,
    ModelReasoner, RunStatus, SessionError, SpanEmitter, SpanStatus, Tool, ToolArguments, ToolDefinition,
    ToolExecutionError, ToolParameter, ToolRegistry, Usage,
};
use tokio_util::sync::CancellationToken;

/// Replays canned replies; repeats the last one when the script runs out.
struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    calls: Mutex<usize>,
}

impl ScriptedModel {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            last: Mutex::new(String::new()),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<Completion, Error> {
        *self.calls.lock().unwrap() += 1;
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.replies.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(Completion {
            text: last.clone(),
            usage: Usage::new(50, 10),
            model: Some("gpt-4o-2024-08-06".into()),
        })
    }
}

/// Never answers.
struct HangingModel;

#[async_trait]
impl ChatModel for HangingModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<Completion, Error> {
        std::future::pending::<Result<Completion, Error>>().await
    }
}

/// Multiplies `a * b`.
struct Multiply {
    definition: ToolDefinition,
}

impl Multiply {
    fn new() -> Self {
        Self {
            definition: ToolDefinition::function("calculator", "Multiply two numbers.")
                .with_parameter(ToolParameter::required("expression", "An expression like 3 * 4")),
        }
    }
}

#[async_trait]
impl Tool for Multiply {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn call(&self, args: &ToolArguments) -> Result<String, ToolExecutionError> {
        let expression = &args["expression"];
        let (a, b) = expression
            .split_once('*')
            .ok_or_else(|| ToolExecutionError::InvalidInput(expression.clone()))?;
        let parse = |s: &str| {
            s.trim()
                .parse::<i64>()
                .map_err(|e| ToolExecutionError::InvalidInput(e.to_string()))
        };
        Ok((parse(a)? * parse(b)?).to_string())
    }
}

struct Stuck {
    definition: ToolDefinition,
}

#[async_trait]
impl Tool for Stuck {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn call(&self, _args: &ToolArguments) -> Result<String, ToolExecutionError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("too late".into())
    }
}

fn session<M: ChatModel>(
    model: M,
    config: AgentConfig,
) -> (AgentSession<ModelReasoner<M>>, Arc<InMemorySink>) {
    let sink = Arc::new(InMemorySink::new());
    let tools = ToolRegistry::new(config.tool_timeout)
        .with_tool(Multiply::new())
        .with_tool(Stuck {
            definition: ToolDefinition::function("slow_lookup", "Looks things up, slowly."),
        });
    let reasoner = ModelReasoner::new(model).with_malformed_retries(config.malformed_retries);
    let session = AgentSession::new(
        config,
        reasoner,
        Arc::new(tools),
        Arc::new(SpanEmitter::new(sink.clone())),
    );
    (session, sink)
}

fn assert_all_spans_ended(sink: &InMemorySink) {
    assert_eq!(sink.started_count(), sink.finished_count());
    assert!(sink.finished().iter().all(|s| s.status.is_some() && s.end_time.is_some()));
}

#[tokio::test]
async fn test_calculator_question() {
    let model = ScriptedModel::new(&[
        "Thought: I need to multiply 12 by 7.\nAction: calculator\nAction Input: 12 * 7",
        "Thought: I now know the final answer.\nFinal Answer: 12 * 7 is 84.",
    ]);
    let (session, sink) = session(model.clone(), AgentConfig::default());

    let reply = session.run("What is 12 * 7?").await.unwrap();
    assert!(reply.answer.contains("84"));
    assert_eq!(reply.status, RunStatus::Completed);
    assert_eq!(reply.usage, Usage::new(100, 20));
    assert_eq!(model.calls(), 2);

    let tool_spans = sink.named("execute_tool");
    assert_eq!(tool_spans.len(), 1);
    assert_eq!(tool_spans[0].name, "execute_tool calculator");
    assert_eq!(tool_spans[0].status, Some(SpanStatus::Ok));
    assert_eq!(
        tool_spans[0].attribute(attributes::TOOL_TYPE).and_then(AttributeValue::as_str),
        Some("function")
    );

    let chat_spans = sink.named("chat gpt-4o");
    assert_eq!(chat_spans.len(), 2);
    assert_eq!(
        chat_spans[0].attribute(attributes::RESPONSE_MODEL).and_then(AttributeValue::as_str),
        Some("gpt-4o-2024-08-06")
    );

    let run = &sink.named("invoke_agent")[0];
    assert_eq!(run.status, Some(SpanStatus::Ok));
    assert_eq!(run.attribute(attributes::AGENT_ITERATIONS).and_then(AttributeValue::as_int), Some(2));
    assert!(sink.finished().iter().filter(|s| s.id != run.id).all(|s| s.parent == Some(run.id)));
    assert_all_spans_ended(&sink);
}

#[tokio::test]
async fn test_greeting_uses_no_tools() {
    let model = ScriptedModel::new(&["Thought: No tool needed.\nFinal Answer: Hello! How can I help?"]);
    let (session, sink) = session(model, AgentConfig::default());

    let reply = session.run("Hello").await.unwrap();
    assert_eq!(reply.answer, "Hello! How can I help?");
    assert!(sink.named("execute_tool").is_empty());
    assert_eq!(sink.named("chat").len(), 1);
    assert_all_spans_ended(&sink);
}

#[tokio::test]
async fn test_unparseable_output_returned_verbatim() {
    let model = ScriptedModel::new(&["It is 84, obviously."]);
    let (session, sink) = session(model.clone(), AgentConfig::default());

    let reply = session.run("What is 12 * 7?").await.unwrap();
    assert_eq!(reply.answer, "It is 84, obviously.");
    assert_eq!(reply.status, RunStatus::Degraded);
    // first attempt plus one clarifying re-prompt
    assert_eq!(model.calls(), 2);
    assert_eq!(sink.named("invoke_agent")[0].status, Some(SpanStatus::Ok));
    assert_all_spans_ended(&sink);
}

#[tokio::test]
async fn test_empty_output_fails_run() {
    let model = ScriptedModel::new(&["   "]);
    let (session, sink) = session(model, AgentConfig::default());

    let reply = session.run("Hello").await.unwrap();
    assert_eq!(reply.status, RunStatus::Failed);
    assert!(matches!(sink.named("invoke_agent")[0].status, Some(SpanStatus::Error(_))));
    assert_all_spans_ended(&sink);
}

#[tokio::test]
async fn test_always_tool_stops_at_iteration_limit() {
    let model = ScriptedModel::new(&["Thought: Multiply again.\nAction: calculator\nAction Input: 2 * 2"]);
    let (session, sink) = session(model.clone(), AgentConfig::default().with_max_iterations(3));

    let reply = session.run("Keep going").await.unwrap();
    assert_eq!(reply.iterations, 3);
    assert_eq!(reply.status, RunStatus::Degraded);
    assert_eq!(reply.answer, "Multiply again.");
    assert_eq!(model.calls(), 3);
    assert_eq!(sink.named("execute_tool calculator").len(), 3);

    let run = &sink.named("invoke_agent")[0];
    assert_eq!(run.status, Some(SpanStatus::Ok));
    assert_eq!(
        run.attribute(attributes::AGENT_FINISH_REASON).and_then(AttributeValue::as_str),
        Some("budget_exhausted")
    );
    assert_all_spans_ended(&sink);
}

#[tokio::test]
async fn test_unknown_tool_does_not_abort() {
    let model = ScriptedModel::new(&[
        "Thought: Let me search.\nAction: web_search\nAction Input: rust",
        "Thought: I cannot search.\nFinal Answer: I don't know.",
    ]);
    let (session, sink) = session(model, AgentConfig::default());

    let reply = session.run("Search for rust").await.unwrap();
    assert_eq!(reply.status, RunStatus::Completed);
    assert_eq!(reply.answer, "I don't know.");
    assert!(sink.named("execute_tool").is_empty());
    assert_all_spans_ended(&sink);
}

#[tokio::test(start_paused = true)]
async fn test_tool_timeout_continues_run() {
    let model = ScriptedModel::new(&[
        "Thought: Look it up.\nAction: slow_lookup\nAction Input: anything",
        "Thought: The lookup timed out.\nFinal Answer: I couldn't find that in time.",
    ]);
    let config = AgentConfig::default().with_tool_timeout(Duration::from_secs(2));
    let (session, sink) = session(model, config);

    let reply = session.run("Find something").await.unwrap();
    assert_eq!(reply.status, RunStatus::Completed);

    let tool = &sink.named("execute_tool slow_lookup")[0];
    assert!(matches!(tool.status, Some(SpanStatus::Error(_))));
    assert_eq!(
        tool.attribute(attributes::ERROR_TYPE).and_then(AttributeValue::as_str),
        Some("tool_timeout")
    );
    assert_all_spans_ended(&sink);
}

#[tokio::test(start_paused = true)]
async fn test_time_budget_covers_tool_calls() {
    let model = ScriptedModel::new(&["Thought: Look it up.\nAction: slow_lookup\nAction Input: anything"]);
    let config = AgentConfig::default()
        .with_max_duration(Duration::from_secs(5))
        .with_tool_timeout(Duration::from_secs(600));
    let (session, sink) = session(model.clone(), config);

    let started = tokio::time::Instant::now();
    let reply = session.run("Find something").await.unwrap();
    assert!(started.elapsed() <= Duration::from_secs(6), "ran for {:?}", started.elapsed());

    assert_eq!(reply.status, RunStatus::Degraded);
    assert_eq!(reply.answer, "Look it up.");
    assert_eq!(model.calls(), 1);

    let tool = &sink.named("execute_tool slow_lookup")[0];
    assert_eq!(tool.status, Some(SpanStatus::error("time budget exceeded")));
    let run = &sink.named("invoke_agent")[0];
    assert_eq!(
        run.attribute(attributes::AGENT_FINISH_REASON).and_then(AttributeValue::as_str),
        Some("budget_exhausted")
    );
    assert_all_spans_ended(&sink);
}

#[tokio::test(start_paused = true)]
async fn test_time_budget_before_any_answer_aborts() {
    let config = AgentConfig::default().with_max_duration(Duration::from_secs(5));
    let (session, sink) = session(HangingModel, config);

    let reply = session.run("Hello").await.unwrap();
    assert_eq!(reply.status, RunStatus::Failed);
    assert!(matches!(sink.named("chat")[0].status, Some(SpanStatus::Error(_))));
    assert_all_spans_ended(&sink);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_closes_spans() {
    let (session, sink) = session(HangingModel, AgentConfig::default());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = session.run_with_cancel("Hello", cancel).await.unwrap_err();
    assert!(matches!(err, SessionError::Cancelled));
    assert_all_spans_ended(&sink);
    assert!(sink.finished().iter().all(|s| s.status == Some(SpanStatus::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_run_closes_spans() {
    let (session, sink) = session(HangingModel, AgentConfig::default());

    let result = tokio::time::timeout(Duration::from_secs(1), session.run("Hello")).await;
    assert!(result.is_err());
    assert_eq!(sink.started_count(), 2);
    assert_all_spans_ended(&sink);
    assert!(sink.finished().iter().all(|s| s.status == Some(SpanStatus::Cancelled)));
}
