//! Reasoning step executor.
//!
//! One reasoning step renders the scratchpad into a ReAct prompt, asks the
//! model for a completion and classifies the reply as a tool call, a final
//! answer or neither. Model output is untrusted text: parsing is lenient and
//! an unparseable reply gets a clarifying re-prompt before it is accepted
//! verbatim.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Error;
use crate::event::ToolInvocationIntent;
use crate::scratchpad::Scratchpad;
use crate::state::Usage;
use crate::tools::{ToolArguments, ToolRegistry};

const REACT_HEADER: &str = "You are a helpful assistant with access to tools. Use them when needed.

You have access to the following tools:
{tools}

Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of [{tool_names}]
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question

Begin!";

const REPROMPT: &str = "Your last response did not follow the required format. Reply with either
Thought: <your reasoning>
Action: <one of [{tool_names}]>
Action Input: <the input to the action>
or
Thought: I now know the final answer
Final Answer: <the final answer>";

static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*Action[ \t]*:[ \t]*(.*?)[ \t]*$").expect("action regex is valid")
});

static ACTION_INPUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)Action[ \t]*Input[ \t]*:[ \t]*(.*)").expect("action input regex is valid")
});

static FINAL_ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)Final[ \t]*Answer[ \t]*:[ \t]*(.*)").expect("final answer regex is valid")
});

static SECTION_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(Observation|Thought|Final[ \t]*Answer)[ \t]*:").expect("section regex is valid")
});

static THOUGHT_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*Thought\s*:\s*").expect("thought regex is valid"));

/// A message in the model conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A single model completion.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
    /// Model that served the request, if the provider reports it.
    pub model: Option<String>,
}

/// A chat-completion provider.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, Error>;
}

#[async_trait]
impl<M: ChatModel + ?Sized> ChatModel for Arc<M> {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, Error> {
        (**self).complete(messages).await
    }
}

/// Classification of one model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedResponse {
    ToolCall(ToolInvocationIntent),
    FinalAnswer(String),
    Unparseable,
}

/// Result of a reasoning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reasoning {
    ToolCall(ToolInvocationIntent),
    FinalAnswer(String),
    /// No usable text even after re-prompting.
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct StepOutput {
    pub outcome: Reasoning,
    /// Usage summed over every model call in the step.
    pub usage: Usage,
    pub response_model: Option<String>,
    /// The final answer is unparsed model text.
    pub degraded: bool,
}

impl StepOutput {
    pub fn new(outcome: Reasoning) -> Self {
        Self {
            outcome,
            usage: Usage::default(),
            response_model: None,
            degraded: false,
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// Input of a reasoning step.
#[derive(Debug, Clone, Copy)]
pub struct StepRequest<'a> {
    pub scratchpad: &'a Scratchpad,
    pub tools: &'a ToolRegistry,
}

/// Produces the next decision from the scratchpad.
#[async_trait]
pub trait ReasoningExecutor: Send + Sync {
    async fn step(&self, request: StepRequest<'_>) -> Result<StepOutput, Error>;
}

#[async_trait]
impl<T: ReasoningExecutor + ?Sized> ReasoningExecutor for Box<T> {
    async fn step(&self, request: StepRequest<'_>) -> Result<StepOutput, Error> {
        (**self).step(request).await
    }
}

#[async_trait]
impl<T: ReasoningExecutor + ?Sized> ReasoningExecutor for Arc<T> {
    async fn step(&self, request: StepRequest<'_>) -> Result<StepOutput, Error> {
        (**self).step(request).await
    }
}

/// Reasoning executor backed by a chat model and the ReAct text format.
pub struct ModelReasoner<M> {
    model: M,
    malformed_retries: u32,
}

impl<M: ChatModel> ModelReasoner<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            malformed_retries: 1,
        }
    }

    pub fn with_malformed_retries(mut self, retries: u32) -> Self {
        self.malformed_retries = retries;
        self
    }

    pub fn build_messages(&self, request: &StepRequest<'_>) -> Vec<ChatMessage> {
        let system = REACT_HEADER
            .replace("{tools}", &request.tools.describe())
            .replace("{tool_names}", &request.tools.names().join(", "));
        let question = request.scratchpad.question().unwrap_or_default();
        let user = format!(
            "Question: {question}\nThought:{}",
            request.scratchpad.render_react()
        );
        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }

    fn reprompt(tools: &ToolRegistry) -> String {
        REPROMPT.replace("{tool_names}", &tools.names().join(", "))
    }
}

#[async_trait]
impl<M: ChatModel> ReasoningExecutor for ModelReasoner<M> {
    async fn step(&self, request: StepRequest<'_>) -> Result<StepOutput, Error> {
        let mut messages = self.build_messages(&request);
        let mut usage = Usage::default();
        let mut response_model = None;
        let mut last_text = String::new();

        for attempt in 0..=self.malformed_retries {
            let completion = self.model.complete(&messages).await?;
            usage.add(completion.usage);
            if completion.model.is_some() {
                response_model = completion.model;
            }

            let outcome = match parse_response(&completion.text, request.tools) {
                ParsedResponse::ToolCall(intent) => Reasoning::ToolCall(intent),
                ParsedResponse::FinalAnswer(answer) => Reasoning::FinalAnswer(answer),
                ParsedResponse::Unparseable => {
                    warn!(attempt = attempt + 1, "Model response did not match the ReAct format");
                    if attempt < self.malformed_retries {
                        messages.push(ChatMessage::assistant(completion.text.clone()));
                        messages.push(ChatMessage::user(Self::reprompt(request.tools)));
                    }
                    last_text = completion.text;
                    continue;
                }
            };
            debug!(attempt = attempt + 1, "Parsed model response");
            return Ok(StepOutput {
                outcome,
                usage,
                response_model,
                degraded: false,
            });
        }

        let verbatim = last_text.trim();
        if verbatim.is_empty() {
            return Ok(StepOutput {
                outcome: Reasoning::Malformed(last_text),
                usage,
                response_model,
                degraded: false,
            });
        }

        warn!("Accepting unparseable model response verbatim");
        Ok(StepOutput {
            outcome: Reasoning::FinalAnswer(verbatim.to_string()),
            usage,
            response_model,
            degraded: true,
        })
    }
}

/// Classify model text. A tool call wins over a final answer in the same reply.
pub fn parse_response(text: &str, tools: &ToolRegistry) -> ParsedResponse {
    if let Some(intent) = parse_tool_call(text, tools) {
        return ParsedResponse::ToolCall(intent);
    }

    if let Some(caps) = FINAL_ANSWER_RE.captures(text) {
        let answer = caps.get(1).map_or("", |m| m.as_str()).trim();
        if !answer.is_empty() {
            return ParsedResponse::FinalAnswer(answer.to_string());
        }
    }

    ParsedResponse::Unparseable
}

fn parse_tool_call(text: &str, tools: &ToolRegistry) -> Option<ToolInvocationIntent> {
    let action = ACTION_RE.captures(text)?;
    let whole = action.get(0)?;
    let name = clean_tool_name(action.get(1).map_or("", |m| m.as_str()));
    if name.is_empty() {
        return None;
    }

    let thought = THOUGHT_PREFIX_RE
        .replace(text[..whole.start()].trim(), "")
        .trim()
        .to_string();

    let raw_input = ACTION_INPUT_RE
        .captures(&text[whole.end()..])
        .and_then(|caps| caps.get(1))
        .map(|m| until_next_section(m.as_str()))
        .unwrap_or_default();

    let primary = tools
        .resolve(&name)
        .and_then(|tool| tool.definition().primary_parameter().map(str::to_string));

    Some(ToolInvocationIntent {
        arguments: parse_arguments(raw_input, primary.as_deref()),
        tool: name,
        thought,
    })
}

fn clean_tool_name(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '[' | ']' | '*'))
        .trim()
        .to_string()
}

fn until_next_section(input: &str) -> &str {
    match SECTION_END_RE.find(input) {
        Some(m) => &input[..m.start()],
        None => input,
    }
}

/// Parse an `Action Input` value into string arguments.
///
/// JSON objects map key by key; anything else is assigned to `primary`
/// (or `input` when the tool is unknown).
pub fn parse_arguments(raw: &str, primary: Option<&str>) -> ToolArguments {
    let raw = strip_code_fence(raw.trim()).trim();
    let mut args = ToolArguments::new();
    if raw.is_empty() {
        return args;
    }

    let key = primary.unwrap_or("input").to_string();
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => {
            for (k, v) in map {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                args.insert(k, value);
            }
        }
        Ok(serde_json::Value::String(s)) => {
            args.insert(key, s);
        }
        _ => {
            args.insert(key, raw.trim_matches(|c| c == '"' || c == '\'').to_string());
        }
    }
    args
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    // Drop an info string such as `json`.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body)
}
