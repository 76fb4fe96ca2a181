//! Span emission with OpenTelemetry GenAI semantic-convention attributes.
//!
//! A [`SpanGuard`] is returned by [`SpanEmitter::begin`] and ends its span
//! exactly once: explicitly through [`SpanGuard::end`], or on drop with a
//! `cancelled` status when the owning future is dropped or an error is
//! propagated past it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Attribute names from the OTel GenAI semantic conventions.
pub mod attributes {
    pub const OPERATION_NAME: &str = "gen_ai.operation.name";
    pub const PROVIDER_NAME: &str = "gen_ai.provider.name";
    pub const REQUEST_MODEL: &str = "gen_ai.request.model";
    pub const RESPONSE_MODEL: &str = "gen_ai.response.model";
    pub const USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";
    pub const USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";
    pub const AGENT_NAME: &str = "gen_ai.agent.name";
    pub const AGENT_ID: &str = "gen_ai.agent.id";
    pub const CONVERSATION_ID: &str = "gen_ai.conversation.id";
    pub const TOOL_NAME: &str = "gen_ai.tool.name";
    pub const TOOL_TYPE: &str = "gen_ai.tool.type";
    pub const TOOL_DESCRIPTION: &str = "gen_ai.tool.description";
    pub const ERROR_TYPE: &str = "error.type";

    // Not part of the semantic conventions.
    pub const AGENT_ITERATIONS: &str = "agent.iterations";
    pub const AGENT_FINISH_REASON: &str = "agent.finish_reason";
}

/// Values for `gen_ai.operation.name`.
pub mod operations {
    pub const INVOKE_AGENT: &str = "invoke_agent";
    pub const CHAT: &str = "chat";
    pub const EXECUTE_TOOL: &str = "execute_tool";
}

/// Unique identifier for spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(Uuid);

impl SpanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SpanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// Outbound call, e.g. a model request.
    Client,
    /// Work done in-process: agent runs and tool executions.
    Internal,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "message", rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error(String),
    Cancelled,
}

impl SpanStatus {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

/// Scalar span attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// A timed, attributed record of one traced operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub id: SpanId,
    /// Enclosing span, if any. Identifies nesting only.
    pub parent: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub attributes: Attributes,
    pub status: Option<SpanStatus>,
}

impl SpanRecord {
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

/// Receives span lifecycle notifications.
pub trait SpanSink: Send + Sync {
    fn on_start(&self, _span: &SpanRecord) {}

    fn on_end(&self, span: &SpanRecord);
}

/// Creates spans and hands finished ones to a sink.
#[derive(Clone)]
pub struct SpanEmitter {
    sink: Arc<dyn SpanSink>,
}

impl std::fmt::Debug for SpanEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanEmitter").finish_non_exhaustive()
    }
}

impl Default for SpanEmitter {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl SpanEmitter {
    pub fn new(sink: Arc<dyn SpanSink>) -> Self {
        Self { sink }
    }

    /// Start a span. The returned guard must be ended or dropped.
    pub fn begin(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        attributes: Attributes,
        parent: Option<SpanId>,
    ) -> SpanGuard {
        let record = SpanRecord {
            id: SpanId::new(),
            parent,
            name: name.into(),
            kind,
            start_time: Utc::now(),
            end_time: None,
            attributes,
            status: None,
        };
        let span = tracing::info_span!(
            "gen_ai",
            otel.name = %record.name,
            otel.kind = record.kind.as_str(),
            span.id = %record.id,
        );
        self.sink.on_start(&record);
        SpanGuard {
            id: record.id,
            record: Some(record),
            sink: self.sink.clone(),
            span,
        }
    }
}

/// An open span. Ends exactly once.
pub struct SpanGuard {
    id: SpanId,
    record: Option<SpanRecord>,
    sink: Arc<dyn SpanSink>,
    span: tracing::Span,
}

impl std::fmt::Debug for SpanGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanGuard")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

impl SpanGuard {
    pub fn id(&self) -> SpanId {
        self.id
    }

    /// `tracing` span to instrument the wrapped work with.
    pub fn tracing_span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<AttributeValue>) {
        if let Some(record) = self.record.as_mut() {
            record.attributes.insert(key.into(), value.into());
        }
    }

    /// Close the span with `status`.
    pub fn end(mut self, status: SpanStatus) {
        self.finish(status);
    }

    fn finish(&mut self, status: SpanStatus) {
        if let Some(mut record) = self.record.take() {
            record.end_time = Some(Utc::now());
            record.status = Some(status);
            self.sink.on_end(&record);
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.finish(SpanStatus::Cancelled);
    }
}

/// Logs each finished span as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl SpanSink for TracingSink {
    fn on_end(&self, span: &SpanRecord) {
        let attributes = serde_json::to_string(&span.attributes).unwrap_or_default();
        let parent = span.parent.map(|p| p.to_string()).unwrap_or_default();
        let duration_ms = span.duration_ms().unwrap_or_default();
        match &span.status {
            Some(SpanStatus::Error(message)) => warn!(
                target: "gen_ai",
                span_name = %span.name,
                span_id = %span.id,
                span_parent = %parent,
                span_kind = span.kind.as_str(),
                duration_ms,
                status = "error",
                error = %message,
                attributes = %attributes,
                "span finished"
            ),
            other => {
                let status = match other {
                    Some(SpanStatus::Cancelled) => "cancelled",
                    _ => "ok",
                };
                info!(
                    target: "gen_ai",
                    span_name = %span.name,
                    span_id = %span.id,
                    span_parent = %parent,
                    span_kind = span.kind.as_str(),
                    duration_ms,
                    status,
                    attributes = %attributes,
                    "span finished"
                );
            }
        }
    }
}

/// Collects span records in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    started: Mutex<Vec<SpanRecord>>,
    finished: Mutex<Vec<SpanRecord>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Finished spans in end order.
    pub fn finished(&self) -> Vec<SpanRecord> {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Finished spans whose name starts with `prefix`.
    pub fn named(&self, prefix: &str) -> Vec<SpanRecord> {
        self.finished()
            .into_iter()
            .filter(|s| s.name.starts_with(prefix))
            .collect()
    }

    pub fn clear(&self) {
        self.started.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.finished.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl SpanSink for InMemorySink {
    fn on_start(&self, span: &SpanRecord) {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span.clone());
    }

    fn on_end(&self, span: &SpanRecord) {
        self.finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span.clone());
    }
}

/// Fans span notifications out to several sinks.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn SpanSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn SpanSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl SpanSink for CompositeSink {
    fn on_start(&self, span: &SpanRecord) {
        for sink in &self.sinks {
            sink.on_start(span);
        }
    }

    fn on_end(&self, span: &SpanRecord) {
        for sink in &self.sinks {
            sink.on_end(span);
        }
    }
}

/// Build an attribute map from key/value pairs.
pub fn attrs<const N: usize>(pairs: [(&str, AttributeValue); N]) -> Attributes {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter() -> (SpanEmitter, Arc<InMemorySink>) {
        let sink = Arc::new(InMemorySink::new());
        (SpanEmitter::new(sink.clone()), sink)
    }

    #[test]
    fn test_explicit_end() {
        let (emitter, sink) = emitter();
        let mut span = emitter.begin(
            "chat gpt-4o",
            SpanKind::Client,
            attrs([(attributes::OPERATION_NAME, "chat".into())]),
            None,
        );
        span.set_attribute(attributes::USAGE_INPUT_TOKENS, 42u64);
        span.end(SpanStatus::Ok);

        let spans = sink.finished();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, Some(SpanStatus::Ok));
        assert_eq!(spans[0].kind, SpanKind::Client);
        assert_eq!(
            spans[0].attribute(attributes::USAGE_INPUT_TOKENS).and_then(AttributeValue::as_int),
            Some(42)
        );
        assert!(spans[0].end_time.is_some());
    }

    #[test]
    fn test_drop_ends_as_cancelled() {
        let (emitter, sink) = emitter();
        {
            let _span = emitter.begin("execute_tool calculator", SpanKind::Internal, Attributes::new(), None);
        }
        assert_eq!(sink.started_count(), 1);
        assert_eq!(sink.finished_count(), 1);
        assert_eq!(sink.finished()[0].status, Some(SpanStatus::Cancelled));
    }

    #[test]
    fn test_error_path_closes_span() {
        fn fallible(emitter: &SpanEmitter) -> Result<(), String> {
            let _span = emitter.begin("invoke_agent demo", SpanKind::Internal, Attributes::new(), None);
            Err("boom".into())
        }

        let (emitter, sink) = emitter();
        assert!(fallible(&emitter).is_err());
        assert_eq!(sink.started_count(), sink.finished_count());
    }

    #[test]
    fn test_parent_reference() {
        let (emitter, sink) = emitter();
        let parent = emitter.begin("invoke_agent demo", SpanKind::Internal, Attributes::new(), None);
        let child = emitter.begin("chat gpt-4o", SpanKind::Client, Attributes::new(), Some(parent.id()));
        let parent_id = parent.id();
        child.end(SpanStatus::Ok);
        parent.end(SpanStatus::error("failed"));

        let spans = sink.finished();
        assert_eq!(spans[0].parent, Some(parent_id));
        assert_eq!(spans[1].status, Some(SpanStatus::Error("failed".into())));
    }

    #[test]
    fn test_composite_fans_out() {
        let a = Arc::new(InMemorySink::new());
        let b = Arc::new(InMemorySink::new());
        let emitter = SpanEmitter::new(Arc::new(CompositeSink::new().with(a.clone()).with(b.clone())));
        emitter
            .begin("chat gpt-4o", SpanKind::Client, Attributes::new(), None)
            .end(SpanStatus::Ok);
        assert_eq!(a.finished_count(), 1);
        assert_eq!(b.finished_count(), 1);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn log_finished(status: SpanStatus) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let emitter = SpanEmitter::default();
        tracing::subscriber::with_default(subscriber, || {
            let mut span = emitter.begin(
                "execute_tool calculator",
                SpanKind::Internal,
                attrs([(attributes::TOOL_NAME, "calculator".into())]),
                None,
            );
            span.set_attribute(attributes::ERROR_TYPE, "tool_timeout");
            span.end(status);
        });

        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_tracing_sink_logs_finished_spans() {
        let ok = log_finished(SpanStatus::Ok);
        assert!(ok.contains("INFO"), "{ok}");
        assert!(ok.contains("span finished"));
        assert!(ok.contains("span_name=execute_tool calculator"));
        assert!(ok.contains("span_kind=\"internal\""));
        assert!(ok.contains("status=\"ok\""));
        assert!(ok.contains("gen_ai.tool.name"));

        let failed = log_finished(SpanStatus::error("timed out after 2s"));
        assert!(failed.contains("WARN"), "{failed}");
        assert!(failed.contains("status=\"error\""));
        assert!(failed.contains("error=timed out after 2s"));

        let cancelled = log_finished(SpanStatus::Cancelled);
        assert!(cancelled.contains("INFO"), "{cancelled}");
        assert!(cancelled.contains("status=\"cancelled\""));
    }
}
