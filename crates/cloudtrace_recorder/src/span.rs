//! Finished-span model handed to the recorder by an in-process tracer.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Well-known tag keys and values shared with OpenTracing-style tracers.
pub mod tags {
    pub const SPAN_KIND: &str = "span.kind";
    pub const SPAN_KIND_RPC_SERVER: &str = "server";
    pub const SPAN_KIND_RPC_CLIENT: &str = "client";
    pub const PEER_HOSTNAME: &str = "peer.hostname";
    pub const HTTP_METHOD: &str = "http.method";
    pub const HTTP_STATUS_CODE: &str = "http.status_code";
    pub const HTTP_URL: &str = "http.url";
}

/// Identity of a span within its trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpanContext {
    /// Low 64 bits of the trace identifier
    pub trace_id: u64,
    /// High 64 bits of the trace identifier (0 if the tracer only has 64-bit ids)
    pub trace_id_high: u64,
    /// Span identifier
    pub span_id: u64,
    /// Upstream sampling decision
    pub sampled: bool,
}

/// Typed tag or log-field value
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::String(s) => f.write_str(s),
            TagValue::Int(v) => write!(f, "{}", v),
            TagValue::UInt(v) => write!(f, "{}", v),
            TagValue::Float(v) => write!(f, "{}", v),
            TagValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::String(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::String(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<i32> for TagValue {
    fn from(v: i32) -> Self {
        TagValue::Int(v as i64)
    }
}

impl From<u64> for TagValue {
    fn from(v: u64) -> Self {
        TagValue::UInt(v)
    }
}

impl From<u16> for TagValue {
    fn from(v: u16) -> Self {
        TagValue::UInt(v as u64)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

/// One key/value pair of a log event
#[derive(Debug, Clone, PartialEq)]
pub struct LogField {
    pub key: String,
    pub value: TagValue,
}

impl LogField {
    pub fn new(key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Timestamped structured log event attached to a span.
///
/// Fields keep their emission order.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub fields: Vec<LogField>,
}

impl LogRecord {
    pub fn new(timestamp: DateTime<Utc>, fields: Vec<LogField>) -> Self {
        Self { timestamp, fields }
    }
}

/// A completed span as emitted by the tracer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSpan {
    pub context: SpanContext,
    /// Parent span identifier (0 if root span)
    pub parent_span_id: u64,
    /// Operation name
    pub operation: String,
    pub start: DateTime<Utc>,
    pub duration: Duration,
    pub tags: HashMap<String, TagValue>,
    pub logs: Vec<LogRecord>,
}

impl RawSpan {
    /// Creates a sampled span starting now with zero duration
    pub fn new(trace_id: u64, span_id: u64, parent_span_id: u64, operation: impl Into<String>) -> Self {
        Self {
            context: SpanContext {
                trace_id,
                trace_id_high: 0,
                span_id,
                sampled: true,
            },
            parent_span_id,
            operation: operation.into(),
            start: Utc::now(),
            duration: Duration::ZERO,
            tags: HashMap::new(),
            logs: Vec::new(),
        }
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_sampled(mut self, sampled: bool) -> Self {
        self.context.sampled = sampled;
        self
    }

    pub fn with_trace_id_high(mut self, high: u64) -> Self {
        self.context.trace_id_high = high;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.set_tag(key, value);
        self
    }

    /// Adds or replaces a tag
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Appends a log event
    pub fn log(&mut self, timestamp: DateTime<Utc>, fields: Vec<LogField>) {
        self.logs.push(LogRecord::new(timestamp, fields));
    }

    /// Sets the duration from the elapsed wall-clock time since `start`
    pub fn finish(&mut self) {
        self.duration = (Utc::now() - self.start).to_std().unwrap_or(Duration::ZERO);
    }

    /// End time of the span
    pub fn end(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.duration)
            .ok()
            .and_then(|elapsed| self.start.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
