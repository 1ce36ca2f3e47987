//! Cloud Trace v1 wire model.
//!
//! Field names follow the JSON encoding of the v1 REST API (camelCase,
//! 64-bit span ids as decimal strings).

use crate::labels::Labels;
use serde::{Deserialize, Serialize};

/// Span kind as understood by Cloud Trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanKind {
    #[default]
    SpanKindUnspecified,
    RpcServer,
    RpcClient,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::SpanKindUnspecified => "SPAN_KIND_UNSPECIFIED",
            SpanKind::RpcServer => "RPC_SERVER",
            SpanKind::RpcClient => "RPC_CLIENT",
        }
    }
}

/// One span inside a [`Trace`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSpan {
    #[serde(with = "fixed64")]
    pub span_id: u64,
    pub kind: SpanKind,
    pub name: String,
    /// RFC3339 with nanoseconds
    pub start_time: String,
    /// RFC3339 with nanoseconds
    pub end_time: String,
    #[serde(with = "fixed64", default, skip_serializing_if = "is_zero")]
    pub parent_span_id: u64,
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub labels: Labels,
}

/// A trace record as sent to `projects.patchTraces`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub project_id: String,
    /// 32 lowercase hex characters
    pub trace_id: String,
    pub spans: Vec<TraceSpan>,
}

/// Request body of `projects.patchTraces`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Traces {
    pub traces: Vec<Trace>,
}

impl Traces {
    pub fn new(traces: Vec<Trace>) -> Self {
        Self { traces }
    }
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

/// `fixed64` values travel as decimal strings in proto3 JSON.
mod fixed64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_trace(parent: u64) -> Trace {
        let mut labels = Labels::new();
        labels.insert("custom".into(), "b".into());
        Trace {
            project_id: "proj".into(),
            trace_id: "000000000000002a000000000000002a".into(),
            spans: vec![TraceSpan {
                span_id: 18446744073709551615,
                kind: SpanKind::RpcServer,
                name: "GET /".into(),
                start_time: "2024-01-02T03:04:05.000000000Z".into(),
                end_time: "2024-01-02T03:04:06.000000000Z".into(),
                parent_span_id: parent,
                labels,
            }],
        }
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(Traces::new(vec![sample_trace(7)])).unwrap();
        assert_eq!(
            value,
            json!({
                "traces": [{
                    "projectId": "proj",
                    "traceId": "000000000000002a000000000000002a",
                    "spans": [{
                        "spanId": "18446744073709551615",
                        "kind": "RPC_SERVER",
                        "name": "GET /",
                        "startTime": "2024-01-02T03:04:05.000000000Z",
                        "endTime": "2024-01-02T03:04:06.000000000Z",
                        "parentSpanId": "7",
                        "labels": { "custom": "b" }
                    }]
                }]
            })
        );
    }

    #[test]
    fn test_root_span_omits_parent() {
        let value = serde_json::to_value(sample_trace(0)).unwrap();
        assert!(value["spans"][0].get("parentSpanId").is_none());

        let back: Trace = serde_json::from_value(value).unwrap();
        assert_eq!(back.spans[0].parent_span_id, 0);
    }

    #[test]
    fn test_kind_strings_match_serde() {
        for kind in [SpanKind::SpanKindUnspecified, SpanKind::RpcServer, SpanKind::RpcClient] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
        }
    }
}
