//! Span → Cloud Trace record translation.

use crate::labels::{add_logs, convert_tags, format_timestamp, transpose_labels, LogLabelStyle};
use crate::record::{SpanKind, Trace, TraceSpan};
use crate::span::{tags, RawSpan, SpanContext, TagValue};

/// Batching weight of one translated record: one trace plus one span.
pub const TRACE_WEIGHT: usize = 2;

/// Builds the Cloud Trace record for `span`.
///
/// Returns `None` for unsampled spans; nothing else is looked at in that case.
pub fn translate(span: &RawSpan, project_id: &str, style: LogLabelStyle) -> Option<Trace> {
    if !span.context.sampled {
        return None;
    }

    let mut labels = convert_tags(&span.tags);
    transpose_labels(&mut labels);
    add_logs(&mut labels, &span.logs, style);

    Some(Trace {
        project_id: project_id.to_string(),
        trace_id: trace_id_hex(&span.context),
        spans: vec![TraceSpan {
            span_id: span.context.span_id,
            kind: span_kind(span),
            name: span.operation.clone(),
            start_time: format_timestamp(&span.start),
            end_time: format_timestamp(&span.end()),
            parent_span_id: span.parent_span_id,
            labels,
        }],
    })
}

/// 32-hex-character trace id.
///
/// Uses the high half when the tracer provides one; 64-bit tracers get their
/// id repeated in both halves, which is what earlier exporters sent.
pub fn trace_id_hex(ctx: &SpanContext) -> String {
    let high = if ctx.trace_id_high != 0 {
        ctx.trace_id_high
    } else {
        ctx.trace_id
    };
    format!("{:016x}{:016x}", high, ctx.trace_id)
}

/// Maps the `span.kind` tag to a Cloud Trace span kind
pub fn span_kind(span: &RawSpan) -> SpanKind {
    match span.tags.get(tags::SPAN_KIND) {
        Some(TagValue::String(kind)) if kind == tags::SPAN_KIND_RPC_SERVER => SpanKind::RpcServer,
        Some(TagValue::String(kind)) if kind == tags::SPAN_KIND_RPC_CLIENT => SpanKind::RpcClient,
        _ => SpanKind::SpanKindUnspecified,
    }
}
