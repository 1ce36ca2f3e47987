//! Tag → label conversion.
//!
//! Cloud Trace labels are flat `string → string` maps. This module turns span
//! tags and log events into that shape:
//!
//! - [`convert_tags`] keeps string and integer tags, dropping everything else
//! - [`transpose_labels`] rewrites well-known OpenTracing keys into their
//!   `trace.cloud.google.com/...` equivalents
//! - [`add_logs`] flattens each log event into an `event_<i>` label

use crate::span::{tags, LogRecord, TagValue};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

/// Label set attached to a trace span. Ordered so serialization is stable.
pub type Labels = BTreeMap<String, String>;

/// Well-known tag keys and the Cloud Trace label each one becomes.
///
/// Source keys are pairwise distinct and no destination key is also a source
/// key, so iteration order cannot change the outcome.
pub static LABEL_MAP: &[(&str, &str)] = &[
    (tags::PEER_HOSTNAME, "trace.cloud.google.com/http/host"),
    (tags::HTTP_METHOD, "trace.cloud.google.com/http/method"),
    (tags::HTTP_STATUS_CODE, "trace.cloud.google.com/http/status_code"),
    (tags::HTTP_URL, "trace.cloud.google.com/http/url"),
];

/// How log events are rendered into `event_<i>` labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLabelStyle {
    /// `<timestamp> k1=v1 k2=v2`
    #[default]
    Normalized,
    /// Legacy field spacing: no separator after the timestamp and a trailing
    /// space after every field, `<timestamp>k1=v1 k2=v2 `. The timestamp itself
    /// is still RFC3339.
    Legacy,
}

/// Converts span tags into labels.
///
/// Strings are copied, integers rendered in base 10. Floats and booleans are
/// dropped.
pub fn convert_tags(tags: &HashMap<String, TagValue>) -> Labels {
    tags.iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                TagValue::String(s) => s.clone(),
                TagValue::Int(v) => v.to_string(),
                TagValue::UInt(v) => v.to_string(),
                TagValue::Float(_) | TagValue::Bool(_) => return None,
            };
            Some((key.clone(), rendered))
        })
        .collect()
}

/// Moves well-known keys to their Cloud Trace names.
pub fn transpose_labels(labels: &mut Labels) {
    for (source, target) in LABEL_MAP {
        if let Some(value) = labels.remove(*source) {
            labels.insert((*target).to_string(), value);
        }
    }
}

/// Writes one `event_<i>` label per log event, `i` being its position.
pub fn add_logs(labels: &mut Labels, logs: &[LogRecord], style: LogLabelStyle) {
    for (i, log) in logs.iter().enumerate() {
        labels.insert(format!("event_{}", i), render_log(log, style));
    }
}

fn render_log(log: &LogRecord, style: LogLabelStyle) -> String {
    let mut buf = format_timestamp(&log.timestamp);
    for field in &log.fields {
        if style == LogLabelStyle::Normalized {
            buf.push(' ');
        }
        write!(buf, "{}={}", field.key, field.value).ok();
        if style == LogLabelStyle::Legacy {
            buf.push(' ');
        }
    }
    buf
}

/// RFC3339 with nanosecond precision in UTC, e.g. `2024-01-02T03:04:05.000000006Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::LogField;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap() + chrono::Duration::nanoseconds(6)
    }

    fn tag_map(pairs: &[(&str, TagValue)]) -> HashMap<String, TagValue> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_convert_tags_keeps_strings_and_integers() {
        let tags = tag_map(&[
            ("s", TagValue::from("text")),
            ("i", TagValue::from(-7_i64)),
            ("u", TagValue::from(503_u16)),
            ("f", TagValue::from(0.5)),
            ("b", TagValue::from(true)),
        ]);

        let labels = convert_tags(&tags);

        assert_eq!(labels.len(), 3);
        assert_eq!(labels["s"], "text");
        assert_eq!(labels["i"], "-7");
        assert_eq!(labels["u"], "503");
        assert!(!labels.contains_key("f"));
        assert!(!labels.contains_key("b"));
    }

    #[test]
    fn test_transpose_rewrites_peer_hostname() {
        let tags = tag_map(&[
            ("peer.hostname", TagValue::from("a")),
            ("custom", TagValue::from("b")),
        ]);

        let mut labels = convert_tags(&tags);
        transpose_labels(&mut labels);

        assert_eq!(labels["trace.cloud.google.com/http/host"], "a");
        assert_eq!(labels["custom"], "b");
        assert!(!labels.contains_key("peer.hostname"));
        assert_eq!(labels.len(), 2);
    }

    #[test]
    fn test_transpose_all_http_keys() {
        let tags = tag_map(&[
            ("http.method", TagValue::from("GET")),
            ("http.status_code", TagValue::from(404_u16)),
            ("http.url", TagValue::from("https://example.com/x")),
        ]);

        let mut labels = convert_tags(&tags);
        transpose_labels(&mut labels);

        let expected: Labels = [
            ("trace.cloud.google.com/http/method", "GET"),
            ("trace.cloud.google.com/http/status_code", "404"),
            ("trace.cloud.google.com/http/url", "https://example.com/x"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(labels, expected);
    }

    #[test]
    fn test_label_map_keys_are_disjoint() {
        for (source, _) in LABEL_MAP {
            assert!(LABEL_MAP.iter().all(|(_, target)| target != source));
        }
    }

    #[test]
    fn test_normalized_log_labels() {
        let logs = vec![
            LogRecord::new(
                ts(),
                vec![LogField::new("event", "retry"), LogField::new("attempt", 2_i64)],
            ),
            LogRecord::new(ts(), vec![]),
        ];

        let mut labels = Labels::new();
        add_logs(&mut labels, &logs, LogLabelStyle::Normalized);

        assert_eq!(
            labels["event_0"],
            "2024-01-02T03:04:05.000000006Z event=retry attempt=2"
        );
        assert_eq!(labels["event_1"], "2024-01-02T03:04:05.000000006Z");
    }

    #[test]
    fn test_legacy_log_labels_keep_historical_spacing() {
        let logs = vec![LogRecord::new(
            ts(),
            vec![LogField::new("event", "retry"), LogField::new("attempt", 2_i64)],
        )];

        let mut labels = Labels::new();
        add_logs(&mut labels, &logs, LogLabelStyle::Legacy);

        assert_eq!(
            labels["event_0"],
            "2024-01-02T03:04:05.000000006Zevent=retry attempt=2 "
        );
    }

    #[test]
    fn test_format_timestamp_nanos() {
        assert_eq!(format_timestamp(&ts()), "2024-01-02T03:04:05.000000006Z");
    }
}
