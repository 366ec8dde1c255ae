//! Formatting helpers for human-facing output.

use crate::document::{Document, Value};
use crate::error::Result;
use crate::sanitize::desanitize;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write;

/// Render a stored document for display.
///
/// Keys are desanitized first, so the output shows the query as it was
/// issued: `{processing.status: "new", date: {$gt: 5}}`.
pub fn display_document(doc: &Document) -> Result<String> {
    let original = desanitize(doc)?;
    let mut out = String::new();
    write_document(&mut out, &original);
    Ok(out)
}

fn write_document(out: &mut String, doc: &Document) {
    out.push('{');
    for (i, (key, value)) in doc.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(key);
        out.push_str(": ");
        write_value(out, value);
    }
    out.push('}');
}

fn write_value(out: &mut String, value: &Value) {
    // writing into a String cannot fail
    let _ = match value {
        Value::Null => write!(out, "null"),
        Value::Bool(b) => write!(out, "{}", b),
        Value::Int(i) => write!(out, "{}", i),
        Value::Float(f) => write!(out, "{}", f),
        Value::String(s) => write!(out, "{:?}", s),
        Value::Timestamp(ts) => write!(out, "Date({})", ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::ObjectId(bytes) => write!(out, "ObjectId({:?})", hex::encode(bytes)),
        Value::Regex { pattern, options } => write!(out, "/{}/{}", pattern, options),
        Value::Binary { subtype, bytes } => write!(out, "Binary({}, {} bytes)", subtype, bytes.len()),
        Value::Code(code) => write!(out, "Code({:?})", code),
        Value::Reference { collection, id } => {
            let _ = write!(out, "DBRef({:?}, ", collection);
            write_value(out, id);
            write!(out, ")")
        }
        Value::Document(doc) => {
            write_document(out, doc);
            Ok(())
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item);
            }
            write!(out, "]")
        }
        Value::Foreign(name) => write!(out, "<{}>", name),
    };
}

/// Format a latency statistic with two decimals, collapsing a trailing
/// `00` to a single `0`: `3.0`, `12.50`, `0.25`.
pub fn format_float(value: f64) -> String {
    let mut s = format!("{:.2}", value);
    if s.ends_with("00") && s.contains('.') {
        s.pop();
    }
    s
}

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let now = Utc::now();
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format a sync watermark: relative time, or "never" for an unsynced source.
pub fn format_last_sync(last_sync_at: Option<DateTime<Utc>>) -> String {
    match last_sync_at {
        Some(ts) => format_relative_time(ts),
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_display_document_desanitizes() {
        let stored = Document::from(json!({
            "_$_query": {"processing_,_status": "new"},
            "_$_orderby": {"date": 1}
        }));
        assert_eq!(
            display_document(&stored).unwrap(),
            r#"{$query: {processing.status: "new"}, $orderby: {date: 1}}"#
        );
    }

    #[test]
    fn test_display_values() {
        let doc = Document::new()
            .with("n", Value::Null)
            .with("list", vec![Value::Int(1), Value::from("a\"b"), Value::Bool(false)])
            .with("re", Value::Regex {
                pattern: "^ab".to_string(),
                options: "i".to_string(),
            })
            .with("oid", Value::ObjectId([0xab; 12]));
        assert_eq!(
            display_document(&doc).unwrap(),
            r#"{n: null, list: [1, "a\"b", false], re: /^ab/i, oid: ObjectId("abababababababababababab")}"#
        );
    }

    #[test]
    fn test_display_rejects_unknown_types() {
        let doc = Document::new().with("x", Value::Foreign("MaxKey".to_string()));
        assert!(display_document(&doc).is_err());
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(12.5), "12.50");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(format_float(100.0), "100.0");
        assert_eq!(format_float(2.0 / 3.0), "0.67");
    }

    #[test]
    fn test_format_last_sync() {
        assert_eq!(format_last_sync(None), "never");
        assert_eq!(format_last_sync(Some(Utc::now() - Duration::minutes(5))), "5m ago");
        assert_eq!(format_relative_time(Utc::now() + Duration::minutes(1)), "just now");
    }
}
