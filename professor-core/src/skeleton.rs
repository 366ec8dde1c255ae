//! Query shape fingerprints ("skeletons")
//!
//! A skeleton keeps the keys and nesting of a document and drops every scalar
//! value, so queries that differ only in their literals share one skeleton:
//!
//! ```rust
//! use professor_core::document::Document;
//! use professor_core::skeleton::skeleton;
//!
//! let query = Document::new()
//!     .with("status", "new")
//!     .with("age", Document::new().with("$gt", 21));
//! assert_eq!(skeleton(&query).unwrap(), "{age:{$gt},status}");
//! ```
//!
//! Rules:
//! - documents render as `{k1,k2:sub,...}` with keys in ordinal order; a key
//!   whose value is a container is followed by `:` and the container's skeleton
//! - arrays render as `[sub,...]` in element order, but only container
//!   elements appear. Scalar elements vanish, so `[1,2,3]` renders `[]` and
//!   `[{b:1},2]` renders `[{b}]`. Existing stored skeletons depend on this.

use crate::document::{check_depth, Document, Value};
use crate::error::Result;

/// Compute the skeleton of a document.
///
/// Fails with [`Error::UnsupportedType`](crate::Error::UnsupportedType) if any
/// value at any depth is outside the recognized type set; no partial skeleton
/// is ever returned.
pub fn skeleton(doc: &Document) -> Result<String> {
    document_skeleton(doc, 0)
}

/// Skeleton of a single value: `None` for scalars.
pub fn value_skeleton(value: &Value) -> Result<Option<String>> {
    value_skeleton_at(value, 0)
}

fn value_skeleton_at(value: &Value, depth: usize) -> Result<Option<String>> {
    match value {
        Value::Document(doc) => document_skeleton(doc, depth + 1).map(Some),
        Value::Array(items) => array_skeleton(items, depth + 1).map(Some),
        scalar => {
            scalar.check_scalar()?;
            Ok(None)
        }
    }
}

fn document_skeleton(doc: &Document, depth: usize) -> Result<String> {
    check_depth(depth)?;

    let mut entries: Vec<(&String, &Value)> = doc.iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut parts = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        match value_skeleton_at(value, depth)? {
            Some(sub) => parts.push(format!("{}:{}", key, sub)),
            None => parts.push(key.clone()),
        }
    }

    Ok(format!("{{{}}}", parts.join(",")))
}

fn array_skeleton(items: &[Value], depth: usize) -> Result<String> {
    check_depth(depth)?;

    let mut parts = Vec::new();
    for item in items {
        if let Some(sub) = value_skeleton_at(item, depth)? {
            parts.push(sub);
        }
    }

    Ok(format!("[{}]", parts.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::Utc;
    use serde_json::json;

    fn skel(value: serde_json::Value) -> String {
        skeleton(&Document::from(value)).unwrap()
    }

    #[test]
    fn test_skeleton_simple() {
        assert_eq!(skel(json!({})), "{}");
        assert_eq!(skel(json!({"hello": "world"})), "{hello}");
        assert_eq!(skel(json!({"hello": "world", "foo": "bar"})), "{foo,hello}");
    }

    #[test]
    fn test_key_order_ignores_insertion_order() {
        let a = Document::new().with("b", 1).with("a", 2);
        let b = Document::new().with("a", 2).with("b", 1);
        assert_eq!(skeleton(&a).unwrap(), "{a,b}");
        assert_eq!(skeleton(&a).unwrap(), skeleton(&b).unwrap());
    }

    #[test]
    fn test_keys_sort_ordinally() {
        // Uppercase sorts before lowercase, `$` before letters
        let doc = Document::new().with("b", 1).with("B", 1).with("$in", 1);
        assert_eq!(skeleton(&doc).unwrap(), "{$in,B,b}");
    }

    #[test]
    fn test_skeleton_list() {
        assert_eq!(skel(json!({"a": []})), "{a:[]}");
        assert_eq!(skel(json!({"a": [1, 2, 3]})), "{a:[]}");
        assert_eq!(skel(json!({"a": [{"b": 1}, {"b": 2}]})), "{a:[{b},{b}]}");
        assert_eq!(skel(json!({"a": [{"b": 1}, {"c": 2}]})), "{a:[{b},{c}]}");
        // scalar entries vanish from mixed lists
        assert_eq!(skel(json!({"a": [{"b": 1}, 2]})), "{a:[{b}]}");
    }

    #[test]
    fn test_nested_lists_keep_order() {
        assert_eq!(skel(json!({"a": [[{"z": 1}], {"y": 1}]})), "{a:[[{z}],{y}]}");
    }

    #[test]
    fn test_skeleton_embedded_objects() {
        assert_eq!(skel(json!({"a": {"b": 1}})), "{a:{b}}");
        assert_eq!(skel(json!({"a": {"b": 1}, "c": 1})), "{a:{b},c}");
        assert_eq!(skel(json!({"a": {"b": 1, "d": 2}, "c": 1})), "{a:{b,d},c}");
    }

    #[test]
    fn test_values_do_not_matter() {
        let a = skel(json!({"user": {"name": "ann", "age": 30}, "tags": [{"t": "x"}]}));
        let b = skel(json!({"user": {"name": "bob", "age": 99}, "tags": [{"t": "y"}]}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_skeleton_types() {
        let scalars = vec![
            Value::Int(1),
            Value::Float(1.0),
            Value::from("1"),
            Value::Bool(true),
            Value::Timestamp(Utc::now()),
            Value::ObjectId([0; 12]),
            Value::Regex {
                pattern: "^$".to_string(),
                options: String::new(),
            },
            Value::Code("function(){}".to_string()),
            Value::Null,
            Value::Binary {
                subtype: 0,
                bytes: b"123456".to_vec(),
            },
            Value::Reference {
                collection: "coll".to_string(),
                id: Box::new(Value::Int(123)),
            },
        ];

        for value in scalars {
            let kind = value.kind();
            let doc = Document::new().with("a", value);
            assert_eq!(skeleton(&doc).unwrap(), "{a}", "kind {}", kind);
        }
    }

    #[test]
    fn test_error_names_type() {
        let doc = Document::new().with("a", Value::Foreign("NonBsonType".to_string()));
        match skeleton(&doc) {
            Err(Error::UnsupportedType(name)) => assert_eq!(name, "NonBsonType"),
            other => panic!("expected UnsupportedType, got {:?}", other),
        }
        let message = skeleton(&doc).unwrap_err().to_string();
        assert_eq!(message, "unknown document type <NonBsonType>");
    }

    #[test]
    fn test_error_at_depth() {
        // A scalar inside a list would normally vanish, but an unknown one still fails
        let doc = Document::new().with(
            "a",
            Document::new().with("b", vec![Value::Int(1), Value::Foreign("Symbol".into())]),
        );
        assert!(matches!(skeleton(&doc), Err(Error::UnsupportedType(name)) if name == "Symbol"));
    }

    #[test]
    fn test_pathological_depth_is_rejected() {
        let mut value = Value::Array(vec![]);
        for _ in 0..500 {
            value = Value::Array(vec![value]);
        }
        let doc = Document::new().with("a", value);
        assert!(matches!(skeleton(&doc), Err(Error::NestingTooDeep { .. })));
    }

    #[test]
    fn test_value_skeleton_scalar_is_none() {
        assert_eq!(value_skeleton(&Value::Int(3)).unwrap(), None);
        assert_eq!(
            value_skeleton(&Value::Array(vec![Value::Int(3)])).unwrap(),
            Some("[]".to_string())
        );
    }
}
