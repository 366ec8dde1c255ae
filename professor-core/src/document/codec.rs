//! Tagged-JSON storage encoding for documents
//!
//! A key starting with a single `$` tags one of the kinds JSON cannot express
//! natively:
//!
//! | Kind | Encoding |
//! |------|----------|
//! | timestamp | `{"$date": "<RFC 3339>"}` |
//! | object id | `{"$oid": "<24 hex chars>"}` |
//! | regex | `{"$regex": "<pattern>", "$options": "<flags>"}` |
//! | binary | `{"$binary": "<hex>", "$type": <subtype>}` |
//! | code | `{"$code": "<source>"}` |
//! | reference | `{"$ref": "<collection>", "$id": <value>}` |
//! | non-finite float | `{"$double": "NaN" \| "Infinity" \| "-Infinity"}` |
//!
//! Document keys that start with `$` (query operators such as `$gt`, or a
//! literal `$date` field) are written with one extra leading `$` and read back
//! without it, so tags and keys never collide. Sanitized documents have no
//! such keys and are written unchanged.

use super::{check_depth, Document, Value};
use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Number};

/// Encode a document as tagged JSON.
pub fn encode_document(doc: &Document) -> Result<serde_json::Value> {
    encode_document_at(doc, 0)
}

/// Decode a document from tagged JSON.
pub fn decode_document(json: &serde_json::Value) -> Result<Document> {
    match json {
        serde_json::Value::Object(map) => decode_map(map, 0),
        other => Err(Error::Codec(format!("expected object, found {}", other))),
    }
}

/// Encode a document to a JSON string for a storage column.
pub fn to_string(doc: &Document) -> Result<String> {
    Ok(encode_document(doc)?.to_string())
}

/// Decode a document from a JSON string read from a storage column.
pub fn from_str(s: &str) -> Result<Document> {
    let json: serde_json::Value = serde_json::from_str(s)?;
    decode_document(&json)
}

fn encode_document_at(doc: &Document, depth: usize) -> Result<serde_json::Value> {
    check_depth(depth)?;
    let mut map = Map::with_capacity(doc.len());
    for (key, value) in doc {
        map.insert(escape_key(key), encode_value(value, depth)?);
    }
    Ok(serde_json::Value::Object(map))
}

fn encode_value(value: &Value, depth: usize) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => match Number::from_f64(*f) {
            Some(n) => serde_json::Value::Number(n),
            None => json!({ "$double": non_finite_label(*f) }),
        },
        Value::String(s) => json!(s),
        Value::Timestamp(ts) => {
            json!({ "$date": ts.to_rfc3339_opts(SecondsFormat::AutoSi, true) })
        }
        Value::ObjectId(bytes) => json!({ "$oid": hex::encode(bytes) }),
        Value::Regex { pattern, options } => json!({ "$regex": pattern, "$options": options }),
        Value::Binary { subtype, bytes } => json!({ "$binary": hex::encode(bytes), "$type": subtype }),
        Value::Code(code) => json!({ "$code": code }),
        Value::Reference { collection, id } => {
            value.check_scalar()?;
            json!({ "$ref": collection, "$id": encode_value(id, depth)? })
        }
        Value::Document(doc) => encode_document_at(doc, depth + 1)?,
        Value::Array(items) => {
            check_depth(depth + 1)?;
            serde_json::Value::Array(
                items
                    .iter()
                    .map(|v| encode_value(v, depth + 1))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        Value::Foreign(name) => return Err(Error::UnsupportedType(name.clone())),
    })
}

fn escape_key(key: &str) -> String {
    if key.starts_with('$') {
        format!("${}", key)
    } else {
        key.to_string()
    }
}

fn unescape_key(key: &str) -> String {
    match key.strip_prefix('$') {
        Some(rest) if rest.starts_with('$') => rest.to_string(),
        _ => key.to_string(),
    }
}

fn is_tag(key: &str) -> bool {
    key.starts_with('$') && !key.starts_with("$$")
}

fn non_finite_label(f: f64) -> &'static str {
    if f.is_nan() {
        "NaN"
    } else if f.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn decode_map(map: &Map<String, serde_json::Value>, depth: usize) -> Result<Document> {
    check_depth(depth)?;
    map.iter()
        .map(|(k, v)| Ok((unescape_key(k), decode_value(v, depth)?)))
        .collect()
}

fn decode_value(json: &serde_json::Value, depth: usize) -> Result<Value> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            check_depth(depth + 1)?;
            Value::Array(
                items
                    .iter()
                    .map(|v| decode_value(v, depth + 1))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        serde_json::Value::Object(map) => {
            if map.keys().any(|k| is_tag(k)) {
                decode_tagged(map, depth)?
            } else {
                Value::Document(decode_map(map, depth + 1)?)
            }
        }
    })
}

fn str_field<'a>(map: &'a Map<String, serde_json::Value>, key: &str) -> Result<&'a str> {
    map.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Codec(format!("tag {} requires a string", key)))
}

fn decode_tagged(map: &Map<String, serde_json::Value>, depth: usize) -> Result<Value> {
    if map.contains_key("$date") {
        let raw = str_field(map, "$date")?;
        let ts = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| Error::Codec(format!("invalid $date {:?}: {}", raw, e)))?;
        return Ok(Value::Timestamp(ts.with_timezone(&Utc)));
    }
    if map.contains_key("$oid") {
        let raw = str_field(map, "$oid")?;
        let bytes = hex::decode(raw).map_err(|e| Error::Codec(format!("invalid $oid: {}", e)))?;
        let id: [u8; 12] = bytes
            .try_into()
            .map_err(|_| Error::Codec(format!("$oid must be 12 bytes: {}", raw)))?;
        return Ok(Value::ObjectId(id));
    }
    if map.contains_key("$regex") {
        return Ok(Value::Regex {
            pattern: str_field(map, "$regex")?.to_string(),
            options: map
                .get("$options")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        });
    }
    if map.contains_key("$binary") {
        let bytes = hex::decode(str_field(map, "$binary")?)
            .map_err(|e| Error::Codec(format!("invalid $binary: {}", e)))?;
        let subtype = map
            .get("$type")
            .and_then(|v| v.as_u64())
            .and_then(|n| u8::try_from(n).ok())
            .unwrap_or(0);
        return Ok(Value::Binary { subtype, bytes });
    }
    if map.contains_key("$code") {
        return Ok(Value::Code(str_field(map, "$code")?.to_string()));
    }
    if map.contains_key("$ref") {
        let id = map
            .get("$id")
            .ok_or_else(|| Error::Codec("$ref without $id".to_string()))?;
        return Ok(Value::Reference {
            collection: str_field(map, "$ref")?.to_string(),
            id: Box::new(decode_value(id, depth)?),
        });
    }
    if map.contains_key("$double") {
        return match str_field(map, "$double")? {
            "NaN" => Ok(Value::Float(f64::NAN)),
            "Infinity" => Ok(Value::Float(f64::INFINITY)),
            "-Infinity" => Ok(Value::Float(f64::NEG_INFINITY)),
            other => Err(Error::Codec(format!("invalid $double: {}", other))),
        };
    }

    let keys: Vec<_> = map.keys().map(String::as_str).collect();
    Err(Error::Codec(format!("unrecognized tagged value with keys {:?}", keys)))
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        encode_document(self)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        decode_document(&json).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn special_document() -> Document {
        Document::new()
            .with("ts", Utc.with_ymd_and_hms(2011, 9, 19, 15, 8, 1).unwrap())
            .with("_id", Value::ObjectId([7; 12]))
            .with(
                "name",
                Value::Regex {
                    pattern: "^ab".to_string(),
                    options: "i".to_string(),
                },
            )
            .with(
                "blob",
                Value::Binary {
                    subtype: 4,
                    bytes: vec![1, 2, 3],
                },
            )
            .with("fn", Value::Code("function(){}".to_string()))
            .with(
                "owner",
                Value::Reference {
                    collection: "users".to_string(),
                    id: Box::new(Value::Int(123)),
                },
            )
            .with("ratio", f64::INFINITY)
            .with("nested", Document::new().with("list", vec![Value::Int(1), Value::Float(2.5)]))
    }

    #[test]
    fn test_special_kinds_survive_storage() {
        let doc = special_document();
        let stored = to_string(&doc).unwrap();
        let restored = from_str(&stored).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn test_tagged_layout() {
        let doc = Document::new().with("_id", Value::ObjectId([0; 12]));
        let json = encode_document(&doc).unwrap();
        assert_eq!(json, json!({"_id": {"$oid": "000000000000000000000000"}}));
    }

    #[test]
    fn test_operator_keys_survive_storage() {
        let doc = Document::new()
            .with("age", Document::new().with("$gt", 21))
            .with("$date", "not a timestamp")
            .with("$", Document::new().with("$$x", 1));
        let json = encode_document(&doc).unwrap();
        assert_eq!(
            json,
            json!({"age": {"$$gt": 21}, "$$date": "not a timestamp", "$$": {"$$$x": 1}})
        );
        assert_eq!(decode_document(&json).unwrap(), doc);
    }

    #[test]
    fn test_sanitized_keys_written_unchanged() {
        let doc = Document::new().with("_$_in", vec![Value::Int(1)]);
        let json = encode_document(&doc).unwrap();
        assert_eq!(json, json!({"_$_in": [1]}));
    }

    #[test]
    fn test_encode_rejects_foreign() {
        let doc = Document::new().with("a", Value::Foreign("MaxKey".to_string()));
        match encode_document(&doc) {
            Err(Error::UnsupportedType(name)) => assert_eq!(name, "MaxKey"),
            other => panic!("expected UnsupportedType, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let json = json!({"a": {"$numberDecimal": "1.5"}});
        assert!(matches!(decode_document(&json), Err(Error::Codec(_))));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(decode_document(&json!([1, 2])), Err(Error::Codec(_))));
    }
}
