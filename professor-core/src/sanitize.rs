//! Reversible escaping of document keys for storage
//!
//! The profile store forbids `$` and `.` in field names, while captured
//! queries are full of them (`$in`, `"address.city"`). Before a record is
//! persisted every key is rewritten:
//!
//! | Character | Escape |
//! |-----------|--------|
//! | `$` | `_$_` |
//! | `.` | `_,_` |
//!
//! Only map keys change; scalar values and list elements are left as they
//! are, though documents inside lists have their own keys escaped.
//!
//! ## Known limitation
//!
//! A key that already contains `_$_` or `_,_` before sanitizing does not come
//! back unchanged from [`desanitize`]. Neither does a key where an underscore
//! or comma sits next to a `$` or `.` so that the escaped form contains a new
//! escape sequence: `_,.` becomes `_,_,_`, which reads back as `.,_`. Such
//! keys are passed through rather than rejected or disambiguated.

use crate::document::{check_depth, Document, Value};
use crate::error::Result;

/// Escape sequence written in place of `$`
pub const DOLLAR_ESCAPE: &str = "_$_";

/// Escape sequence written in place of `.`
pub const DOT_ESCAPE: &str = "_,_";

/// Return a copy of `doc` with every key escaped, recursively.
///
/// Fails with [`Error::UnsupportedType`](crate::Error::UnsupportedType) if any
/// value at any depth is outside the recognized type set.
pub fn sanitize(doc: &Document) -> Result<Document> {
    rewrite_document(doc, 0, &sanitize_key)
}

/// Inverse of [`sanitize`].
pub fn desanitize(doc: &Document) -> Result<Document> {
    rewrite_document(doc, 0, &desanitize_key)
}

/// Escape a single key.
///
/// Works character by character, so the `$` inside a freshly written dot
/// escape can never be escaped a second time.
pub fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for c in key.chars() {
        match c {
            '$' => out.push_str(DOLLAR_ESCAPE),
            '.' => out.push_str(DOT_ESCAPE),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`sanitize_key`].
pub fn desanitize_key(key: &str) -> String {
    key.replace(DOLLAR_ESCAPE, "$").replace(DOT_ESCAPE, ".")
}

fn rewrite_document(doc: &Document, depth: usize, rewrite: &dyn Fn(&str) -> String) -> Result<Document> {
    check_depth(depth)?;
    doc.iter()
        .map(|(key, value)| Ok((rewrite(key), rewrite_value(value, depth, rewrite)?)))
        .collect()
}

fn rewrite_value(value: &Value, depth: usize, rewrite: &dyn Fn(&str) -> String) -> Result<Value> {
    match value {
        Value::Document(doc) => rewrite_document(doc, depth + 1, rewrite).map(Value::Document),
        Value::Array(items) => {
            check_depth(depth + 1)?;
            items
                .iter()
                .map(|item| rewrite_value(item, depth + 1, rewrite))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        scalar => {
            scalar.check_scalar()?;
            Ok(scalar.clone())
        }
    }
}
