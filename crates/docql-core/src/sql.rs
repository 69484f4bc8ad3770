//! SQL fragments, positional parameters and literal encoding.
//!
//! A [`Translation`] is the unit every translator returns: a UTF-8 SQL
//! fragment plus the ordered parameter list backing its `?` placeholders.
//! Internally the translators follow the generator convention of threading
//! a mutable parameter buffer through the recursion and returning fragment
//! strings; [`Translation`] is assembled once at the public boundary.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;

use crate::document::{canonical_timestamp, Document, Number};
use crate::error::{Result, TranslateError};

/// A scalar bound to one `?` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// IEEE-754 double.
    Real(f64),
    /// Arbitrary-precision decimal, textual.
    Decimal(String),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for SqlValue {
    fn from(d: f64) -> Self {
        Self::Real(d)
    }
}

/// An immutable SQL fragment with its positional parameters.
///
/// Every `?` in `sql` corresponds positionally to one entry in `params`,
/// left to right.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Translation {
    /// The SQL text fragment.
    pub sql: String,
    /// Parameters backing the fragment's placeholders, in order.
    pub params: Vec<SqlValue>,
}

impl Translation {
    /// Build a translation from a fragment and its parameters.
    #[must_use]
    pub const fn new(sql: String, params: Vec<SqlValue>) -> Self {
        Self { sql, params }
    }

    /// A fragment with no parameters.
    #[must_use]
    pub fn fragment(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Concatenate two translations, preserving left-to-right positional
    /// correspondence.
    #[must_use]
    pub fn concat(mut self, other: Self) -> Self {
        self.sql.push_str(&other.sql);
        self.params.extend(other.params);
        self
    }

    /// Count the `?` placeholders in the fragment.
    ///
    /// Safe to compute bytewise: verified names are the only text the
    /// translators inline, and `?` is not a verified character.
    #[must_use]
    pub fn placeholder_count(&self) -> usize {
        self.sql.bytes().filter(|b| *b == b'?').count()
    }
}

/// Encode a document value as a SQL literal fragment, appending its
/// parameters to `params`.
///
/// - `Null` encodes as `json('null')` with no parameters, so that equality
///   against a stored JSON null works;
/// - `Bool` encodes as `json(?)` over the text `"true"`/`"false"`;
/// - numbers and strings pass through as bare parameters;
/// - objects and arrays become `json(?)` over their canonical JSON;
/// - the extended scalars pass their canonical string forms as parameters.
///
/// # Errors
///
/// Returns [`TranslateError::InvalidArgument`] for a non-finite double.
pub fn encode_literal_into(value: &Document, params: &mut Vec<SqlValue>) -> Result<String> {
    match value {
        Document::Null => Ok("json('null')".to_string()),
        Document::Bool(b) => {
            params.push(SqlValue::Text(if *b { "true" } else { "false" }.to_string()));
            Ok("json(?)".to_string())
        }
        Document::Number(n) => {
            params.push(number_param(n)?);
            Ok("?".to_string())
        }
        Document::String(s) => {
            params.push(SqlValue::Text(s.clone()));
            Ok("?".to_string())
        }
        Document::Bytes(b) => {
            params.push(SqlValue::Text(BASE64.encode(b)));
            Ok("?".to_string())
        }
        Document::Timestamp(t) => {
            params.push(SqlValue::Text(canonical_timestamp(t)));
            Ok("?".to_string())
        }
        Document::ObjectId(oid) => {
            params.push(SqlValue::Text(hex::encode(oid)));
            Ok("?".to_string())
        }
        Document::Array(_) | Document::Object(_) => {
            params.push(SqlValue::Text(value.canonical_json()));
            Ok("json(?)".to_string())
        }
    }
}

/// Encode a document value as a standalone [`Translation`].
///
/// # Errors
///
/// Returns [`TranslateError::InvalidArgument`] for a non-finite double.
pub fn encode_literal(value: &Document) -> Result<Translation> {
    let mut params = Vec::new();
    let sql = encode_literal_into(value, &mut params)?;
    Ok(Translation::new(sql, params))
}

/// Convert a document number into a parameter scalar, rejecting
/// non-finite doubles.
pub(crate) fn number_param(n: &Number) -> Result<SqlValue> {
    match n {
        Number::Int(i) => Ok(SqlValue::Int(*i)),
        Number::Double(d) => {
            if d.is_finite() {
                Ok(SqlValue::Real(*d))
            } else {
                Err(TranslateError::invalid_argument(
                    "non-finite number cannot be encoded",
                ))
            }
        }
        Number::Decimal(s) => Ok(SqlValue::Decimal(s.clone())),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(&value).unwrap()
    }

    #[test]
    fn test_null_literal_has_no_params() {
        let t = encode_literal(&Document::Null).unwrap();
        assert_eq!(t.sql, "json('null')");
        assert!(t.params.is_empty());
    }

    #[test]
    fn test_bool_literal() {
        let t = encode_literal(&Document::Bool(true)).unwrap();
        assert_eq!(t.sql, "json(?)");
        assert_eq!(t.params, vec![SqlValue::Text("true".to_string())]);
    }

    #[test]
    fn test_scalar_literals_are_bare_params() {
        let t = encode_literal(&doc(json!("John"))).unwrap();
        assert_eq!(t.sql, "?");
        assert_eq!(t.params, vec![SqlValue::Text("John".to_string())]);

        let t = encode_literal(&doc(json!(42))).unwrap();
        assert_eq!(t.sql, "?");
        assert_eq!(t.params, vec![SqlValue::Int(42)]);
    }

    #[test]
    fn test_compound_literal_is_canonical_json() {
        let t = encode_literal(&doc(json!({"b": 1, "a": [2, 3]}))).unwrap();
        assert_eq!(t.sql, "json(?)");
        assert_eq!(t.params, vec![SqlValue::Text(r#"{"b":1,"a":[2,3]}"#.to_string())]);
    }

    #[test]
    fn test_non_finite_double_rejected() {
        let err = encode_literal(&Document::from(f64::NAN)).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_placeholder_count_matches_params() {
        let t = encode_literal(&doc(json!({"a": 1}))).unwrap();
        assert_eq!(t.placeholder_count(), t.params.len());
    }

    #[test]
    fn test_concat_preserves_order() {
        let a = Translation::new("a = ?".to_string(), vec![SqlValue::Int(1)]);
        let b = Translation::new(" AND b = ?".to_string(), vec![SqlValue::Int(2)]);
        let joined = a.concat(b);
        assert_eq!(joined.sql, "a = ? AND b = ?");
        assert_eq!(joined.params, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }
}
