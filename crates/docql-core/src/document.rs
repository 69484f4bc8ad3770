//! The document value tree the translators operate on.
//!
//! A [`Document`] is a JSON-compatible tagged variant extended with the
//! scalar types a document database carries beyond JSON: byte strings,
//! timestamps, object ids and arbitrary-precision decimals. Object keys
//! keep their input order ([`indexmap::IndexMap`]); the translators and
//! their tests depend on that order.
//!
//! Extended scalars cross the SQL boundary in a canonical textual form
//! (see [`Document::canonical_json`]):
//!
//! - `ObjectId` - 24-char lowercase hex
//! - `Timestamp` - RFC 3339 UTC with milliseconds
//! - `Bytes` - standard-alphabet base64
//! - `Decimal` - the decimal's own text

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{Result, TranslateError};

/// Numeric document value.
///
/// `Decimal` is carried textually and handed to the host store as a text
/// parameter; the core never does decimal arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub enum Number {
    /// 64-bit signed integer.
    Int(i64),
    /// IEEE-754 double.
    Double(f64),
    /// Arbitrary-precision decimal, textual.
    Decimal(String),
}

impl Number {
    /// Check that the number is finite (always true for `Int`/`Decimal`).
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Int(_) | Self::Decimal(_) => true,
            Self::Double(d) => d.is_finite(),
        }
    }

    /// Render the number as its shortest round-trip JSON text.
    #[must_use]
    pub fn to_json_text(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            // serde_json uses ryu: shortest form that round-trips.
            Self::Double(d) => serde_json::Number::from_f64(*d)
                .map_or_else(|| "null".to_string(), |n| n.to_string()),
            Self::Decimal(s) => s.clone(),
        }
    }
}

/// An ordered string-keyed mapping of document values.
pub type Object = IndexMap<String, Document>;

/// A document tree value.
///
/// Operator keys begin with `$`; regular keys do not. The translators take
/// these by reference and never mutate them - translation is a pure
/// function of its input.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Numeric value.
    Number(Number),
    /// UTF-8 string.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// Point in time.
    Timestamp(DateTime<Utc>),
    /// 12-byte object identifier.
    ObjectId([u8; 12]),
    /// Ordered sequence of documents.
    Array(Vec<Document>),
    /// Ordered mapping of string keys to documents.
    Object(Object),
}

impl Document {
    /// Short name of the variant, used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(Number::Int(_)) => "int",
            Self::Number(Number::Double(_)) => "double",
            Self::Number(Number::Decimal(_)) => "decimal",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
            Self::ObjectId(_) => "objectId",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Borrow as an object, if this is one.
    #[must_use]
    pub const fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow as an array, if this is one.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Document]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as a string, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Extract an `i64`, if this is an integer.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(Number::Int(i)) => Some(*i),
            _ => None,
        }
    }

    /// Check whether this is a scalar (neither array nor object).
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        !matches!(self, Self::Array(_) | Self::Object(_))
    }

    /// Check whether this is an object whose first key starts with `$`.
    ///
    /// In a filter, such an object is an operator object rather than a
    /// literal value.
    #[must_use]
    pub fn is_operator_object(&self) -> bool {
        match self {
            Self::Object(map) => map.keys().next().is_some_and(|k| k.starts_with('$')),
            _ => false,
        }
    }

    /// Serialise to canonical JSON: RFC 8259, no whitespace, keys in input
    /// order, numbers in shortest round-trip form. Extended scalars embed
    /// as their canonical string forms.
    #[must_use]
    pub fn canonical_json(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Number(n) => out.push_str(&n.to_json_text()),
            Self::String(s) => out.push_str(&escape_json_string(s)),
            Self::Bytes(b) => out.push_str(&escape_json_string(&BASE64.encode(b))),
            Self::Timestamp(t) => out.push_str(&escape_json_string(&canonical_timestamp(t))),
            Self::ObjectId(oid) => out.push_str(&escape_json_string(&hex::encode(oid))),
            Self::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            Self::Object(map) => {
                out.push('{');
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&escape_json_string(key));
                    out.push(':');
                    value.write_canonical(out);
                }
                out.push('}');
            }
        }
    }

    /// Convert a `serde_json::Value` into a document.
    ///
    /// Extended-JSON wrappers are recognised so callers working from plain
    /// JSON can express the non-JSON scalars:
    /// `{"$oid": "..."}` (24-char hex), `{"$date": "..."}` (RFC 3339),
    /// `{"$numberDecimal": "..."}` and `{"$binary": "..."}` (base64).
    ///
    /// # Errors
    ///
    /// Returns [`TranslateError::InvalidArgument`] when an extended-JSON
    /// wrapper carries a malformed payload.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Number(Number::Int(i)))
                } else if let Some(d) = n.as_f64() {
                    Ok(Self::Number(Number::Double(d)))
                } else {
                    // u64 beyond i64 range: carry textually.
                    Ok(Self::Number(Number::Decimal(n.to_string())))
                }
            }
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Array(items) => {
                let converted: Result<Vec<_>> = items.iter().map(Self::from_json).collect();
                Ok(Self::Array(converted?))
            }
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(doc) = extended_scalar(map)? {
                        return Ok(doc);
                    }
                }
                let mut object = Object::with_capacity(map.len());
                for (key, val) in map {
                    object.insert(key.clone(), Self::from_json(val)?);
                }
                Ok(Self::Object(object))
            }
        }
    }
}

/// Recognise a single-key extended-JSON wrapper; `Ok(None)` means the map is
/// an ordinary object.
fn extended_scalar(map: &serde_json::Map<String, Value>) -> Result<Option<Document>> {
    let (key, value) = map.iter().next().expect("caller checked len == 1");
    match (key.as_str(), value) {
        ("$oid", Value::String(s)) => {
            let bytes = hex::decode(s)
                .map_err(|_| TranslateError::invalid_argument(format!("$oid is not hex: '{s}'")))?;
            let oid: [u8; 12] = bytes.try_into().map_err(|_| {
                TranslateError::invalid_argument(format!("$oid must be 12 bytes: '{s}'"))
            })?;
            Ok(Some(Document::ObjectId(oid)))
        }
        ("$date", Value::String(s)) => {
            let parsed = DateTime::parse_from_rfc3339(s).map_err(|_| {
                TranslateError::invalid_argument(format!("$date is not RFC 3339: '{s}'"))
            })?;
            Ok(Some(Document::Timestamp(parsed.with_timezone(&Utc))))
        }
        ("$numberDecimal", Value::String(s)) => {
            Ok(Some(Document::Number(Number::Decimal(s.clone()))))
        }
        ("$binary", Value::String(s)) => {
            let bytes = BASE64.decode(s).map_err(|_| {
                TranslateError::invalid_argument(format!("$binary is not base64: '{s}'"))
            })?;
            Ok(Some(Document::Bytes(bytes)))
        }
        _ => Ok(None),
    }
}

/// Render a timestamp in its canonical form: RFC 3339 UTC with milliseconds.
#[must_use]
pub fn canonical_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// JSON-escape a string, quotes included.
fn escape_json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Document {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Document {
    fn from(i: i64) -> Self {
        Self::Number(Number::Int(i))
    }
}

impl From<f64> for Document {
    fn from(d: f64) -> Self {
        Self::Number(Number::Double(d))
    }
}

impl From<&str> for Document {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Document {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

// ============================================================================
// Tests
// ============================================================================
