//! Field-path parsing and safe-name validation.
//!
//! Every identifier or path segment that is ever inlined into SQL text
//! passes through [`validate_name`] first; anything that cannot be verified
//! is rejected with [`TranslateError::InvalidPath`]. This is the one defect
//! class the crate makes impossible by construction - values that fail the
//! check never reach a SQL string, they flow through parameters or raise.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, TranslateError};

/// Safe-name shape for path segments, identifiers and collection names.
static SAFE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("safe-name regex is valid")
});

/// Shape of a `$[ident]` positional token.
static FILTERED_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$\[([A-Za-z_][A-Za-z0-9_-]*)\]$").expect("filtered-token regex is valid")
});

/// One segment of a dotted field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Plain name segment; always passes [`validate_name`].
    Field(String),
    /// Non-negative integer array index.
    Index(u64),
    /// The `$` token: the single array index matched by the query.
    MatchedPosition,
    /// The `$[]` token: every element of the enclosing array.
    AllElements,
    /// A `$[ident]` token: elements selected by the named array filter.
    Filtered(String),
}

impl Segment {
    /// Whether this segment is one of the positional tokens.
    #[must_use]
    pub const fn is_positional(&self) -> bool {
        matches!(self, Self::MatchedPosition | Self::AllElements | Self::Filtered(_))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{name}"),
            Self::Index(n) => write!(f, "{n}"),
            Self::MatchedPosition => write!(f, "$"),
            Self::AllElements => write!(f, "$[]"),
            Self::Filtered(ident) => write!(f, "$[{ident}]"),
        }
    }
}

/// A parsed, validated field path: a non-empty sequence of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    /// Borrow the segments.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether any segment is a positional token.
    #[must_use]
    pub fn has_positional(&self) -> bool {
        self.segments.iter().any(Segment::is_positional)
    }

    /// The original dotted form, used in error messages and the update
    /// translator's conflict map.
    #[must_use]
    pub fn dotted(&self) -> String {
        self.segments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Render as a host-store JSON path rooted at `$`.
    ///
    /// Plain segments become `.name`, integer segments become `[N]`, and
    /// positional tokens keep their surface form for a later rewrite pass.
    /// Every character of the result has been verified.
    #[must_use]
    pub fn to_json_path(&self) -> String {
        json_path_of(&self.segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dotted())
    }
}

/// Render a slice of segments as a JSON path rooted at `$`.
#[must_use]
pub fn json_path_of(segments: &[Segment]) -> String {
    let mut out = String::from("$");
    for segment in segments {
        match segment {
            Segment::Field(name) => {
                out.push('.');
                out.push_str(name);
            }
            Segment::Index(n) => {
                out.push('[');
                out.push_str(&n.to_string());
                out.push(']');
            }
            Segment::MatchedPosition => out.push_str(".$"),
            Segment::AllElements => out.push_str(".$[]"),
            Segment::Filtered(ident) => {
                out.push_str(".$[");
                out.push_str(ident);
                out.push(']');
            }
        }
    }
    out
}

/// Validate a bare identifier against the safe-name rules.
///
/// Passes iff the text matches `^[A-Za-z_][A-Za-z0-9_-]*$`. Positional
/// tokens, empty strings, dots and SQL metacharacters all fail.
///
/// # Errors
///
/// Returns [`TranslateError::InvalidPath`] naming the offending text.
pub fn validate_name(text: &str) -> Result<()> {
    if SAFE_NAME.is_match(text) {
        Ok(())
    } else {
        Err(TranslateError::invalid_path(format!(
            "'{text}' is not a valid field name"
        )))
    }
}

/// Parse a dotted field path into validated segments.
///
/// # Errors
///
/// Returns [`TranslateError::InvalidPath`] for an empty path, an empty
/// segment, or a segment that is neither a safe name, a non-negative
/// integer, nor one of the positional tokens `$`, `$[]`, `$[ident]`.
pub fn parse_path(text: &str) -> Result<FieldPath> {
    if text.is_empty() {
        return Err(TranslateError::invalid_path("empty field path"));
    }
    let mut segments = Vec::new();
    for piece in text.split('.') {
        segments.push(parse_segment(piece, text)?);
    }
    Ok(FieldPath { segments })
}

fn parse_segment(piece: &str, path: &str) -> Result<Segment> {
    if piece.is_empty() {
        return Err(TranslateError::invalid_path(format!(
            "empty segment in path '{path}'"
        )));
    }
    if piece == "$" {
        return Ok(Segment::MatchedPosition);
    }
    if piece == "$[]" {
        return Ok(Segment::AllElements);
    }
    if let Some(caps) = FILTERED_TOKEN.captures(piece) {
        return Ok(Segment::Filtered(caps[1].to_string()));
    }
    if piece.bytes().all(|b| b.is_ascii_digit()) {
        let index: u64 = piece.parse().map_err(|_| {
            TranslateError::invalid_path(format!("index '{piece}' out of range in path '{path}'"))
        })?;
        return Ok(Segment::Index(index));
    }
    if SAFE_NAME.is_match(piece) {
        return Ok(Segment::Field(piece.to_string()));
    }
    Err(TranslateError::invalid_path(format!(
        "invalid segment '{piece}' in path '{path}'"
    )))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path() {
        let path = parse_path("address.city").unwrap();
        assert_eq!(path.to_json_path(), "$.address.city");
        assert!(!path.has_positional());
    }

    #[test]
    fn test_numeric_index_segment() {
        let path = parse_path("items.0.name").unwrap();
        assert_eq!(path.to_json_path(), "$.items[0].name");
    }

    #[test]
    fn test_positional_tokens() {
        let path = parse_path("items.$.qty").unwrap();
        assert_eq!(path.segments()[1], Segment::MatchedPosition);
        assert_eq!(path.to_json_path(), "$.items.$.qty");

        let path = parse_path("items.$[].qty").unwrap();
        assert_eq!(path.segments()[1], Segment::AllElements);

        let path = parse_path("items.$[elem].qty").unwrap();
        assert_eq!(path.segments()[1], Segment::Filtered("elem".to_string()));
        assert!(path.has_positional());
    }

    #[test]
    fn test_rejects_dollar_prefixed_name() {
        assert!(parse_path("$set").is_err());
        assert!(parse_path("a.$bad").is_err());
    }

    #[test]
    fn test_rejects_empty_and_metacharacters() {
        assert!(parse_path("").is_err());
        assert!(parse_path("a..b").is_err());
        assert!(parse_path("a.b'c").is_err());
        assert!(parse_path("a;drop").is_err());
        assert!(parse_path("a b").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("users").is_ok());
        assert!(validate_name("_id").is_ok());
        assert!(validate_name("first-name").is_ok());
        assert!(validate_name("0abc").is_err());
        assert!(validate_name("$").is_err());
        assert!(validate_name("a.b").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn test_dotted_round_trip() {
        let path = parse_path("items.$[elem].qty").unwrap();
        assert_eq!(path.dotted(), "items.$[elem].qty");
    }

    #[test]
    fn test_deep_path() {
        let text = (0..12).map(|i| format!("s{i}")).collect::<Vec<_>>().join(".");
        let path = parse_path(&text).unwrap();
        assert_eq!(path.segments().len(), 12);
        assert!(path.to_json_path().starts_with("$.s0.s1"));
    }
}
