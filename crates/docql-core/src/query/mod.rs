//! Filter documents compiled to boolean SQL predicates.
//!
//! [`QueryTranslator`] walks a filter document and emits a predicate over
//! the row's JSON column, threading one ordered parameter buffer through
//! the recursion. Parameters appear in the output depth-first, left to
//! right; tests depend on that ordering.
//!
//! # Example
//!
//! ```rust
//! use docql_core::query::QueryTranslator;
//! use docql_core::Document;
//! use serde_json::json;
//!
//! let filter = Document::from_json(&json!({"name": "John", "age": {"$gt": 18}})).unwrap();
//! let t = QueryTranslator::translate_query(&filter).unwrap();
//! assert_eq!(
//!     t.sql,
//!     "(json_extract(data,'$.name') = ? AND json_extract(data,'$.age') > ?)"
//! );
//! ```

pub(crate) mod field_ops;

use tracing::debug;

use crate::document::{Document, Object};
use crate::error::{Result, TranslateError};
use crate::path::{parse_path, FieldPath};
use crate::sql::{encode_literal_into, SqlValue, Translation};

pub use field_ops::FieldOperator;

/// The default row expression field paths extract from.
pub(crate) const ROOT: &str = "data";

/// Compiles filter documents into boolean predicates over a JSON column.
///
/// Stateless and pure: identical inputs yield byte-identical outputs.
pub struct QueryTranslator;

impl QueryTranslator {
    /// Compile a filter document into a predicate over the `data` column.
    ///
    /// An empty filter yields the universally true predicate `1=1` with no
    /// parameters.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for unsafe field names, `InvalidOperator` for unknown
    /// `$` keys, `InvalidArgument` for operator shape mismatches, and
    /// `Unsupported` for `$text`/`$where`.
    pub fn translate_query(filter: &Document) -> Result<Translation> {
        let object = filter.as_object().ok_or_else(|| {
            TranslateError::invalid_argument(format!(
                "filter must be an object, found {}",
                filter.kind()
            ))
        })?;
        let mut params = Vec::new();
        let sql = compile_filter(object, ROOT, &mut params)?;
        debug!(clauses = object.len(), sql_len = sql.len(), "translated query filter");
        Ok(Translation::new(sql, params))
    }
}

/// Compile a filter object into a predicate, extracting fields from `root`.
///
/// `root` is `data` at the top level and the `json_each` iteration value
/// inside `$elemMatch` sub-filters.
pub(crate) fn compile_filter(
    filter: &Object,
    root: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    if filter.is_empty() {
        return Ok("1=1".to_string());
    }
    let mut parts = Vec::with_capacity(filter.len());
    for (key, value) in filter {
        if let Some(part) = compile_clause(key, value, root, params)? {
            parts.push(part);
        }
    }
    if parts.is_empty() {
        // Filter held only ignorable keys such as $comment.
        return Ok("1=1".to_string());
    }
    Ok(join_group(parts, " AND "))
}

fn compile_clause(
    key: &str,
    value: &Document,
    root: &str,
    params: &mut Vec<SqlValue>,
) -> Result<Option<String>> {
    if let Some(op) = key.strip_prefix('$') {
        return match op {
            "and" | "or" | "nor" => Ok(Some(compile_logical(key, value, root, params)?)),
            "not" => {
                let inner = value.as_object().ok_or_else(|| {
                    TranslateError::invalid_argument(format!(
                        "$not requires an object argument, found {}",
                        value.kind()
                    ))
                })?;
                let compiled = compile_filter(inner, root, params)?;
                Ok(Some(format!("NOT ({compiled})")))
            }
            "expr" => {
                let compiled = crate::aggregation::expression::compile_into(value, root, params)?;
                Ok(Some(compiled))
            }
            "text" | "where" => Err(TranslateError::unsupported(format!(
                "{key} is delegated to the search component"
            ))),
            "comment" => Ok(None),
            _ => Err(TranslateError::invalid_operator(format!(
                "unknown query operator '{key}'"
            ))),
        };
    }
    Ok(Some(compile_field_clause(key, value, root, params)?))
}

fn compile_logical(
    key: &str,
    value: &Document,
    root: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let clauses = value.as_array().ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "{key} requires an array argument, found {}",
            value.kind()
        ))
    })?;
    if clauses.is_empty() {
        return Err(TranslateError::invalid_argument(format!(
            "{key} requires a non-empty array"
        )));
    }
    let mut parts = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let object = clause.as_object().ok_or_else(|| {
            TranslateError::invalid_argument(format!(
                "{key} members must be objects, found {}",
                clause.kind()
            ))
        })?;
        parts.push(compile_filter(object, root, params)?);
    }
    Ok(match key {
        "$and" => join_group(parts, " AND "),
        "$or" => join_group(parts, " OR "),
        // $nor is NOT (A OR B OR ...) - force the group parentheses.
        _ => format!("NOT ({})", parts.join(" OR ")),
    })
}

fn compile_field_clause(
    key: &str,
    value: &Document,
    root: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let path = parse_path(key)?;
    reject_positional(&path)?;
    let target = extract_expr(root, &path);

    if let Document::Object(object) = value {
        if value.is_operator_object() {
            return field_ops::compile_operator_object(object, &target, key, params);
        }
    }
    compile_implicit_eq(&target, value, params)
}

/// Implicit equality: the lean comparison form. `$eq` carries the
/// array-aware disjunction instead.
fn compile_implicit_eq(
    target: &str,
    value: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    if matches!(value, Document::Null) {
        // A null query value matches both an explicit null and a missing field.
        return Ok(format!("{target} IS NULL"));
    }
    let encoded = encode_literal_into(value, params)?;
    Ok(format!("{target} = {encoded}"))
}

/// Render the extraction expression for a path over `root`.
pub(crate) fn extract_expr(root: &str, path: &FieldPath) -> String {
    format!("json_extract({root},'{}')", path.to_json_path())
}

/// Reject positional tokens, which have no meaning in a query filter.
fn reject_positional(path: &FieldPath) -> Result<()> {
    if path.has_positional() {
        return Err(TranslateError::invalid_path(format!(
            "positional token not allowed in query path '{path}'"
        )));
    }
    Ok(())
}

/// Join predicate parts: a single part stands alone, several are
/// parenthesised as a group.
pub(crate) fn join_group(parts: Vec<String>, separator: &str) -> String {
    if parts.len() == 1 {
        parts.into_iter().next().expect("one part")
    } else {
        format!("({})", parts.join(separator))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn translate(filter: serde_json::Value) -> Translation {
        let doc = Document::from_json(&filter).unwrap();
        QueryTranslator::translate_query(&doc).unwrap()
    }

    fn translate_err(filter: serde_json::Value) -> TranslateError {
        let doc = Document::from_json(&filter).unwrap();
        QueryTranslator::translate_query(&doc).unwrap_err()
    }

    #[test]
    fn test_empty_filter_is_universally_true() {
        let t = translate(json!({}));
        assert_eq!(t.sql, "1=1");
        assert!(t.params.is_empty());
    }

    #[test]
    fn test_simple_equality_and_comparison() {
        let t = translate(json!({"name": "John", "age": {"$gt": 18}}));
        assert_eq!(
            t.sql,
            "(json_extract(data,'$.name') = ? AND json_extract(data,'$.age') > ?)"
        );
        assert_eq!(
            t.params,
            vec![SqlValue::Text("John".to_string()), SqlValue::Int(18)]
        );
    }

    #[test]
    fn test_single_clause_is_not_parenthesised() {
        let t = translate(json!({"name": "John"}));
        assert_eq!(t.sql, "json_extract(data,'$.name') = ?");
    }

    #[test]
    fn test_or_preserves_document_order() {
        let t = translate(json!({"$or": [{"a": 1}, {"b": 2}]}));
        assert!(t.sql.contains(" OR "));
        assert_eq!(t.params, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn test_nor_negates_the_disjunction() {
        let t = translate(json!({"$nor": [{"a": 1}, {"b": 2}]}));
        assert_eq!(
            t.sql,
            "NOT (json_extract(data,'$.a') = ? OR json_extract(data,'$.b') = ?)"
        );
    }

    #[test]
    fn test_empty_logical_array_rejected() {
        assert_eq!(translate_err(json!({"$and": []})).error_code(), "INVALID_ARGUMENT");
        assert_eq!(translate_err(json!({"$or": []})).error_code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_null_equality_matches_missing_field() {
        let t = translate(json!({"deleted_at": null}));
        assert_eq!(t.sql, "json_extract(data,'$.deleted_at') IS NULL");
        assert!(t.params.is_empty());
    }

    #[test]
    fn test_deep_equality_on_compound_value() {
        let t = translate(json!({"address": {"city": "Paris", "zip": "75001"}}));
        assert_eq!(t.sql, "json_extract(data,'$.address') = json(?)");
        assert_eq!(
            t.params,
            vec![SqlValue::Text(r#"{"city":"Paris","zip":"75001"}"#.to_string())]
        );
    }

    #[test]
    fn test_numeric_path_segment() {
        let t = translate(json!({"items.0.name": "widget"}));
        assert_eq!(t.sql, "json_extract(data,'$.items[0].name') = ?");
    }

    #[test]
    fn test_unknown_operator_rejected() {
        assert_eq!(
            translate_err(json!({"$frobnicate": 1})).error_code(),
            "INVALID_OPERATOR"
        );
    }

    #[test]
    fn test_text_and_where_are_unsupported() {
        assert_eq!(
            translate_err(json!({"$text": {"$search": "x"}})).error_code(),
            "UNSUPPORTED"
        );
        assert_eq!(translate_err(json!({"$where": "f()"})).error_code(), "UNSUPPORTED");
    }

    #[test]
    fn test_comment_is_ignored() {
        let t = translate(json!({"$comment": "why not", "a": 1}));
        assert_eq!(t.sql, "json_extract(data,'$.a') = ?");
    }

    #[test]
    fn test_positional_token_rejected_in_query() {
        assert_eq!(
            translate_err(json!({"items.$.qty": 1})).error_code(),
            "INVALID_PATH"
        );
    }

    #[test]
    fn test_top_level_not() {
        let t = translate(json!({"$not": {"a": 1}}));
        assert_eq!(t.sql, "NOT (json_extract(data,'$.a') = ?)");
    }

    #[test]
    fn test_params_depth_first_left_to_right() {
        let t = translate(json!({
            "$or": [{"a": 1, "b": 2}, {"c": 3}],
            "d": 4
        }));
        assert_eq!(
            t.params,
            vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3), SqlValue::Int(4)]
        );
        assert_eq!(t.placeholder_count(), t.params.len());
    }
}
