//! Field-level query operators and their SQL emissions.

use regex::Regex;

use crate::document::{Document, Number, Object};
use crate::error::{Result, TranslateError};
use crate::sql::{encode_literal_into, SqlValue};

use super::{compile_filter, join_group};

/// A field-level query operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOperator {
    /// Equal; array-aware.
    Eq,
    /// Not equal; matches missing fields.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Membership in a list.
    In,
    /// Absence from a list; matches missing fields.
    Nin,
    /// Field presence.
    Exists,
    /// JSON type match.
    Type,
    /// Regular-expression match.
    Regex,
    /// Modulus check.
    Mod,
    /// Array length equality.
    Size,
    /// Every listed element present in the array.
    All,
    /// Some element satisfies a sub-filter.
    ElemMatch,
    /// Negation of an operator object.
    Not,
}

impl FieldOperator {
    /// Parse an operator key, `$` prefix included.
    ///
    /// # Errors
    ///
    /// Returns [`TranslateError::InvalidOperator`] for an unknown key.
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "$eq" => Ok(Self::Eq),
            "$ne" => Ok(Self::Ne),
            "$gt" => Ok(Self::Gt),
            "$gte" => Ok(Self::Gte),
            "$lt" => Ok(Self::Lt),
            "$lte" => Ok(Self::Lte),
            "$in" => Ok(Self::In),
            "$nin" => Ok(Self::Nin),
            "$exists" => Ok(Self::Exists),
            "$type" => Ok(Self::Type),
            "$regex" => Ok(Self::Regex),
            "$mod" => Ok(Self::Mod),
            "$size" => Ok(Self::Size),
            "$all" => Ok(Self::All),
            "$elemMatch" => Ok(Self::ElemMatch),
            "$not" => Ok(Self::Not),
            _ => Err(TranslateError::invalid_operator(format!(
                "unknown field operator '{s}'"
            ))),
        }
    }

    /// SQL comparison symbol for the ordered-comparison operators.
    const fn comparison_symbol(self) -> Option<&'static str> {
        match self {
            Self::Gt => Some(">"),
            Self::Gte => Some(">="),
            Self::Lt => Some("<"),
            Self::Lte => Some("<="),
            _ => None,
        }
    }
}

/// Compile an operator object `{ $op: arg, ... }` against one extraction
/// expression. Multiple operators form an implicit AND in key order.
pub(crate) fn compile_operator_object(
    object: &Object,
    target: &str,
    path_text: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let mut parts = Vec::with_capacity(object.len());
    for (key, value) in object {
        if key == "$options" {
            if object.contains_key("$regex") {
                continue; // consumed alongside $regex
            }
            return Err(TranslateError::invalid_argument(format!(
                "$options without $regex on '{path_text}'"
            )));
        }
        if !key.starts_with('$') {
            return Err(TranslateError::invalid_operator(format!(
                "expected operator on '{path_text}', found '{key}'"
            )));
        }
        let op = FieldOperator::from_str(key)?;
        parts.push(compile_one(op, object, target, path_text, value, params)?);
    }
    Ok(join_group(parts, " AND "))
}

fn compile_one(
    op: FieldOperator,
    object: &Object,
    target: &str,
    path_text: &str,
    value: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    match op {
        FieldOperator::Eq => compile_eq(target, value, params),
        FieldOperator::Ne => compile_ne(target, value, params),
        FieldOperator::Gt | FieldOperator::Gte | FieldOperator::Lt | FieldOperator::Lte => {
            if matches!(value, Document::Null) {
                return Err(TranslateError::invalid_argument(format!(
                    "ordered comparison against null on '{path_text}'"
                )));
            }
            let symbol = op.comparison_symbol().expect("ordered comparison");
            let encoded = encode_literal_into(value, params)?;
            Ok(format!("{target} {symbol} {encoded}"))
        }
        FieldOperator::In => compile_in(target, path_text, value, params),
        FieldOperator::Nin => compile_nin(target, path_text, value, params),
        FieldOperator::Exists => {
            let wanted = truthiness(value).ok_or_else(|| {
                TranslateError::invalid_argument(format!(
                    "$exists requires a boolean on '{path_text}', found {}",
                    value.kind()
                ))
            })?;
            if wanted {
                Ok(format!("{target} IS NOT NULL"))
            } else {
                Ok(format!("{target} IS NULL"))
            }
        }
        FieldOperator::Type => compile_type(target, path_text, value),
        FieldOperator::Regex => compile_regex(target, object, path_text, value, params),
        FieldOperator::Mod => compile_mod(target, path_text, value, params),
        FieldOperator::Size => {
            let length = value.as_i64().filter(|n| *n >= 0).ok_or_else(|| {
                TranslateError::invalid_argument(format!(
                    "$size requires a non-negative integer on '{path_text}'"
                ))
            })?;
            params.push(SqlValue::Int(length));
            Ok(format!("json_array_length({target}) = ?"))
        }
        FieldOperator::All => compile_all(target, path_text, value, params),
        FieldOperator::ElemMatch => compile_elem_match(target, path_text, value, params),
        FieldOperator::Not => {
            let inner = value.as_object().filter(|_| value.is_operator_object()).ok_or_else(
                || {
                    TranslateError::invalid_argument(format!(
                        "$not requires an operator object on '{path_text}'"
                    ))
                },
            )?;
            let compiled = compile_operator_object(inner, target, path_text, params)?;
            // A negated predicate must still match documents missing the field.
            Ok(format!("(NOT ({compiled}) OR {target} IS NULL)"))
        }
    }
}

/// `$eq` carries the array-aware disjunction: the field equals the value,
/// or the field is an array containing it.
fn compile_eq(target: &str, value: &Document, params: &mut Vec<SqlValue>) -> Result<String> {
    if matches!(value, Document::Null) {
        return Ok(format!("{target} IS NULL"));
    }
    let direct = encode_literal_into(value, params)?;
    let element = encode_literal_into(value, params)?;
    Ok(format!(
        "({target} = {direct} OR EXISTS (SELECT 1 FROM json_each({target}) WHERE value = {element}))"
    ))
}

fn compile_ne(target: &str, value: &Document, params: &mut Vec<SqlValue>) -> Result<String> {
    if matches!(value, Document::Null) {
        return Ok(format!("{target} IS NOT NULL"));
    }
    let encoded = encode_literal_into(value, params)?;
    Ok(format!("({target} != {encoded} OR {target} IS NULL)"))
}

fn compile_in(
    target: &str,
    path_text: &str,
    value: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let items = value.as_array().ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "$in requires an array on '{path_text}', found {}",
            value.kind()
        ))
    })?;
    if items.is_empty() {
        return Ok("1=0".to_string());
    }
    let contains_null = items.iter().any(|item| matches!(item, Document::Null));
    let list = encode_list(items, params)?;
    if contains_null {
        // null in the list also matches a missing field.
        Ok(format!("({target} IN ({list}) OR {target} IS NULL)"))
    } else {
        Ok(format!("{target} IN ({list})"))
    }
}

fn compile_nin(
    target: &str,
    path_text: &str,
    value: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let items = value.as_array().ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "$nin requires an array on '{path_text}', found {}",
            value.kind()
        ))
    })?;
    if items.is_empty() {
        return Ok("1=1".to_string());
    }
    let contains_null = items.iter().any(|item| matches!(item, Document::Null));
    let list = encode_list(items, params)?;
    if contains_null {
        Ok(format!("({target} NOT IN ({list}) AND {target} IS NOT NULL)"))
    } else {
        Ok(format!("({target} NOT IN ({list}) OR {target} IS NULL)"))
    }
}

fn encode_list(items: &[Document], params: &mut Vec<SqlValue>) -> Result<String> {
    let mut fragments = Vec::with_capacity(items.len());
    for item in items {
        fragments.push(encode_literal_into(item, params)?);
    }
    Ok(fragments.join(", "))
}

/// Host JSON type names for each accepted alias; the pairs are fixed
/// constants, safe to inline.
fn compile_type(target: &str, path_text: &str, value: &Document) -> Result<String> {
    let name = value.as_str().ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "$type requires a type-name string on '{path_text}'"
        ))
    })?;
    let type_expr = type_expr_of(target);
    match name {
        "string" => Ok(format!("{type_expr} = 'text'")),
        "object" => Ok(format!("{type_expr} = 'object'")),
        "array" => Ok(format!("{type_expr} = 'array'")),
        "null" => Ok(format!("{type_expr} = 'null'")),
        "int" | "long" => Ok(format!("{type_expr} = 'integer'")),
        "double" => Ok(format!("{type_expr} = 'real'")),
        "number" => Ok(format!("{type_expr} IN ('integer', 'real')")),
        "bool" => Ok(format!("{type_expr} IN ('true', 'false')")),
        _ => Err(TranslateError::invalid_argument(format!(
            "unknown $type '{name}' on '{path_text}'"
        ))),
    }
}

/// `json_type` over the same path the extraction expression addresses.
fn type_expr_of(target: &str) -> String {
    if target.starts_with("json_extract(") {
        target.replacen("json_extract(", "json_type(", 1)
    } else {
        // Bare iteration value inside $elemMatch.
        format!("json_type({target})")
    }
}

fn compile_regex(
    target: &str,
    object: &Object,
    path_text: &str,
    value: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let pattern = value.as_str().ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "$regex requires a pattern string on '{path_text}', found {}",
            value.kind()
        ))
    })?;
    Regex::new(pattern).map_err(|e| {
        TranslateError::invalid_argument(format!("invalid $regex on '{path_text}': {e}"))
    })?;
    let flags = match object.get("$options") {
        None => String::new(),
        Some(options) => {
            let text = options.as_str().ok_or_else(|| {
                TranslateError::invalid_argument(format!(
                    "$options requires a string on '{path_text}'"
                ))
            })?;
            for flag in text.chars() {
                if !matches!(flag, 'i' | 'm' | 's' | 'x') {
                    return Err(TranslateError::invalid_argument(format!(
                        "unsupported $options flag '{flag}' on '{path_text}'"
                    )));
                }
            }
            text.to_string()
        }
    };
    let full = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{flags}){pattern}")
    };
    params.push(SqlValue::Text(full));
    Ok(format!("{target} REGEXP ?"))
}

fn compile_mod(
    target: &str,
    path_text: &str,
    value: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let items = value.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "$mod requires [divisor, remainder] on '{path_text}'"
        ))
    })?;
    let divisor = integral(&items[0]).ok_or_else(|| {
        TranslateError::invalid_argument(format!("$mod divisor must be an integer on '{path_text}'"))
    })?;
    if divisor == 0 {
        return Err(TranslateError::invalid_argument(format!(
            "$mod by zero on '{path_text}'"
        )));
    }
    let remainder = integral(&items[1]).ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "$mod remainder must be an integer on '{path_text}'"
        ))
    })?;
    params.push(SqlValue::Int(divisor));
    params.push(SqlValue::Int(remainder));
    Ok(format!("({target} % ?) = ?"))
}

fn compile_all(
    target: &str,
    path_text: &str,
    value: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let items = value.as_array().ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "$all requires an array on '{path_text}', found {}",
            value.kind()
        ))
    })?;
    if items.is_empty() {
        return Ok("1=0".to_string());
    }
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        let encoded = encode_literal_into(item, params)?;
        parts.push(format!(
            "EXISTS (SELECT 1 FROM json_each({target}) WHERE value = {encoded})"
        ));
    }
    Ok(join_group(parts, " AND "))
}

fn compile_elem_match(
    target: &str,
    path_text: &str,
    value: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let object = value.as_object().ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "$elemMatch requires an object on '{path_text}', found {}",
            value.kind()
        ))
    })?;
    // The sub-filter's root is the iteration value: bare operators apply to
    // the element itself, field keys address inside it.
    let sub = if value.is_operator_object() {
        compile_operator_object(object, "value", path_text, params)?
    } else {
        compile_filter(object, "value", params)?
    };
    Ok(format!(
        "EXISTS (SELECT 1 FROM json_each({target}) WHERE {sub})"
    ))
}

fn truthiness(value: &Document) -> Option<bool> {
    match value {
        Document::Bool(b) => Some(*b),
        Document::Number(Number::Int(i)) => Some(*i != 0),
        _ => None,
    }
}

/// Extract an integral value from an int or a fraction-free double.
fn integral(value: &Document) -> Option<i64> {
    match value {
        Document::Number(Number::Int(i)) => Some(*i),
        #[allow(clippy::cast_possible_truncation)]
        Document::Number(Number::Double(d)) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
        _ => None,
    }
}

/// Compile a `$pull`-style element condition over the `json_each` iteration
/// value: a scalar argument is an equality test; an operator object is
/// limited to the comparison set; a plain object tests element fields.
pub(crate) fn compile_element_condition(
    arg: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    match arg {
        Document::Object(object) if arg.is_operator_object() => {
            let mut parts = Vec::with_capacity(object.len());
            for (key, value) in object {
                parts.push(compile_restricted(key, "value", value, params)?);
            }
            Ok(join_group(parts, " AND "))
        }
        Document::Object(object) => {
            let mut parts = Vec::with_capacity(object.len());
            for (key, value) in object {
                let path = crate::path::parse_path(key)?;
                let target = super::extract_expr("value", &path);
                match value {
                    Document::Object(inner) if value.is_operator_object() => {
                        for (op_key, op_value) in inner {
                            parts.push(compile_restricted(op_key, &target, op_value, params)?);
                        }
                    }
                    _ => {
                        if matches!(value, Document::Null) {
                            parts.push(format!("{target} IS NULL"));
                        } else {
                            let encoded = encode_literal_into(value, params)?;
                            parts.push(format!("{target} = {encoded}"));
                        }
                    }
                }
            }
            Ok(join_group(parts, " AND "))
        }
        Document::Null => Ok("value IS NULL".to_string()),
        _ => {
            let encoded = encode_literal_into(arg, params)?;
            Ok(format!("value = {encoded}"))
        }
    }
}

/// The reduced operator set available to element conditions.
fn compile_restricted(
    key: &str,
    target: &str,
    value: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let op = FieldOperator::from_str(key)?;
    match op {
        FieldOperator::Eq => {
            if matches!(value, Document::Null) {
                return Ok(format!("{target} IS NULL"));
            }
            let encoded = encode_literal_into(value, params)?;
            Ok(format!("{target} = {encoded}"))
        }
        FieldOperator::Ne => {
            if matches!(value, Document::Null) {
                return Ok(format!("{target} IS NOT NULL"));
            }
            let encoded = encode_literal_into(value, params)?;
            Ok(format!("{target} != {encoded}"))
        }
        FieldOperator::Gt | FieldOperator::Gte | FieldOperator::Lt | FieldOperator::Lte => {
            let symbol = op.comparison_symbol().expect("ordered comparison");
            let encoded = encode_literal_into(value, params)?;
            Ok(format!("{target} {symbol} {encoded}"))
        }
        _ => Err(TranslateError::invalid_operator(format!(
            "'{key}' is not allowed in an element condition"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::document::Document;
    use crate::query::QueryTranslator;
    use crate::sql::{SqlValue, Translation};

    fn translate(filter: serde_json::Value) -> Translation {
        let doc = Document::from_json(&filter).unwrap();
        QueryTranslator::translate_query(&doc).unwrap()
    }

    fn translate_err(filter: serde_json::Value) -> crate::error::TranslateError {
        let doc = Document::from_json(&filter).unwrap();
        QueryTranslator::translate_query(&doc).unwrap_err()
    }

    #[test]
    fn test_eq_is_array_aware() {
        let t = translate(json!({"tags": {"$eq": "red"}}));
        assert_eq!(
            t.sql,
            "(json_extract(data,'$.tags') = ? OR EXISTS (SELECT 1 FROM \
             json_each(json_extract(data,'$.tags')) WHERE value = ?))"
        );
        assert_eq!(
            t.params,
            vec![SqlValue::Text("red".to_string()), SqlValue::Text("red".to_string())]
        );
    }

    #[test]
    fn test_ne_matches_missing_field() {
        let t = translate(json!({"status": {"$ne": "archived"}}));
        assert_eq!(
            t.sql,
            "(json_extract(data,'$.status') != ? OR json_extract(data,'$.status') IS NULL)"
        );
    }

    #[test]
    fn test_ordered_comparisons() {
        let t = translate(json!({"age": {"$gte": 21, "$lt": 65}}));
        assert_eq!(
            t.sql,
            "(json_extract(data,'$.age') >= ? AND json_extract(data,'$.age') < ?)"
        );
        assert_eq!(t.params, vec![SqlValue::Int(21), SqlValue::Int(65)]);
    }

    #[test]
    fn test_in_list() {
        let t = translate(json!({"status": {"$in": ["active", "pending"]}}));
        assert_eq!(t.sql, "json_extract(data,'$.status') IN (?, ?)");
        assert_eq!(t.params.len(), 2);
    }

    #[test]
    fn test_empty_in_is_always_false() {
        let t = translate(json!({"status": {"$in": []}}));
        assert_eq!(t.sql, "1=0");
        assert!(t.params.is_empty());
    }

    #[test]
    fn test_nin_matches_missing_field() {
        let t = translate(json!({"status": {"$nin": ["a", "b"]}}));
        assert_eq!(
            t.sql,
            "(json_extract(data,'$.status') NOT IN (?, ?) OR json_extract(data,'$.status') IS NULL)"
        );
    }

    #[test]
    fn test_in_with_null_matches_missing() {
        let t = translate(json!({"status": {"$in": ["a", null]}}));
        assert!(t.sql.ends_with("OR json_extract(data,'$.status') IS NULL)"));
    }

    #[test]
    fn test_exists() {
        let t = translate(json!({"email": {"$exists": true}}));
        assert_eq!(t.sql, "json_extract(data,'$.email') IS NOT NULL");
        let t = translate(json!({"email": {"$exists": false}}));
        assert_eq!(t.sql, "json_extract(data,'$.email') IS NULL");
    }

    #[test]
    fn test_type_uses_json_type() {
        let t = translate(json!({"age": {"$type": "int"}}));
        assert_eq!(t.sql, "json_type(data,'$.age') = 'integer'");
        let t = translate(json!({"age": {"$type": "number"}}));
        assert_eq!(t.sql, "json_type(data,'$.age') IN ('integer', 'real')");
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert_eq!(
            translate_err(json!({"a": {"$type": "quaternion"}})).error_code(),
            "INVALID_ARGUMENT"
        );
    }

    #[test]
    fn test_regex_with_options() {
        let t = translate(json!({"name": {"$regex": "^jo", "$options": "i"}}));
        assert_eq!(t.sql, "json_extract(data,'$.name') REGEXP ?");
        assert_eq!(t.params, vec![SqlValue::Text("(?i)^jo".to_string())]);
    }

    #[test]
    fn test_invalid_regex_rejected() {
        assert_eq!(
            translate_err(json!({"name": {"$regex": "("}})).error_code(),
            "INVALID_ARGUMENT"
        );
    }

    #[test]
    fn test_options_without_regex_rejected() {
        assert_eq!(
            translate_err(json!({"name": {"$options": "i"}})).error_code(),
            "INVALID_ARGUMENT"
        );
    }

    #[test]
    fn test_mod() {
        let t = translate(json!({"qty": {"$mod": [4, 0]}}));
        assert_eq!(t.sql, "(json_extract(data,'$.qty') % ?) = ?");
        assert_eq!(t.params, vec![SqlValue::Int(4), SqlValue::Int(0)]);
    }

    #[test]
    fn test_mod_arity_and_zero_divisor() {
        assert_eq!(
            translate_err(json!({"qty": {"$mod": [4]}})).error_code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(
            translate_err(json!({"qty": {"$mod": [0, 1]}})).error_code(),
            "INVALID_ARGUMENT"
        );
    }

    #[test]
    fn test_size() {
        let t = translate(json!({"tags": {"$size": 3}}));
        assert_eq!(t.sql, "json_array_length(json_extract(data,'$.tags')) = ?");
        assert_eq!(t.params, vec![SqlValue::Int(3)]);
    }

    #[test]
    fn test_all_is_a_conjunction_of_exists() {
        let t = translate(json!({"tags": {"$all": ["a", "b"]}}));
        assert_eq!(
            t.sql,
            "(EXISTS (SELECT 1 FROM json_each(json_extract(data,'$.tags')) WHERE value = ?) \
             AND EXISTS (SELECT 1 FROM json_each(json_extract(data,'$.tags')) WHERE value = ?))"
        );
    }

    #[test]
    fn test_elem_match_with_field_filter() {
        let t = translate(json!({"results": {"$elemMatch": {"score": {"$gte": 80}}}}));
        assert_eq!(
            t.sql,
            "EXISTS (SELECT 1 FROM json_each(json_extract(data,'$.results')) \
             WHERE json_extract(value,'$.score') >= ?)"
        );
        assert_eq!(t.params, vec![SqlValue::Int(80)]);
    }

    #[test]
    fn test_elem_match_with_bare_operators() {
        let t = translate(json!({"scores": {"$elemMatch": {"$gt": 10, "$lt": 20}}}));
        assert_eq!(
            t.sql,
            "EXISTS (SELECT 1 FROM json_each(json_extract(data,'$.scores')) \
             WHERE (value > ? AND value < ?))"
        );
    }

    #[test]
    fn test_field_level_not_keeps_missing_field_semantics() {
        let t = translate(json!({"age": {"$not": {"$gt": 18}}}));
        assert_eq!(
            t.sql,
            "(NOT (json_extract(data,'$.age') > ?) OR json_extract(data,'$.age') IS NULL)"
        );
    }

    #[test]
    fn test_implicit_and_of_operators_preserves_order() {
        let t = translate(json!({"a": {"$gt": 1, "$ne": 9}}));
        assert_eq!(t.params, vec![SqlValue::Int(1), SqlValue::Int(9)]);
        assert_eq!(t.placeholder_count(), 2);
    }
}
