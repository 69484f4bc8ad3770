//! The aggregation expression sub-language.
//!
//! Field references (`"$field"`) become `json_extract` calls, constants
//! pass through literal encoding, and each operator has a static arity and
//! emission template. The same compiler backs `$expr` in the query
//! translator, computed `$project` fields, `$addFields` and `$group`
//! accumulator arguments.

use crate::document::{Document, Number, Object};
use crate::error::{Result, TranslateError};
use crate::path::parse_path;
use crate::sql::{encode_literal_into, SqlValue};

/// Compile an expression against `root`, appending parameters in textual
/// order. Returns the SQL fragment.
///
/// # Errors
///
/// Returns [`TranslateError::InvalidExpression`] for unknown operators or
/// arity mismatches, [`TranslateError::InvalidPath`] for unsafe field
/// references.
pub(crate) fn compile_into(
    expr: &Document,
    root: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    match expr {
        Document::String(s) => {
            if let Some(field) = s.strip_prefix('$') {
                let path = parse_path(field)?;
                if path.has_positional() {
                    return Err(TranslateError::invalid_path(format!(
                        "positional token not allowed in expression field '{s}'"
                    )));
                }
                Ok(format!("json_extract({root},'{}')", path.to_json_path()))
            } else {
                encode_literal_into(expr, params)
            }
        }
        Document::Object(object) if expr.is_operator_object() => {
            if object.len() != 1 {
                return Err(TranslateError::invalid_expression(
                    "expression operator objects take exactly one operator",
                ));
            }
            let (op, arg) = object.iter().next().expect("len checked");
            compile_operator(op, arg, root, params)
        }
        // A non-operator object constructs a document; this is also how
        // compound $group keys compile.
        Document::Object(object) => compile_object(object, root, params),
        Document::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                parts.push(compile_into(item, root, params)?);
            }
            Ok(format!("json_array({})", parts.join(", ")))
        }
        _ => encode_literal_into(expr, params),
    }
}

fn compile_object(object: &Object, root: &str, params: &mut Vec<SqlValue>) -> Result<String> {
    let mut pairs = Vec::with_capacity(object.len());
    for (key, value) in object {
        crate::path::validate_name(key)?;
        let compiled = compile_into(value, root, params)?;
        pairs.push(format!("'{key}', {compiled}"));
    }
    Ok(format!("json_object({})", pairs.join(", ")))
}

fn compile_operator(
    op: &str,
    arg: &Document,
    root: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    match op {
        // Arithmetic
        "$add" => variadic(op, arg, root, params, " + "),
        "$multiply" => variadic(op, arg, root, params, " * "),
        "$subtract" => binary(op, arg, root, params, " - "),
        "$divide" => binary(op, arg, root, params, " / "),
        "$mod" => binary(op, arg, root, params, " % "),

        // Comparison
        "$eq" => binary(op, arg, root, params, " = "),
        "$ne" => binary(op, arg, root, params, " != "),
        "$gt" => binary(op, arg, root, params, " > "),
        "$gte" => binary(op, arg, root, params, " >= "),
        "$lt" => binary(op, arg, root, params, " < "),
        "$lte" => binary(op, arg, root, params, " <= "),

        // Logical
        "$and" => variadic(op, arg, root, params, " AND "),
        "$or" => variadic(op, arg, root, params, " OR "),
        "$not" => {
            let compiled = compile_into(unary(op, arg)?, root, params)?;
            Ok(format!("NOT ({compiled})"))
        }

        // String
        "$concat" => variadic(op, arg, root, params, " || "),
        "$toLower" => {
            let compiled = compile_into(unary(op, arg)?, root, params)?;
            Ok(format!("lower({compiled})"))
        }
        "$toUpper" => {
            let compiled = compile_into(unary(op, arg)?, root, params)?;
            Ok(format!("upper({compiled})"))
        }
        "$substr" => {
            let items = args_exactly(op, arg, 3)?;
            let text = compile_into(items[0], root, params)?;
            let start = compile_into(items[1], root, params)?;
            let length = compile_into(items[2], root, params)?;
            // The surface language counts from 0; the host substr from 1.
            Ok(format!("substr({text}, {start} + 1, {length})"))
        }

        // Conditional
        "$cond" => compile_cond(arg, root, params),
        "$ifNull" => {
            let items = args_exactly(op, arg, 2)?;
            let value = compile_into(items[0], root, params)?;
            let fallback = compile_into(items[1], root, params)?;
            Ok(format!("COALESCE({value}, {fallback})"))
        }

        // Array
        "$size" => {
            let compiled = compile_into(unary(op, arg)?, root, params)?;
            Ok(format!("json_array_length({compiled})"))
        }
        "$arrayElemAt" => {
            let items = args_exactly(op, arg, 2)?;
            let array = compile_into(items[0], root, params)?;
            let index = items[1].as_i64().ok_or_else(|| {
                TranslateError::invalid_expression(
                    "$arrayElemAt requires a constant integer index",
                )
            })?;
            if index >= 0 {
                Ok(format!("json_extract({array},'$[{index}]')"))
            } else {
                Ok(format!("json_extract({array},'$[#{index}]')"))
            }
        }

        _ => Err(TranslateError::invalid_expression(format!(
            "unknown expression operator '{op}'"
        ))),
    }
}

fn compile_cond(arg: &Document, root: &str, params: &mut Vec<SqlValue>) -> Result<String> {
    let (condition, then, otherwise) = match arg {
        Document::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Document::Object(object) => {
            let condition = object.get("if");
            let then = object.get("then");
            let otherwise = object.get("else");
            match (condition, then, otherwise) {
                (Some(i), Some(t), Some(e)) if object.len() == 3 => (i, t, e),
                _ => {
                    return Err(TranslateError::invalid_expression(
                        "$cond requires if/then/else",
                    ))
                }
            }
        }
        _ => {
            return Err(TranslateError::invalid_expression(
                "$cond requires [if, then, else] or {if, then, else}",
            ))
        }
    };
    let condition = compile_into(condition, root, params)?;
    let then = compile_into(then, root, params)?;
    let otherwise = compile_into(otherwise, root, params)?;
    Ok(format!("CASE WHEN {condition} THEN {then} ELSE {otherwise} END"))
}

fn variadic(
    op: &str,
    arg: &Document,
    root: &str,
    params: &mut Vec<SqlValue>,
    separator: &str,
) -> Result<String> {
    let items = arg.as_array().filter(|a| !a.is_empty()).ok_or_else(|| {
        TranslateError::invalid_expression(format!("{op} requires a non-empty argument array"))
    })?;
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        parts.push(compile_into(item, root, params)?);
    }
    Ok(format!("({})", parts.join(separator)))
}

fn binary(
    op: &str,
    arg: &Document,
    root: &str,
    params: &mut Vec<SqlValue>,
    separator: &str,
) -> Result<String> {
    let items = args_exactly(op, arg, 2)?;
    let left = compile_into(items[0], root, params)?;
    let right = compile_into(items[1], root, params)?;
    Ok(format!("({left}{separator}{right})"))
}

fn args_exactly<'a>(op: &str, arg: &'a Document, n: usize) -> Result<Vec<&'a Document>> {
    let items = arg.as_array().filter(|a| a.len() == n).ok_or_else(|| {
        TranslateError::invalid_expression(format!("{op} requires exactly {n} arguments"))
    })?;
    Ok(items.iter().collect())
}

/// A unary operator accepts either a bare argument or a one-element array.
fn unary<'a>(op: &str, arg: &'a Document) -> Result<&'a Document> {
    match arg {
        Document::Array(items) if items.len() == 1 => Ok(&items[0]),
        Document::Array(_) => Err(TranslateError::invalid_expression(format!(
            "{op} takes exactly one argument"
        ))),
        other => Ok(other),
    }
}

/// Integer extraction used by stage arguments (`$limit`, `$skip`, …).
pub(crate) fn constant_int(value: &Document) -> Option<i64> {
    match value {
        Document::Number(Number::Int(i)) => Some(*i),
        #[allow(clippy::cast_possible_truncation)]
        Document::Number(Number::Double(d)) if d.fract() == 0.0 && d.is_finite() => Some(*d as i64),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
