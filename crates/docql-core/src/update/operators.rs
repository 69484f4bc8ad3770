//! Update operators: table, argument validation and SQL emission.

use crate::document::Document;
use crate::error::{Result, TranslateError};
use crate::query::field_ops::compile_element_condition;
use crate::sql::{encode_literal_into, number_param, SqlValue};

/// An update operator, in its fixed processing order.
///
/// The order is observable - it decides how the emitted `json_set` /
/// `json_remove` calls nest - and the test suite depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOperator {
    /// Move a field to a new path.
    Rename,
    /// Remove fields.
    Unset,
    /// Set fields to values.
    Set,
    /// Set fields only when inserting.
    SetOnInsert,
    /// Add to numeric fields.
    Inc,
    /// Multiply numeric fields.
    Mul,
    /// Keep the smaller of current and given value.
    Min,
    /// Keep the larger of current and given value.
    Max,
    /// Bitwise and/or/xor on integer fields.
    Bit,
    /// Append to arrays.
    Push,
    /// Append to arrays, skipping duplicates.
    AddToSet,
    /// Remove matching elements from arrays.
    Pull,
    /// Remove listed values from arrays.
    PullAll,
    /// Drop the first or last array element.
    Pop,
}

impl UpdateOperator {
    /// Fixed processing order.
    pub const ORDER: [Self; 14] = [
        Self::Rename,
        Self::Unset,
        Self::Set,
        Self::SetOnInsert,
        Self::Inc,
        Self::Mul,
        Self::Min,
        Self::Max,
        Self::Bit,
        Self::Push,
        Self::AddToSet,
        Self::Pull,
        Self::PullAll,
        Self::Pop,
    ];

    /// Parse an operator key, `$` prefix included.
    ///
    /// # Errors
    ///
    /// Returns [`TranslateError::InvalidOperator`] for an unknown key.
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "$rename" => Ok(Self::Rename),
            "$unset" => Ok(Self::Unset),
            "$set" => Ok(Self::Set),
            "$setOnInsert" => Ok(Self::SetOnInsert),
            "$inc" => Ok(Self::Inc),
            "$mul" => Ok(Self::Mul),
            "$min" => Ok(Self::Min),
            "$max" => Ok(Self::Max),
            "$bit" => Ok(Self::Bit),
            "$push" => Ok(Self::Push),
            "$addToSet" => Ok(Self::AddToSet),
            "$pull" => Ok(Self::Pull),
            "$pullAll" => Ok(Self::PullAll),
            "$pop" => Ok(Self::Pop),
            _ => Err(TranslateError::invalid_operator(format!(
                "unknown update operator '{s}'"
            ))),
        }
    }

    /// The operator's surface name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rename => "$rename",
            Self::Unset => "$unset",
            Self::Set => "$set",
            Self::SetOnInsert => "$setOnInsert",
            Self::Inc => "$inc",
            Self::Mul => "$mul",
            Self::Min => "$min",
            Self::Max => "$max",
            Self::Bit => "$bit",
            Self::Push => "$push",
            Self::AddToSet => "$addToSet",
            Self::Pull => "$pull",
            Self::PullAll => "$pullAll",
            Self::Pop => "$pop",
        }
    }
}

/// Per-operator argument shape checks, run before any emission.
pub(crate) fn validate_argument(op: UpdateOperator, path: &str, value: &Document) -> Result<()> {
    match op {
        UpdateOperator::Inc | UpdateOperator::Mul => match value {
            Document::Number(n) if n.is_finite() => Ok(()),
            _ => Err(TranslateError::invalid_argument(format!(
                "{} on '{path}' requires a finite number, found {}",
                op.name(),
                value.kind()
            ))),
        },
        UpdateOperator::Rename => {
            let target = value.as_str().ok_or_else(|| {
                TranslateError::invalid_argument(format!(
                    "$rename on '{path}' requires a string target, found {}",
                    value.kind()
                ))
            })?;
            if target == path {
                return Err(TranslateError::invalid_argument(format!(
                    "$rename source and target are both '{path}'"
                )));
            }
            Ok(())
        }
        UpdateOperator::Min | UpdateOperator::Max => {
            if matches!(value, Document::Null) {
                return Err(TranslateError::invalid_argument(format!(
                    "{} on '{path}' rejects null",
                    op.name()
                )));
            }
            Ok(())
        }
        UpdateOperator::Pop => match value.as_i64() {
            Some(1 | -1) => Ok(()),
            _ => Err(TranslateError::invalid_argument(format!(
                "$pop on '{path}' accepts only 1 or -1"
            ))),
        },
        UpdateOperator::Bit => {
            bit_argument(path, value)?;
            Ok(())
        }
        UpdateOperator::Push => {
            push_argument(path, value)?;
            Ok(())
        }
        UpdateOperator::AddToSet => {
            add_to_set_values(path, value)?;
            Ok(())
        }
        UpdateOperator::PullAll => {
            if value.as_array().is_none() {
                return Err(TranslateError::invalid_argument(format!(
                    "$pullAll on '{path}' requires an array, found {}",
                    value.kind()
                )));
            }
            Ok(())
        }
        UpdateOperator::Unset
        | UpdateOperator::Set
        | UpdateOperator::SetOnInsert
        | UpdateOperator::Pull => Ok(()),
    }
}

/// Parsed `$bit` argument: the operation key and its integer operand.
pub(crate) fn bit_argument<'a>(path: &str, value: &'a Document) -> Result<(&'a str, i64)> {
    let object = value.as_object().filter(|o| o.len() == 1).ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "$bit on '{path}' requires an object with exactly one of and/or/xor"
        ))
    })?;
    let (key, operand) = object.iter().next().expect("len checked");
    if !matches!(key.as_str(), "and" | "or" | "xor") {
        return Err(TranslateError::invalid_argument(format!(
            "$bit on '{path}' has unknown operation '{key}'"
        )));
    }
    let operand = operand.as_i64().ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "$bit {key} on '{path}' requires an integer operand"
        ))
    })?;
    Ok((key.as_str(), operand))
}

/// Parsed `$push` argument: the values to append and an optional slice.
pub(crate) struct PushArgs<'a> {
    /// Values to append, in order.
    pub values: Vec<&'a Document>,
    /// Post-append slice: head for positive, tail for negative, `[]` for 0.
    pub slice: Option<i64>,
}

pub(crate) fn push_argument<'a>(path: &str, value: &'a Document) -> Result<PushArgs<'a>> {
    if !value.is_operator_object() {
        return Ok(PushArgs {
            values: vec![value],
            slice: None,
        });
    }
    let object = value.as_object().expect("operator object");
    let mut values = None;
    let mut slice = None;
    for (key, modifier) in object {
        match key.as_str() {
            "$each" => {
                let items = modifier.as_array().ok_or_else(|| {
                    TranslateError::invalid_argument(format!(
                        "$push $each on '{path}' requires an array"
                    ))
                })?;
                values = Some(items.iter().collect());
            }
            "$slice" => {
                let n = modifier.as_i64().ok_or_else(|| {
                    TranslateError::invalid_argument(format!(
                        "$push $slice on '{path}' requires an integer"
                    ))
                })?;
                slice = Some(n);
            }
            _ => {
                return Err(TranslateError::invalid_argument(format!(
                    "$push on '{path}' has unknown modifier '{key}'"
                )))
            }
        }
    }
    let values = values.ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "$push modifiers on '{path}' require $each"
        ))
    })?;
    Ok(PushArgs { values, slice })
}

/// Values for `$addToSet`, unwrapping `$each` when present.
pub(crate) fn add_to_set_values<'a>(path: &str, value: &'a Document) -> Result<Vec<&'a Document>> {
    if !value.is_operator_object() {
        return Ok(vec![value]);
    }
    let object = value.as_object().expect("operator object");
    if object.len() != 1 || !object.contains_key("$each") {
        return Err(TranslateError::invalid_argument(format!(
            "$addToSet on '{path}' accepts only the $each modifier"
        )));
    }
    let items = object
        .get("$each")
        .and_then(Document::as_array)
        .ok_or_else(|| {
            TranslateError::invalid_argument(format!(
                "$addToSet $each on '{path}' requires an array"
            ))
        })?;
    Ok(items.iter().collect())
}

/// A single-path mutation, emitted either directly or inside a positional
/// array-rebuild sub-query.
///
/// `doc` is the expression being wrapped; `read` is the expression current
/// values are read from. Both are `data` at the top level; inside an
/// iteration they are `json(value)` and `value`.
pub(crate) enum LeafOp<'a> {
    /// `$set` / `$setOnInsert` of one value.
    Set(&'a Document),
    /// `$unset` of one path.
    Unset,
    /// `$inc` by a number.
    Inc(&'a Document),
    /// `$mul` by a number.
    Mul(&'a Document),
    /// `$min` against a value.
    Min(&'a Document),
    /// `$max` against a value.
    Max(&'a Document),
    /// `$bit` with a verified operation key and operand.
    Bit(&'a str, i64),
    /// `$push` with normalised values and slice.
    Push(PushArgs<'a>),
    /// `$addToSet` with normalised values.
    AddToSet(Vec<&'a Document>),
    /// `$pull` with its match condition argument.
    Pull(&'a Document),
    /// `$pullAll` with the values to remove.
    PullAll(&'a [Document]),
    /// `$pop` from the head (-1) or tail (1).
    Pop(i64),
}

impl LeafOp<'_> {
    /// Emit the mutated-document expression for one path.
    pub(crate) fn emit(
        &self,
        doc: &str,
        read: &str,
        jpath: &str,
        params: &mut Vec<SqlValue>,
    ) -> Result<String> {
        let current = format!("json_extract({read},'{jpath}')");
        match self {
            Self::Set(value) => {
                let encoded = encode_literal_into(value, params)?;
                Ok(format!("json_set({doc}, '{jpath}', {encoded})"))
            }
            Self::Unset => {
                if jpath == "$" {
                    // Unsetting an iterated element leaves a null in place.
                    Ok("json('null')".to_string())
                } else {
                    Ok(format!("json_remove({doc}, '{jpath}')"))
                }
            }
            Self::Inc(value) => {
                params.push(number_value(value)?);
                Ok(format!(
                    "json_set({doc}, '{jpath}', COALESCE({current},0) + ?)"
                ))
            }
            Self::Mul(value) => {
                params.push(number_value(value)?);
                Ok(format!(
                    "json_set({doc}, '{jpath}', COALESCE({current},0) * ?)"
                ))
            }
            Self::Min(value) => emit_min_max(doc, &current, jpath, "<", value, params),
            Self::Max(value) => emit_min_max(doc, &current, jpath, ">", value, params),
            Self::Bit(operation, operand) => {
                let expr = match *operation {
                    "and" => {
                        params.push(SqlValue::Int(*operand));
                        format!("({current} & ?)")
                    }
                    "or" => {
                        params.push(SqlValue::Int(*operand));
                        format!("({current} | ?)")
                    }
                    _ => {
                        // xor via (x | m) - (x & m)
                        params.push(SqlValue::Int(*operand));
                        params.push(SqlValue::Int(*operand));
                        format!("(({current} | ?) - ({current} & ?))")
                    }
                };
                Ok(format!("json_set({doc}, '{jpath}', {expr})"))
            }
            Self::Push(args) => emit_push(doc, &current, jpath, args, params),
            Self::AddToSet(values) => emit_add_to_set(doc, &current, jpath, values, params),
            Self::Pull(condition) => {
                let matched = compile_element_condition(condition, params)?;
                Ok(format!(
                    "json_set({doc}, '{jpath}', (SELECT json_group_array(value) \
                     FROM json_each({current}) WHERE NOT ({matched})))"
                ))
            }
            Self::PullAll(items) => {
                if items.is_empty() {
                    return Ok(doc.to_string());
                }
                let mut keeps = Vec::with_capacity(items.len());
                for item in *items {
                    if matches!(item, Document::Null) {
                        keeps.push("value IS NOT NULL".to_string());
                    } else {
                        let encoded = encode_literal_into(item, params)?;
                        keeps.push(format!("value != {encoded}"));
                    }
                }
                Ok(format!(
                    "json_set({doc}, '{jpath}', (SELECT json_group_array(value) \
                     FROM json_each({current}) WHERE {}))",
                    keeps.join(" AND ")
                ))
            }
            Self::Pop(direction) => {
                let keep = if *direction == 1 {
                    format!("key < json_array_length({current}) - 1")
                } else {
                    "key > 0".to_string()
                };
                Ok(format!(
                    "json_set({doc}, '{jpath}', (SELECT json_group_array(value) \
                     FROM json_each({current}) WHERE {keep}))"
                ))
            }
        }
    }
}

fn number_value(value: &Document) -> Result<SqlValue> {
    match value {
        Document::Number(n) => number_param(n),
        _ => Err(TranslateError::invalid_argument(format!(
            "expected a number, found {}",
            value.kind()
        ))),
    }
}

fn emit_min_max(
    doc: &str,
    current: &str,
    jpath: &str,
    cmp: &str,
    value: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let candidate = encode_literal_into(value, params)?;
    let replacement = encode_literal_into(value, params)?;
    Ok(format!(
        "json_set({doc}, '{jpath}', CASE WHEN {current} IS NULL OR {candidate} {cmp} {current} \
         THEN {replacement} ELSE {current} END)"
    ))
}

fn emit_push(
    doc: &str,
    current: &str,
    jpath: &str,
    args: &PushArgs<'_>,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    // A zero slice empties the array outright; nothing is appended and no
    // parameters bind.
    if args.slice == Some(0) {
        return Ok(format!("json_set({doc}, '{jpath}', '[]')"));
    }
    let mut array = format!("COALESCE({current},'[]')");
    for value in &args.values {
        let encoded = encode_literal_into(value, params)?;
        array = format!("json_insert({array}, '$[#]', {encoded})");
    }
    let value_expr = match args.slice {
        None => array,
        Some(n) if n > 0 => format!(
            "(SELECT json_group_array(value) FROM \
             (SELECT value FROM json_each({array}) ORDER BY key LIMIT {n}))"
        ),
        Some(n) => {
            let take = n.unsigned_abs();
            format!(
                "(SELECT json_group_array(value) FROM (SELECT key, value FROM \
                 (SELECT key, value FROM json_each({array}) ORDER BY key DESC LIMIT {take}) \
                 ORDER BY key))"
            )
        }
    };
    Ok(format!("json_set({doc}, '{jpath}', {value_expr})"))
}

/// `$addToSet` chains one conditional insertion per value, so repeats
/// within a single update coalesce. The chain is built as a local fragment
/// because the accumulated array expression is embedded more than once and
/// its placeholders must be repeated with it.
fn emit_add_to_set(
    doc: &str,
    current: &str,
    jpath: &str,
    values: &[&Document],
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let mut chain_sql = format!("COALESCE({current},'[]')");
    let mut chain_params: Vec<SqlValue> = Vec::new();
    for value in values {
        let mut probe = Vec::new();
        let probe_sql = encode_literal_into(value, &mut probe)?;
        let mut inserted = Vec::new();
        let inserted_sql = encode_literal_into(value, &mut inserted)?;
        let mut next_params =
            Vec::with_capacity(chain_params.len() * 3 + probe.len() + inserted.len());
        // Textual order: json_each(chain), probe, THEN chain, ELSE chain, inserted.
        next_params.extend(chain_params.iter().cloned());
        next_params.extend(probe);
        next_params.extend(chain_params.iter().cloned());
        next_params.extend(chain_params.iter().cloned());
        next_params.extend(inserted);
        chain_sql = format!(
            "CASE WHEN EXISTS (SELECT 1 FROM json_each({chain_sql}) WHERE value = {probe_sql}) \
             THEN {chain_sql} ELSE json_insert({chain_sql}, '$[#]', {inserted_sql}) END"
        );
        chain_params = next_params;
    }
    params.extend(chain_params);
    Ok(format!("json_set({doc}, '{jpath}', {chain_sql})"))
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
    fn test_operator_table_round_trip() {
        for op in UpdateOperator::ORDER {
            assert_eq!(UpdateOperator::from_str(op.name()).unwrap(), op);
        }
        assert!(UpdateOperator::from_str("$replaceWith").is_err());
    }

    #[test]
    fn test_inc_rejects_non_finite() {
        let err =
            validate_argument(UpdateOperator::Inc, "a", &Document::from(f64::NAN)).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
        assert!(validate_argument(UpdateOperator::Inc, "a", &doc(json!(2))).is_ok());
    }

    #[test]
    fn test_rename_rejects_self_and_non_string() {
        let err = validate_argument(UpdateOperator::Rename, "a", &doc(json!("a"))).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
        let err = validate_argument(UpdateOperator::Rename, "a", &doc(json!(1))).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_min_rejects_null() {
        let err = validate_argument(UpdateOperator::Min, "a", &Document::Null).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_pop_accepts_only_unit_directions() {
        assert!(validate_argument(UpdateOperator::Pop, "a", &doc(json!(1))).is_ok());
        assert!(validate_argument(UpdateOperator::Pop, "a", &doc(json!(-1))).is_ok());
        assert!(validate_argument(UpdateOperator::Pop, "a", &doc(json!(2))).is_err());
        assert!(validate_argument(UpdateOperator::Pop, "a", &doc(json!("1"))).is_err());
    }

    #[test]
    fn test_bit_argument_shapes() {
        assert_eq!(bit_argument("a", &doc(json!({"and": 5}))).unwrap(), ("and", 5));
        assert!(bit_argument("a", &doc(json!({"nand": 5}))).is_err());
        assert!(bit_argument("a", &doc(json!({"and": 5, "or": 1}))).is_err());
        assert!(bit_argument("a", &doc(json!({"and": "5"}))).is_err());
    }

    #[test]
    fn test_push_argument_normalisation() {
        let simple = doc(json!("x"));
        let args = push_argument("a", &simple).unwrap();
        assert_eq!(args.values.len(), 1);
        assert!(args.slice.is_none());

        let each = doc(json!({"$each": [1, 2], "$slice": -3}));
        let args = push_argument("a", &each).unwrap();
        assert_eq!(args.values.len(), 2);
        assert_eq!(args.slice, Some(-3));

        let bad = doc(json!({"$each": [1], "$position": 0}));
        assert!(push_argument("a", &bad).is_err());

        let no_each = doc(json!({"$slice": 2}));
        assert!(push_argument("a", &no_each).is_err());
    }

    #[test]
    fn test_add_to_set_values() {
        let each = doc(json!({"$each": ["a", "b"]}));
        assert_eq!(add_to_set_values("t", &each).unwrap().len(), 2);
        let bad = doc(json!({"$each": ["a"], "$slice": 1}));
        assert!(add_to_set_values("t", &bad).is_err());
    }
}
