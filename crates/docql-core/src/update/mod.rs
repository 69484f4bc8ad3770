//! Update documents compiled to JSON-mutation expressions.
//!
//! [`UpdateTranslator`] turns an update document into a SQL expression that
//! evaluates to the new value of the `data` column. Compilation runs in
//! three passes: validate every operator argument, detect conflicting
//! writes, then emit operators in a fixed order so composition is
//! deterministic. The fixed order is observable in the emitted SQL and the
//! test suite depends on it.
//!
//! # Example
//!
//! ```rust
//! use docql_core::update::UpdateTranslator;
//! use docql_core::Document;
//! use serde_json::json;
//!
//! let update = Document::from_json(&json!({"$set": {"name": "John", "age": 30}})).unwrap();
//! let t = UpdateTranslator::translate_update(&update).unwrap();
//! assert_eq!(t.sql, "json_set(data, '$.name', ?, '$.age', ?)");
//! ```

pub(crate) mod operators;
pub mod positional;

use std::collections::HashMap;

use tracing::debug;

use crate::document::{Document, Object};
use crate::error::{Result, TranslateError};
use crate::path::{json_path_of, parse_path, Segment};
use crate::sql::{encode_literal_into, SqlValue, Translation};

use operators::{
    add_to_set_values, bit_argument, push_argument, validate_argument, LeafOp, UpdateOperator,
};
pub use positional::{ArrayFilter, PositionalContext};

/// Compiles update documents into expressions producing the new `data`.
///
/// Stateless and pure: identical inputs yield byte-identical outputs.
pub struct UpdateTranslator;

impl UpdateTranslator {
    /// Compile an update document with no positional context and no insert
    /// context. An empty update returns `data` verbatim.
    ///
    /// # Errors
    ///
    /// `InvalidOperator`, `InvalidArgument`, `ConflictingUpdate`,
    /// `InvalidPath`, or `UnresolvedPositional` when the update uses a
    /// positional token (the empty context resolves none).
    pub fn translate_update(update: &Document) -> Result<Translation> {
        Self::translate_upsert(update, &PositionalContext::default(), false)
    }

    /// Compile an update document, resolving positional tokens against the
    /// supplied context.
    ///
    /// # Errors
    ///
    /// As [`Self::translate_update`].
    pub fn translate_update_with_context(
        update: &Document,
        ctx: &PositionalContext,
    ) -> Result<Translation> {
        Self::translate_upsert(update, ctx, false)
    }

    /// Compile an update document in an optional insert context:
    /// `$setOnInsert` applies only when `insert` is true (it is validated
    /// and conflict-checked either way).
    ///
    /// # Errors
    ///
    /// As [`Self::translate_update`].
    pub fn translate_upsert(
        update: &Document,
        ctx: &PositionalContext,
        insert: bool,
    ) -> Result<Translation> {
        let object = update.as_object().ok_or_else(|| {
            TranslateError::invalid_argument(format!(
                "update must be an object, found {}",
                update.kind()
            ))
        })?;
        if object.is_empty() {
            return Ok(Translation::fragment("data"));
        }

        validate_and_check_conflicts(object)?;

        let mut sql = "data".to_string();
        let mut params: Vec<SqlValue> = Vec::new();
        for op in UpdateOperator::ORDER {
            let Some(pairs) = object.get(op.name()).and_then(Document::as_object) else {
                continue;
            };
            if op == UpdateOperator::SetOnInsert && !insert {
                continue;
            }
            sql = apply_operator(op, sql, pairs, ctx, &mut params)?;
        }
        debug!(
            operators = object.len(),
            sql_len = sql.len(),
            "translated update document"
        );
        Ok(Translation::new(sql, params))
    }
}

/// Pass 1 and 2: per-operator shape checks, then the path conflict map.
fn validate_and_check_conflicts(object: &Object) -> Result<()> {
    let mut writes: HashMap<String, UpdateOperator> = HashMap::new();
    for (key, value) in object {
        let op = UpdateOperator::from_str(key)?;
        let pairs = value.as_object().ok_or_else(|| {
            TranslateError::invalid_argument(format!(
                "{key} requires an object of path/value pairs, found {}",
                value.kind()
            ))
        })?;
        if pairs.is_empty() {
            return Err(TranslateError::invalid_argument(format!("{key} is empty")));
        }
        for (path_text, arg) in pairs {
            let path = parse_path(path_text)?;
            if op == UpdateOperator::Rename && path.has_positional() {
                return Err(TranslateError::invalid_path(format!(
                    "$rename does not accept positional tokens in '{path_text}'"
                )));
            }
            validate_argument(op, path_text, arg)?;
            record_write(&mut writes, path_text.clone(), op)?;
            if op == UpdateOperator::Rename {
                let target = arg.as_str().expect("validated as string");
                let target_path = parse_path(target)?;
                if target_path.has_positional() {
                    return Err(TranslateError::invalid_path(format!(
                        "$rename does not accept positional tokens in '{target}'"
                    )));
                }
                record_write(&mut writes, target.to_string(), op)?;
            }
        }
    }
    Ok(())
}

fn record_write(
    writes: &mut HashMap<String, UpdateOperator>,
    path: String,
    op: UpdateOperator,
) -> Result<()> {
    if let Some(existing) = writes.get(&path) {
        let min_max_pair = matches!(
            (*existing, op),
            (UpdateOperator::Min, UpdateOperator::Max)
                | (UpdateOperator::Max, UpdateOperator::Min)
        );
        if !min_max_pair {
            return Err(TranslateError::conflicting_update(format!(
                "path '{path}' written by both {} and {}",
                existing.name(),
                op.name()
            )));
        }
    }
    writes.insert(path, op);
    Ok(())
}

/// Pass 3: emit one operator over all its paths, wrapping the accumulated
/// expression.
fn apply_operator(
    op: UpdateOperator,
    sql: String,
    pairs: &Object,
    ctx: &PositionalContext,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    match op {
        UpdateOperator::Rename => apply_rename(sql, pairs),
        UpdateOperator::Set | UpdateOperator::SetOnInsert => {
            apply_set(sql, pairs, ctx, params)
        }
        UpdateOperator::Unset => apply_unset(sql, pairs, ctx, params),
        _ => {
            let mut current = sql;
            for (path_text, arg) in pairs {
                let segments = resolve_segments(path_text, ctx)?;
                let leaf = leaf_for(op, path_text, arg)?;
                current = emit_leaf(&current, &segments, &leaf, ctx, path_text, params)?;
            }
            Ok(current)
        }
    }
}

fn apply_rename(sql: String, pairs: &Object) -> Result<String> {
    let mut current = sql;
    for (path_text, arg) in pairs {
        let source = parse_path(path_text)?.to_json_path();
        let target_text = arg.as_str().expect("validated as string");
        let target = parse_path(target_text)?.to_json_path();
        current = format!(
            "json_set(json_remove({current}, '{source}'), '{target}', \
             json_extract(data,'{source}'))"
        );
    }
    Ok(current)
}

/// `$set` combines all plain paths into one multi-pair `json_set` call;
/// positional paths each wrap individually.
fn apply_set(
    sql: String,
    pairs: &Object,
    ctx: &PositionalContext,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let resolved = resolve_all(pairs, ctx)?;
    if resolved.iter().all(|(segments, _, _)| !has_positional(segments)) {
        let mut call = format!("json_set({sql}");
        for (segments, _, arg) in &resolved {
            let encoded = encode_literal_into(arg, params)?;
            call.push_str(&format!(", '{}', {encoded}", json_path_of(segments)));
        }
        call.push(')');
        return Ok(call);
    }
    let mut current = sql;
    for (segments, path_text, arg) in &resolved {
        let leaf = LeafOp::Set(arg);
        current = emit_leaf(&current, segments, &leaf, ctx, path_text, params)?;
    }
    Ok(current)
}

/// `$unset` combines all plain paths into one `json_remove` call.
fn apply_unset(
    sql: String,
    pairs: &Object,
    ctx: &PositionalContext,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let resolved = resolve_all(pairs, ctx)?;
    if resolved.iter().all(|(segments, _, _)| !has_positional(segments)) {
        let paths: Vec<String> = resolved
            .iter()
            .map(|(segments, _, _)| format!("'{}'", json_path_of(segments)))
            .collect();
        return Ok(format!("json_remove({sql}, {})", paths.join(", ")));
    }
    let mut current = sql;
    for (segments, path_text, _) in &resolved {
        current = emit_leaf(&current, segments, &LeafOp::Unset, ctx, path_text, params)?;
    }
    Ok(current)
}

type ResolvedPair<'a> = (Vec<Segment>, &'a str, &'a Document);

fn resolve_all<'a>(pairs: &'a Object, ctx: &PositionalContext) -> Result<Vec<ResolvedPair<'a>>> {
    let mut resolved = Vec::with_capacity(pairs.len());
    for (path_text, arg) in pairs {
        resolved.push((resolve_segments(path_text, ctx)?, path_text.as_str(), arg));
    }
    Ok(resolved)
}

/// Parse a path and resolve its `$` tokens to concrete indices.
fn resolve_segments(path_text: &str, ctx: &PositionalContext) -> Result<Vec<Segment>> {
    let path = parse_path(path_text)?;
    positional::substitute_matched(path.segments(), ctx, path_text)
}

fn has_positional(segments: &[Segment]) -> bool {
    segments.iter().any(Segment::is_positional)
}

fn emit_leaf(
    sql: &str,
    segments: &[Segment],
    leaf: &LeafOp<'_>,
    ctx: &PositionalContext,
    path_text: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    if has_positional(segments) {
        positional::apply_mutation(sql, "data", segments, leaf, ctx, path_text, params)
    } else {
        leaf.emit(sql, "data", &json_path_of(segments), params)
    }
}

fn leaf_for<'a>(op: UpdateOperator, path_text: &str, arg: &'a Document) -> Result<LeafOp<'a>> {
    match op {
        UpdateOperator::Inc => Ok(LeafOp::Inc(arg)),
        UpdateOperator::Mul => Ok(LeafOp::Mul(arg)),
        UpdateOperator::Min => Ok(LeafOp::Min(arg)),
        UpdateOperator::Max => Ok(LeafOp::Max(arg)),
        UpdateOperator::Bit => {
            let (operation, operand) = bit_argument(path_text, arg)?;
            Ok(LeafOp::Bit(operation, operand))
        }
        UpdateOperator::Push => Ok(LeafOp::Push(push_argument(path_text, arg)?)),
        UpdateOperator::AddToSet => Ok(LeafOp::AddToSet(add_to_set_values(path_text, arg)?)),
        UpdateOperator::Pull => Ok(LeafOp::Pull(arg)),
        UpdateOperator::PullAll => {
            let items = arg.as_array().ok_or_else(|| {
                TranslateError::invalid_argument(format!(
                    "$pullAll on '{path_text}' requires an array"
                ))
            })?;
            Ok(LeafOp::PullAll(items))
        }
        UpdateOperator::Pop => {
            let direction = arg.as_i64().filter(|n| matches!(n, 1 | -1)).ok_or_else(|| {
                TranslateError::invalid_argument(format!(
                    "$pop on '{path_text}' accepts only 1 or -1"
                ))
            })?;
            Ok(LeafOp::Pop(direction))
        }
        // Rename, Set, SetOnInsert and Unset are handled by their own paths.
        _ => Err(TranslateError::invalid_operator(format!(
            "{} cannot be emitted as a single-path mutation",
            op.name()
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
