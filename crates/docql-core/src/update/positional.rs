//! Positional-operator planning for the update translator.
//!
//! A [`PositionalContext`] travels with an update and carries everything
//! needed to resolve `$`, `$[]` and `$[ident]` tokens: the index matched by
//! the query, an optional per-array index map for nested `$`, and the named
//! array filters. Resolution is deterministic; a token with no matching
//! context entry raises [`TranslateError::UnresolvedPositional`].
//!
//! `$` resolves to a concrete index before emission. `$[]` and `$[ident]`
//! become sub-queries that rebuild the array with the mutation applied to
//! the selected elements; paths mixing several tokens are compiled
//! innermost-first so an outer rewrite never sees an unresolved token.

use std::collections::HashMap;

use crate::document::Document;
use crate::error::{Result, TranslateError};
use crate::path::{json_path_of, validate_name, Segment};
use crate::query::field_ops::compile_element_condition;
use crate::sql::SqlValue;

use super::operators::LeafOp;

/// A named element-selection condition for `$[ident]` tokens.
#[derive(Debug, Clone)]
pub struct ArrayFilter {
    /// The identifier bound by `$[ident]`.
    pub identifier: String,
    /// Condition document; top-level keys reference the identifier.
    pub condition: Document,
}

impl ArrayFilter {
    /// Build an array filter, validating the identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TranslateError::InvalidPath`] for an unsafe identifier and
    /// [`TranslateError::InvalidArgument`] for a non-object condition.
    pub fn new(identifier: impl Into<String>, condition: Document) -> Result<Self> {
        let identifier = identifier.into();
        validate_name(&identifier)?;
        if condition.as_object().is_none() {
            return Err(TranslateError::invalid_argument(format!(
                "array filter '{identifier}' requires an object condition, found {}",
                condition.kind()
            )));
        }
        Ok(Self {
            identifier,
            condition,
        })
    }
}

/// Auxiliary state accompanying an update: which array index(es) matched
/// the query, and which filters bind to `$[ident]` tokens.
#[derive(Debug, Clone, Default)]
pub struct PositionalContext {
    /// The single matched index for `$`.
    pub matched_index: Option<u64>,
    /// Matched index per array path (dotted form), for nested `$`.
    pub matched_by_array: HashMap<String, u64>,
    /// Ordered array filters for `$[ident]` tokens.
    pub array_filters: Vec<ArrayFilter>,
}

impl PositionalContext {
    /// A context carrying only the single matched index.
    #[must_use]
    pub fn with_matched_index(index: u64) -> Self {
        Self {
            matched_index: Some(index),
            ..Self::default()
        }
    }

    /// A context carrying only array filters.
    #[must_use]
    pub fn with_array_filters(filters: Vec<ArrayFilter>) -> Self {
        Self {
            array_filters: filters,
            ..Self::default()
        }
    }

    /// Look up the filter bound to an identifier.
    #[must_use]
    pub fn filter_for(&self, identifier: &str) -> Option<&ArrayFilter> {
        self.array_filters.iter().find(|f| f.identifier == identifier)
    }

    /// Resolve `$` for the array at `array_path` (dotted form).
    #[must_use]
    pub fn index_for(&self, array_path: &str) -> Option<u64> {
        self.matched_by_array.get(array_path).copied().or(self.matched_index)
    }
}

/// Replace each `$` segment with the concrete index the context supplies
/// for its innermost enclosing array.
pub(crate) fn substitute_matched(
    segments: &[Segment],
    ctx: &PositionalContext,
    path_text: &str,
) -> Result<Vec<Segment>> {
    let mut resolved = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        if *segment == Segment::MatchedPosition {
            let array_path = segments[..i]
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(".");
            let index = ctx.index_for(&array_path).ok_or_else(|| {
                TranslateError::unresolved_positional(format!(
                    "no matched index for '$' in path '{path_text}'"
                ))
            })?;
            resolved.push(Segment::Index(index));
        } else {
            resolved.push(segment.clone());
        }
    }
    Ok(resolved)
}

/// Apply a leaf mutation along a path that may contain `$[]` / `$[ident]`
/// tokens, rewriting each token into an array-rebuilding sub-query.
///
/// `doc` is the expression being wrapped (the accumulated update so far, or
/// `json(value)` inside an iteration); `read` is the expression current
/// values are read from (`data`, or `value` inside an iteration).
pub(crate) fn apply_mutation(
    doc: &str,
    read: &str,
    segments: &[Segment],
    leaf: &LeafOp<'_>,
    ctx: &PositionalContext,
    path_text: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let Some(split) = segments.iter().position(Segment::is_positional) else {
        return leaf.emit(doc, read, &json_path_of(segments), params);
    };
    let prefix = &segments[..split];
    let suffix = &segments[split + 1..];
    let array_path = json_path_of(prefix);
    let array_expr = format!("json_extract({read},'{array_path}')");

    match &segments[split] {
        Segment::AllElements => {
            let element = apply_mutation("json(value)", "value", suffix, leaf, ctx, path_text, params)?;
            Ok(format!(
                "json_set({doc}, '{array_path}', (SELECT json_group_array({element}) \
                 FROM json_each({array_expr})))"
            ))
        }
        Segment::Filtered(identifier) => {
            let filter = ctx.filter_for(identifier).ok_or_else(|| {
                TranslateError::unresolved_positional(format!(
                    "no array filter named '{identifier}' for path '{path_text}'"
                ))
            })?;
            // The condition compiles before the element mutation: its
            // placeholders come first in the emitted CASE.
            let condition = compile_filter_condition(filter, params)?;
            let element = apply_mutation("json(value)", "value", suffix, leaf, ctx, path_text, params)?;
            Ok(format!(
                "json_set({doc}, '{array_path}', (SELECT json_group_array(CASE WHEN {condition} \
                 THEN {element} ELSE value END) FROM json_each({array_expr})))"
            ))
        }
        // `$` was substituted by `substitute_matched` before emission.
        _ => Err(TranslateError::unresolved_positional(format!(
            "unresolved '$' in path '{path_text}'"
        ))),
    }
}

/// Compile an array-filter condition into a predicate over the `json_each`
/// iteration value. Every top-level key must reference the identifier,
/// either bare (`ident`) or as a prefix (`ident.field`).
fn compile_filter_condition(
    filter: &ArrayFilter,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    // The fields are public, so a hand-built filter may bypass
    // `ArrayFilter::new`; re-check the shape rather than trust it.
    let condition = filter.condition.as_object().ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "array filter '{}' requires an object condition",
            filter.identifier
        ))
    })?;
    let ident = filter.identifier.as_str();
    let mut parts = Vec::with_capacity(condition.len());
    for (key, value) in condition {
        if key == ident {
            parts.push(compile_element_condition(value, params)?);
        } else if let Some(rest) = key.strip_prefix(ident).and_then(|k| k.strip_prefix('.')) {
            let mut scoped = crate::document::Object::new();
            scoped.insert(rest.to_string(), value.clone());
            parts.push(compile_element_condition(&Document::Object(scoped), params)?);
        } else {
            return Err(TranslateError::invalid_argument(format!(
                "array filter condition key '{key}' does not reference '{ident}'"
            )));
        }
    }
    if parts.is_empty() {
        return Err(TranslateError::invalid_argument(format!(
            "array filter '{ident}' has an empty condition"
        )));
    }
    Ok(crate::query::join_group(parts, " AND "))
}

// ============================================================================
// Tests
// ============================================================================
