//! Aggregation pipelines compiled to composed SQL statements.
//!
//! [`PipelineTranslator`] folds an ordered list of stages over a select
//! shape - the SQL form of the current result set. Each stage either
//! refines the shape (adds a predicate, tightens a limit, overwrites the
//! order) or, when the shape can no longer absorb it, wraps the shape into
//! a sub-select and starts fresh. The output column is always named `data`,
//! so every wrap presents the same surface to the next stage.
//!
//! # Example
//!
//! ```rust
//! use docql_core::aggregation::PipelineTranslator;
//! use docql_core::Document;
//! use serde_json::json;
//!
//! let pipeline = [
//!     Document::from_json(&json!({"$match": {"status": "active"}})).unwrap(),
//!     Document::from_json(&json!({"$limit": 10})).unwrap(),
//! ];
//! let t = PipelineTranslator::translate_pipeline("users", &pipeline).unwrap();
//! assert_eq!(
//!     t.sql,
//!     "SELECT data FROM users WHERE json_extract(data,'$.status') = ? LIMIT 10"
//! );
//! ```

pub(crate) mod expression;
mod group;
mod projection;
mod sort;

use tracing::debug;

use crate::document::Document;
use crate::error::{Result, TranslateError};
use crate::path::{parse_path, validate_name, FieldPath};
use crate::query::compile_filter;
use crate::sql::{SqlValue, Translation};

use expression::constant_int;
pub use projection::translate_projection;
pub use sort::translate_sort;

/// Compiles aggregation pipelines into a single SQL statement.
///
/// Stateless and pure: identical inputs yield byte-identical outputs.
pub struct PipelineTranslator;

impl PipelineTranslator {
    /// Compile a pipeline over a collection into a statement yielding the
    /// stage output documents in order, one `data` column per row.
    ///
    /// # Errors
    ///
    /// `InvalidStage` for unknown or misconfigured stages, `Unsupported`
    /// for recognised stages outside this core's scope, plus the query and
    /// expression error kinds for stage arguments.
    pub fn translate_pipeline(collection: &str, pipeline: &[Document]) -> Result<Translation> {
        validate_name(collection)?;
        let mut shape = SelectShape::source(collection);
        for stage in pipeline {
            shape = apply_stage(shape, stage)?;
        }
        let rendered = shape.render();
        debug!(
            stages = pipeline.len(),
            sql_len = rendered.sql.len(),
            "translated aggregation pipeline"
        );
        Ok(rendered)
    }
}

/// The SQL form of the current result set:
/// `SELECT <select> FROM <from> WHERE <preds> GROUP BY .. ORDER BY .. LIMIT ..`.
struct SelectShape {
    select: Translation,
    from: Translation,
    wheres: Vec<Translation>,
    group_by: Option<Translation>,
    order_by: Option<Translation>,
    limit: Option<i64>,
    skip: Option<i64>,
}

impl SelectShape {
    fn source(collection: &str) -> Self {
        Self::over(Translation::fragment(collection), Translation::fragment("data"))
    }

    fn over(from: Translation, select: Translation) -> Self {
        Self {
            select,
            from,
            wheres: Vec::new(),
            group_by: None,
            order_by: None,
            limit: None,
            skip: None,
        }
    }

    /// Whether the shape still selects the raw `data` column.
    fn select_is_plain(&self) -> bool {
        self.select.sql == "data" && self.group_by.is_none()
    }

    fn has_row_window(&self) -> bool {
        self.limit.is_some() || self.skip.is_some()
    }

    /// Close the shape into a sub-select and start a fresh one over it.
    fn wrapped(self) -> Self {
        let rendered = self.render();
        Self::over(
            Translation::new(format!("({})", rendered.sql), rendered.params),
            Translation::fragment("data"),
        )
    }

    /// Render the shape; parameters concatenate in textual order.
    fn render(self) -> Translation {
        let mut out = Translation::fragment("SELECT ");
        let plain = self.select.sql == "data";
        out = out.concat(self.select);
        if !plain {
            out.sql.push_str(" AS data");
        }
        out.sql.push_str(" FROM ");
        out = out.concat(self.from);
        for (i, predicate) in self.wheres.into_iter().enumerate() {
            out.sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            out = out.concat(predicate);
        }
        if let Some(group) = self.group_by {
            out.sql.push_str(" GROUP BY ");
            out = out.concat(group);
        }
        if let Some(order) = self.order_by {
            out.sql.push_str(" ORDER BY ");
            out = out.concat(order);
        }
        match (self.limit, self.skip) {
            (Some(limit), Some(skip)) => {
                out.sql.push_str(&format!(" LIMIT {limit} OFFSET {skip}"));
            }
            (Some(limit), None) => out.sql.push_str(&format!(" LIMIT {limit}")),
            // The host requires a LIMIT clause to carry an OFFSET.
            (None, Some(skip)) => out.sql.push_str(&format!(" LIMIT -1 OFFSET {skip}")),
            (None, None) => {}
        }
        out
    }
}

fn apply_stage(shape: SelectShape, stage: &Document) -> Result<SelectShape> {
    let object = stage
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| {
            TranslateError::invalid_stage("pipeline stages take exactly one operator")
        })?;
    let (name, arg) = object.iter().next().expect("len checked");
    match name.as_str() {
        "$match" => apply_match(shape, arg),
        "$sort" => apply_sort(shape, arg),
        "$limit" => apply_limit(shape, arg),
        "$skip" => apply_skip(shape, arg),
        "$count" => apply_count(shape, arg),
        "$group" => apply_group(shape, arg),
        "$unwind" => apply_unwind(shape, arg),
        "$lookup" => apply_lookup(shape, arg),
        "$addFields" | "$set" => apply_add_fields(shape, name, arg),
        "$replaceRoot" => apply_replace_root(shape, arg),
        "$project" => apply_project(shape, arg),
        "$sample" => apply_sample(shape, arg),
        "$out" | "$merge" | "$facet" | "$bucket" | "$graphLookup" | "$geoNear" => {
            Err(TranslateError::unsupported(format!(
                "{name} is outside this translator's scope"
            )))
        }
        _ => Err(TranslateError::invalid_stage(format!(
            "unknown pipeline stage '{name}'"
        ))),
    }
}

/// `$match` extends the WHERE while the column list is untouched; after a
/// projection or group the shape re-wraps so the predicate sees the new
/// root, and after a row window so it does not filter retroactively.
fn apply_match(shape: SelectShape, arg: &Document) -> Result<SelectShape> {
    let filter = arg.as_object().ok_or_else(|| {
        TranslateError::invalid_stage(format!("$match requires an object, found {}", arg.kind()))
    })?;
    let mut shape = if shape.select_is_plain() && !shape.has_row_window() {
        shape
    } else {
        shape.wrapped()
    };
    let mut params = Vec::new();
    let sql = compile_filter(filter, "data", &mut params)?;
    shape.wheres.push(Translation::new(sql, params));
    Ok(shape)
}

/// Successive sorts overwrite earlier ones; a sort after a row window must
/// wrap, a sort after a projection may refine (the SELECT list is computed
/// per row either way).
fn apply_sort(shape: SelectShape, arg: &Document) -> Result<SelectShape> {
    let order = translate_sort(arg)?;
    let mut shape = if shape.has_row_window() { shape.wrapped() } else { shape };
    shape.order_by = Some(order);
    Ok(shape)
}

fn apply_limit(mut shape: SelectShape, arg: &Document) -> Result<SelectShape> {
    let n = constant_int(arg).filter(|n| *n > 0).ok_or_else(|| {
        TranslateError::invalid_stage("$limit requires a positive integer")
    })?;
    // Limits compose by taking the minimum.
    shape.limit = Some(shape.limit.map_or(n, |existing| existing.min(n)));
    Ok(shape)
}

fn apply_skip(shape: SelectShape, arg: &Document) -> Result<SelectShape> {
    let n = constant_int(arg).filter(|n| *n >= 0).ok_or_else(|| {
        TranslateError::invalid_stage("$skip requires a non-negative integer")
    })?;
    // A skip after a limit cannot fold into the same LIMIT/OFFSET pair,
    // where the offset applies first.
    let mut shape = if shape.limit.is_some() { shape.wrapped() } else { shape };
    shape.skip = Some(shape.skip.unwrap_or(0) + n);
    Ok(shape)
}

/// `$count` is sugar for a null-key group counting rows, projected to the
/// given name.
fn apply_count(shape: SelectShape, arg: &Document) -> Result<SelectShape> {
    let name = arg.as_str().ok_or_else(|| {
        TranslateError::invalid_stage("$count requires a field-name string")
    })?;
    validate_name(name)?;
    let mut shape = shape.wrapped();
    shape.select = Translation::fragment(format!("json_object('{name}', COUNT(*))"));
    Ok(shape)
}

fn apply_group(shape: SelectShape, arg: &Document) -> Result<SelectShape> {
    let compiled = group::compile_group(arg)?;
    let mut shape = shape.wrapped();
    shape.select = compiled.select;
    shape.group_by = compiled.group_by;
    Ok(shape)
}

struct UnwindSpec {
    path: FieldPath,
    include_index: Option<FieldPath>,
    preserve_empty: bool,
}

fn unwind_spec(arg: &Document) -> Result<UnwindSpec> {
    let (path_text, include_index, preserve_empty) = match arg {
        Document::String(s) => (s.as_str(), None, false),
        Document::Object(object) => {
            let path_text = object
                .get("path")
                .and_then(Document::as_str)
                .ok_or_else(|| {
                    TranslateError::invalid_stage("$unwind requires a path string")
                })?;
            for key in object.keys() {
                if !matches!(key.as_str(), "path" | "includeArrayIndex" | "preserveNullAndEmptyArrays") {
                    return Err(TranslateError::invalid_stage(format!(
                        "$unwind has unknown option '{key}'"
                    )));
                }
            }
            let include_index = match object.get("includeArrayIndex") {
                None => None,
                Some(value) => {
                    let name = value.as_str().ok_or_else(|| {
                        TranslateError::invalid_stage(
                            "$unwind includeArrayIndex requires a field-name string",
                        )
                    })?;
                    Some(name)
                }
            };
            let preserve = match object.get("preserveNullAndEmptyArrays") {
                None => false,
                Some(Document::Bool(b)) => *b,
                Some(_) => {
                    return Err(TranslateError::invalid_stage(
                        "$unwind preserveNullAndEmptyArrays requires a boolean",
                    ))
                }
            };
            (path_text, include_index, preserve)
        }
        _ => {
            return Err(TranslateError::invalid_stage(format!(
                "$unwind requires a path or options object, found {}",
                arg.kind()
            )))
        }
    };
    let field = path_text.strip_prefix('$').ok_or_else(|| {
        TranslateError::invalid_stage(format!(
            "$unwind path must start with '$', found '{path_text}'"
        ))
    })?;
    let path = parse_path(field)?;
    let include_index = include_index.map(parse_path).transpose()?;
    if path.has_positional() || include_index.as_ref().is_some_and(FieldPath::has_positional) {
        return Err(TranslateError::invalid_path(
            "positional token not allowed in $unwind",
        ));
    }
    Ok(UnwindSpec {
        path,
        include_index,
        preserve_empty,
    })
}

/// `$unwind` joins the wrapped shape against `json_each` over the target
/// array and projects one row per element.
fn apply_unwind(shape: SelectShape, arg: &Document) -> Result<SelectShape> {
    let spec = unwind_spec(arg)?;
    let jpath = spec.path.to_json_path();
    let sub = shape.render();

    let mut replaced = format!("json_set(data, '{jpath}', je.value)");
    if let Some(index) = &spec.include_index {
        replaced = format!(
            "json_set({replaced}, '{}', je.key)",
            index.to_json_path()
        );
    }
    let (from_sql, select_sql) = if spec.preserve_empty {
        let missing = match &spec.include_index {
            Some(index) => format!(
                "json_set(json_remove(data, '{jpath}'), '{}', json('null'))",
                index.to_json_path()
            ),
            None => format!("json_remove(data, '{jpath}')"),
        };
        (
            format!(
                "({}) LEFT JOIN json_each(json_extract(data,'{jpath}')) AS je ON 1",
                sub.sql
            ),
            format!("CASE WHEN je.value IS NULL THEN {missing} ELSE {replaced} END"),
        )
    } else {
        (
            format!(
                "({}), json_each(json_extract(data,'{jpath}')) AS je",
                sub.sql
            ),
            replaced,
        )
    };
    Ok(SelectShape::over(
        Translation::new(from_sql, sub.params),
        Translation::fragment(select_sql),
    ))
}

/// `$lookup` sets an array of matching foreign documents under `as`,
/// via a correlated sub-query against the foreign collection.
fn apply_lookup(shape: SelectShape, arg: &Document) -> Result<SelectShape> {
    let object = arg.as_object().ok_or_else(|| {
        TranslateError::invalid_stage(format!("$lookup requires an object, found {}", arg.kind()))
    })?;
    let field = |key: &str| -> Result<&str> {
        object.get(key).and_then(Document::as_str).ok_or_else(|| {
            TranslateError::invalid_stage(format!("$lookup requires a string '{key}'"))
        })
    };
    let foreign = field("from")?;
    validate_name(foreign)?;
    let local_field = plain_path(field("localField")?, "$lookup localField")?;
    let foreign_field = plain_path(field("foreignField")?, "$lookup foreignField")?;
    let as_field = plain_path(field("as")?, "$lookup as")?;
    for key in object.keys() {
        if !matches!(key.as_str(), "from" | "localField" | "foreignField" | "as") {
            return Err(TranslateError::invalid_stage(format!(
                "$lookup has unknown option '{key}'"
            )));
        }
    }

    let sub = shape.render();
    let select = Translation::fragment(format!(
        "json_set(src.data, '{}', (SELECT json_group_array(json(lk.data)) FROM {foreign} AS lk \
         WHERE json_extract(lk.data,'{}') = json_extract(src.data,'{}')))",
        as_field.to_json_path(),
        foreign_field.to_json_path(),
        local_field.to_json_path(),
    ));
    Ok(SelectShape::over(
        Translation::new(format!("({}) AS src", sub.sql), sub.params),
        select,
    ))
}

fn plain_path(text: &str, what: &str) -> Result<FieldPath> {
    let path = parse_path(text)?;
    if path.has_positional() {
        return Err(TranslateError::invalid_path(format!(
            "positional token not allowed in {what} '{text}'"
        )));
    }
    Ok(path)
}

/// `$addFields` / `$set` compose one `json_set` over the current root.
fn apply_add_fields(shape: SelectShape, name: &str, arg: &Document) -> Result<SelectShape> {
    let fields = arg.as_object().filter(|o| !o.is_empty()).ok_or_else(|| {
        TranslateError::invalid_stage(format!("{name} requires a non-empty object"))
    })?;
    let mut shape = if shape.select_is_plain() { shape } else { shape.wrapped() };
    let mut params: Vec<SqlValue> = Vec::new();
    let mut call = "json_set(data".to_string();
    for (key, value) in fields {
        let path = plain_path(key, name)?;
        let compiled = expression::compile_into(value, "data", &mut params)?;
        call.push_str(&format!(", '{}', {compiled}", path.to_json_path()));
    }
    call.push(')');
    shape.select = Translation::new(call, params);
    Ok(shape)
}

/// `$replaceRoot` swaps the select expression; later stages see the new
/// root under the same `data` column.
fn apply_replace_root(shape: SelectShape, arg: &Document) -> Result<SelectShape> {
    let new_root = arg
        .as_object()
        .filter(|o| o.len() == 1)
        .and_then(|o| o.get("newRoot"))
        .ok_or_else(|| TranslateError::invalid_stage("$replaceRoot requires newRoot"))?;
    let mut shape = if shape.select_is_plain() { shape } else { shape.wrapped() };
    let mut params = Vec::new();
    let sql = expression::compile_into(new_root, "data", &mut params)?;
    shape.select = Translation::new(sql, params);
    Ok(shape)
}

fn apply_project(shape: SelectShape, arg: &Document) -> Result<SelectShape> {
    let mut shape = if shape.select_is_plain() { shape } else { shape.wrapped() };
    let mut params = Vec::new();
    let sql = projection::compile_projection(arg, &mut params)?;
    shape.select = Translation::new(sql, params);
    Ok(shape)
}

/// `$sample` orders by the host's random() and keeps `size` rows.
fn apply_sample(shape: SelectShape, arg: &Document) -> Result<SelectShape> {
    let size = arg
        .as_object()
        .filter(|o| o.len() == 1)
        .and_then(|o| o.get("size"))
        .and_then(constant_int)
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            TranslateError::invalid_stage("$sample requires {size: positive integer}")
        })?;
    let mut shape = if shape.order_by.is_some() || shape.has_row_window() {
        shape.wrapped()
    } else {
        shape
    };
    shape.order_by = Some(Translation::fragment("random()"));
    shape.limit = Some(size);
    Ok(shape)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pipeline(stages: &[serde_json::Value]) -> Translation {
        let docs: Vec<Document> = stages
            .iter()
            .map(|s| Document::from_json(s).unwrap())
            .collect();
        PipelineTranslator::translate_pipeline("users", &docs).unwrap()
    }

    fn pipeline_err(stages: &[serde_json::Value]) -> TranslateError {
        let docs: Vec<Document> = stages
            .iter()
            .map(|s| Document::from_json(s).unwrap())
            .collect();
        PipelineTranslator::translate_pipeline("users", &docs).unwrap_err()
    }

    #[test]
    fn test_empty_pipeline_selects_the_collection() {
        let t = pipeline(&[]);
        assert_eq!(t.sql, "SELECT data FROM users");
        assert!(t.params.is_empty());
    }

    #[test]
    fn test_invalid_collection_name_rejected() {
        let err = PipelineTranslator::translate_pipeline("users; drop", &[]).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PATH");
    }

    #[test]
    fn test_match_sort_limit_refine_one_shape() {
        let t = pipeline(&[
            json!({"$match": {"status": "active"}}),
            json!({"$sort": {"name": 1}}),
            json!({"$limit": 10}),
        ]);
        assert_eq!(
            t.sql,
            "SELECT data FROM users WHERE json_extract(data,'$.status') = ? \
             ORDER BY json_extract(data,'$.name') ASC LIMIT 10"
        );
        assert_eq!(t.params, vec![SqlValue::Text("active".to_string())]);
    }

    #[test]
    fn test_successive_sorts_overwrite() {
        let t = pipeline(&[json!({"$sort": {"a": 1}}), json!({"$sort": {"b": -1}})]);
        assert_eq!(
            t.sql,
            "SELECT data FROM users ORDER BY json_extract(data,'$.b') DESC"
        );
    }

    #[test]
    fn test_limits_take_the_minimum() {
        let t = pipeline(&[json!({"$limit": 10}), json!({"$limit": 3}), json!({"$limit": 7})]);
        assert_eq!(t.sql, "SELECT data FROM users LIMIT 3");
    }

    #[test]
    fn test_skips_add() {
        let t = pipeline(&[json!({"$skip": 4}), json!({"$skip": 6})]);
        assert_eq!(t.sql, "SELECT data FROM users LIMIT -1 OFFSET 10");
    }

    #[test]
    fn test_skip_after_limit_wraps() {
        let t = pipeline(&[json!({"$limit": 10}), json!({"$skip": 3})]);
        assert_eq!(
            t.sql,
            "SELECT data FROM (SELECT data FROM users LIMIT 10) LIMIT -1 OFFSET 3"
        );
    }

    #[test]
    fn test_skip_then_limit_share_a_shape() {
        let t = pipeline(&[json!({"$skip": 3}), json!({"$limit": 10})]);
        assert_eq!(t.sql, "SELECT data FROM users LIMIT 10 OFFSET 3");
    }

    #[test]
    fn test_match_after_limit_wraps() {
        let t = pipeline(&[json!({"$limit": 5}), json!({"$match": {"a": 1}})]);
        assert_eq!(
            t.sql,
            "SELECT data FROM (SELECT data FROM users LIMIT 5) \
             WHERE json_extract(data,'$.a') = ?"
        );
    }

    #[test]
    fn test_consecutive_matches_extend_the_where() {
        let t = pipeline(&[json!({"$match": {"a": 1}}), json!({"$match": {"b": 2}})]);
        assert_eq!(
            t.sql,
            "SELECT data FROM users WHERE json_extract(data,'$.a') = ? \
             AND json_extract(data,'$.b') = ?"
        );
    }

    #[test]
    fn test_group_wraps_and_groups() {
        let t = pipeline(&[
            json!({"$match": {"active": true}}),
            json!({"$group": {"_id": "$dept", "total": {"$sum": "$salary"}}}),
        ]);
        assert_eq!(
            t.sql,
            "SELECT json_object('_id', json_extract(data,'$.dept'), 'total', \
             SUM(json_extract(data,'$.salary'))) AS data FROM \
             (SELECT data FROM users WHERE json_extract(data,'$.active') = json(?)) \
             GROUP BY json_extract(data,'$.dept')"
        );
    }

    #[test]
    fn test_match_after_group_sees_the_new_root() {
        let t = pipeline(&[
            json!({"$group": {"_id": "$dept", "total": {"$sum": 1}}}),
            json!({"$match": {"total": {"$gt": 100}}}),
        ]);
        assert!(t.sql.contains("GROUP BY"));
        assert!(t
            .sql
            .ends_with("WHERE json_extract(data,'$.total') > ?"));
    }

    #[test]
    fn test_count_is_group_sugar() {
        let t = pipeline(&[json!({"$match": {"a": 1}}), json!({"$count": "total"})]);
        assert_eq!(
            t.sql,
            "SELECT json_object('total', COUNT(*)) AS data FROM \
             (SELECT data FROM users WHERE json_extract(data,'$.a') = ?)"
        );
    }

    #[test]
    fn test_unwind_joins_json_each() {
        let t = pipeline(&[json!({"$unwind": "$tags"})]);
        assert_eq!(
            t.sql,
            "SELECT json_set(data, '$.tags', je.value) AS data FROM \
             (SELECT data FROM users), json_each(json_extract(data,'$.tags')) AS je"
        );
    }

    #[test]
    fn test_unwind_with_index_and_preserve() {
        let t = pipeline(&[json!({"$unwind": {
            "path": "$tags",
            "includeArrayIndex": "i",
            "preserveNullAndEmptyArrays": true
        }})]);
        assert!(t.sql.contains("LEFT JOIN json_each(json_extract(data,'$.tags')) AS je ON 1"));
        assert!(t.sql.contains("CASE WHEN je.value IS NULL THEN"));
        assert!(t.sql.contains("json_set(json_remove(data, '$.tags'), '$.i', json('null'))"));
        assert!(t.sql.contains("json_set(json_set(data, '$.tags', je.value), '$.i', je.key)"));
    }

    #[test]
    fn test_unwind_requires_dollar_path() {
        let err = pipeline_err(&[json!({"$unwind": "tags"})]);
        assert_eq!(err.error_code(), "INVALID_STAGE");
    }

    #[test]
    fn test_lookup_correlated_subquery() {
        let t = pipeline(&[json!({"$lookup": {
            "from": "orders",
            "localField": "_id",
            "foreignField": "user_id",
            "as": "orders"
        }})]);
        assert_eq!(
            t.sql,
            "SELECT json_set(src.data, '$.orders', (SELECT json_group_array(json(lk.data)) \
             FROM orders AS lk WHERE json_extract(lk.data,'$.user_id') = \
             json_extract(src.data,'$._id'))) AS data FROM (SELECT data FROM users) AS src"
        );
    }

    #[test]
    fn test_add_fields_composes_json_set() {
        let t = pipeline(&[json!({"$addFields": {"total": {"$add": ["$a", "$b"]}}})]);
        assert_eq!(
            t.sql,
            "SELECT json_set(data, '$.total', (json_extract(data,'$.a') + \
             json_extract(data,'$.b'))) AS data FROM users"
        );
    }

    #[test]
    fn test_set_stage_is_add_fields() {
        let t = pipeline(&[json!({"$set": {"flag": true}})]);
        assert!(t.sql.starts_with("SELECT json_set(data, '$.flag', json(?)) AS data"));
    }

    #[test]
    fn test_replace_root() {
        let t = pipeline(&[json!({"$replaceRoot": {"newRoot": "$profile"}})]);
        assert_eq!(
            t.sql,
            "SELECT json_extract(data,'$.profile') AS data FROM users"
        );
    }

    #[test]
    fn test_stages_after_replace_root_see_new_root() {
        let t = pipeline(&[
            json!({"$replaceRoot": {"newRoot": "$profile"}}),
            json!({"$match": {"age": {"$gt": 21}}}),
        ]);
        assert_eq!(
            t.sql,
            "SELECT data FROM (SELECT json_extract(data,'$.profile') AS data FROM users) \
             WHERE json_extract(data,'$.age') > ?"
        );
    }

    #[test]
    fn test_project_after_project_wraps() {
        let t = pipeline(&[
            json!({"$project": {"_id": 0, "a": 1, "b": 1}}),
            json!({"$project": {"a": 1}}),
        ]);
        assert_eq!(t.sql.matches("SELECT").count(), 2);
        assert!(t.sql.contains("FROM (SELECT json_object("));
    }

    #[test]
    fn test_sample() {
        let t = pipeline(&[json!({"$sample": {"size": 5}})]);
        assert_eq!(t.sql, "SELECT data FROM users ORDER BY random() LIMIT 5");
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let err = pipeline_err(&[json!({"$quantize": {}})]);
        assert_eq!(err.error_code(), "INVALID_STAGE");
    }

    #[test]
    fn test_out_is_unsupported() {
        let err = pipeline_err(&[json!({"$out": "other"})]);
        assert_eq!(err.error_code(), "UNSUPPORTED");
    }

    #[test]
    fn test_multi_key_stage_rejected() {
        let err = pipeline_err(&[json!({"$match": {}, "$limit": 1})]);
        assert_eq!(err.error_code(), "INVALID_STAGE");
    }

    #[test]
    fn test_placeholders_match_params_through_wraps() {
        let t = pipeline(&[
            json!({"$match": {"a": 1, "b": {"$in": [1, 2]}}}),
            json!({"$group": {"_id": "$a", "n": {"$sum": 1}}}),
            json!({"$match": {"n": {"$gte": 2}}}),
            json!({"$sort": {"n": -1}}),
            json!({"$limit": 3}),
        ]);
        assert_eq!(t.placeholder_count(), t.params.len());
        // Inner filter params precede the outer HAVING-like filter's.
        // Textual order: the group's SUM argument sits in the outer SELECT
        // list, before the inner filter's placeholders in FROM.
        assert_eq!(
            t.params,
            vec![
                SqlValue::Int(1),
                SqlValue::Int(1),
                SqlValue::Int(1),
                SqlValue::Int(2),
                SqlValue::Int(2)
            ]
        );
    }
}
