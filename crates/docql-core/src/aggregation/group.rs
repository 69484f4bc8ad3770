//! The `$group` stage: key expression and accumulator compilation.

use crate::document::{Document, Object};
use crate::error::{Result, TranslateError};
use crate::path::validate_name;
use crate::sql::{SqlValue, Translation};

use super::expression;

/// Compiled `$group` output: the select expression building the grouped
/// document and the optional `GROUP BY` expression (absent for `_id: null`,
/// which folds everything into one group).
#[derive(Debug)]
pub(crate) struct GroupShape {
    pub select: Translation,
    pub group_by: Option<Translation>,
}

pub(crate) fn compile_group(arg: &Document) -> Result<GroupShape> {
    let object = arg.as_object().ok_or_else(|| {
        TranslateError::invalid_stage(format!(
            "$group requires an object, found {}",
            arg.kind()
        ))
    })?;
    let key = object
        .get("_id")
        .ok_or_else(|| TranslateError::invalid_stage("$group requires an _id key"))?;

    let mut select_params: Vec<SqlValue> = Vec::new();
    let mut pairs: Vec<String> = Vec::new();
    let group_by = match key {
        Document::Null => {
            pairs.push("'_id', NULL".to_string());
            None
        }
        _ => {
            // The key expression appears twice: in the output document and
            // in GROUP BY. Each occurrence carries its own placeholders.
            let key_sql = expression::compile_into(key, "data", &mut select_params)?;
            pairs.push(format!("'_id', {key_sql}"));
            let mut group_params = Vec::new();
            let group_sql = expression::compile_into(key, "data", &mut group_params)?;
            Some(Translation::new(group_sql, group_params))
        }
    };

    for (name, accumulator) in object {
        if name == "_id" {
            continue;
        }
        validate_name(name)?;
        let compiled = compile_accumulator(name, accumulator, &mut select_params)?;
        pairs.push(format!("'{name}', {compiled}"));
    }

    Ok(GroupShape {
        select: Translation::new(format!("json_object({})", pairs.join(", ")), select_params),
        group_by,
    })
}

/// Map one accumulator (`{$sum: expr}`, …) onto a host aggregate.
fn compile_accumulator(
    name: &str,
    accumulator: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let object: &Object = accumulator
        .as_object()
        .filter(|o| o.len() == 1 && accumulator.is_operator_object())
        .ok_or_else(|| {
            TranslateError::invalid_expression(format!(
                "accumulator '{name}' requires a single-operator object"
            ))
        })?;
    let (op, arg) = object.iter().next().expect("len checked");
    match op.as_str() {
        "$count" => {
            let empty = arg.as_object().is_some_and(Object::is_empty);
            if !empty {
                return Err(TranslateError::invalid_expression(format!(
                    "$count in accumulator '{name}' takes an empty object"
                )));
            }
            Ok("COUNT(*)".to_string())
        }
        "$sum" => Ok(format!("SUM({})", expression::compile_into(arg, "data", params)?)),
        "$avg" => Ok(format!("AVG({})", expression::compile_into(arg, "data", params)?)),
        "$min" => Ok(format!("MIN({})", expression::compile_into(arg, "data", params)?)),
        "$max" => Ok(format!("MAX({})", expression::compile_into(arg, "data", params)?)),
        "$push" => Ok(format!(
            "json_group_array({})",
            expression::compile_into(arg, "data", params)?
        )),
        "$addToSet" => Ok(format!(
            "json_group_array(DISTINCT {})",
            expression::compile_into(arg, "data", params)?
        )),
        // The host has no ordered first/last aggregates; the group array
        // preserves input order, so its ends are the answers.
        "$first" => Ok(format!(
            "json_extract(json_group_array({}),'$[0]')",
            expression::compile_into(arg, "data", params)?
        )),
        "$last" => Ok(format!(
            "json_extract(json_group_array({}),'$[#-1]')",
            expression::compile_into(arg, "data", params)?
        )),
        _ => Err(TranslateError::invalid_expression(format!(
            "unknown accumulator '{op}' on '{name}'"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn group(spec: serde_json::Value) -> GroupShape {
        compile_group(&Document::from_json(&spec).unwrap()).unwrap()
    }

    fn group_err(spec: serde_json::Value) -> TranslateError {
        compile_group(&Document::from_json(&spec).unwrap()).unwrap_err()
    }

    #[test]
    fn test_null_key_has_no_group_by() {
        let shape = group(json!({"_id": null, "n": {"$sum": 1}}));
        assert_eq!(shape.select.sql, "json_object('_id', NULL, 'n', SUM(?))");
        assert!(shape.group_by.is_none());
    }

    #[test]
    fn test_field_key_groups_by_the_same_expression() {
        let shape = group(json!({"_id": "$dept", "total": {"$sum": "$salary"}}));
        assert_eq!(
            shape.select.sql,
            "json_object('_id', json_extract(data,'$.dept'), 'total', \
             SUM(json_extract(data,'$.salary')))"
        );
        assert_eq!(shape.group_by.unwrap().sql, "json_extract(data,'$.dept')");
    }

    #[test]
    fn test_compound_key_document() {
        let shape = group(json!({"_id": {"d": "$dept", "y": "$year"}}));
        assert!(shape.select.sql.contains(
            "json_object('d', json_extract(data,'$.dept'), 'y', json_extract(data,'$.year'))"
        ));
        assert!(shape.group_by.is_some());
    }

    #[test]
    fn test_push_and_add_to_set_use_group_arrays() {
        let shape = group(json!({"_id": "$dept", "names": {"$push": "$name"}}));
        assert!(shape.select.sql.contains("json_group_array(json_extract(data,'$.name'))"));
        let shape = group(json!({"_id": "$dept", "tags": {"$addToSet": "$tag"}}));
        assert!(shape
            .select
            .sql
            .contains("json_group_array(DISTINCT json_extract(data,'$.tag'))"));
    }

    #[test]
    fn test_first_and_last_read_the_group_array_ends() {
        let shape = group(json!({"_id": "$dept", "head": {"$first": "$name"}}));
        assert!(shape
            .select
            .sql
            .contains("json_extract(json_group_array(json_extract(data,'$.name')),'$[0]')"));
        let shape = group(json!({"_id": "$dept", "tail": {"$last": "$name"}}));
        assert!(shape.select.sql.contains(",'$[#-1]')"));
    }

    #[test]
    fn test_count_accumulator() {
        let shape = group(json!({"_id": null, "n": {"$count": {}}}));
        assert!(shape.select.sql.contains("'n', COUNT(*)"));
    }

    #[test]
    fn test_missing_id_rejected() {
        assert_eq!(group_err(json!({"n": {"$sum": 1}})).error_code(), "INVALID_STAGE");
    }

    #[test]
    fn test_unknown_accumulator_rejected() {
        assert_eq!(
            group_err(json!({"_id": null, "n": {"$median": "$x"}})).error_code(),
            "INVALID_EXPRESSION"
        );
    }
}
