//! Sort specifications compiled to `ORDER BY` fragments.

use crate::document::Document;
use crate::error::{Result, TranslateError};
use crate::path::parse_path;
use crate::sql::Translation;

/// Compile a sort specification (`{field: 1 | -1, ...}`) into an `ORDER BY`
/// list fragment, directions in document order. Used by the `$sort` stage
/// and exposed for find queries.
///
/// # Errors
///
/// Returns [`TranslateError::InvalidArgument`] for an empty specification
/// or a direction other than `1`/`-1`, [`TranslateError::InvalidPath`] for
/// unsafe field names.
pub fn translate_sort(sort: &Document) -> Result<Translation> {
    let object = sort.as_object().ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "sort must be an object, found {}",
            sort.kind()
        ))
    })?;
    if object.is_empty() {
        return Err(TranslateError::invalid_argument("sort has no fields"));
    }
    let mut parts = Vec::with_capacity(object.len());
    for (key, direction) in object {
        let path = parse_path(key)?;
        if path.has_positional() {
            return Err(TranslateError::invalid_path(format!(
                "positional token not allowed in sort path '{key}'"
            )));
        }
        let keyword = match direction.as_i64() {
            Some(1) => "ASC",
            Some(-1) => "DESC",
            _ => {
                return Err(TranslateError::invalid_argument(format!(
                    "sort direction on '{key}' must be 1 or -1"
                )))
            }
        };
        parts.push(format!(
            "json_extract(data,'{}') {keyword}",
            path.to_json_path()
        ));
    }
    Ok(Translation::fragment(parts.join(", ")))
}

// ============================================================================
// Tests
// ============================================================================
