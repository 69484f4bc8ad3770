//! Projections compiled to `json_object` constructors.
//!
//! Inclusion mode rebuilds the document from the listed fields (nested
//! paths become nested constructors); exclusion mode is a single
//! `json_remove`. The two may not be mixed, except `_id` may always be
//! excluded. Computed fields compile through the expression sub-language.

use indexmap::IndexMap;

use crate::document::{Document, Number};
use crate::error::{Result, TranslateError};
use crate::path::{parse_path, Segment};
use crate::sql::{SqlValue, Translation};

use super::expression;

/// Compile a projection document into an expression producing the
/// projected document. Used by the `$project` stage and exposed for find
/// queries.
///
/// # Errors
///
/// Returns [`TranslateError::InvalidArgument`] for an empty or mixed-mode
/// projection, [`TranslateError::InvalidPath`] for unsafe field names.
pub fn translate_projection(projection: &Document) -> Result<Translation> {
    let mut params = Vec::new();
    let sql = compile_projection(projection, &mut params)?;
    Ok(Translation::new(sql, params))
}

pub(crate) fn compile_projection(
    projection: &Document,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    let object = projection.as_object().ok_or_else(|| {
        TranslateError::invalid_argument(format!(
            "projection must be an object, found {}",
            projection.kind()
        ))
    })?;
    if object.is_empty() {
        return Err(TranslateError::invalid_argument("projection has no fields"));
    }

    let mut excluded: Vec<String> = Vec::new();
    let mut included: Vec<(&str, Option<&Document>)> = Vec::new();
    let mut id_excluded = false;
    for (key, value) in object {
        match mode_of(value) {
            Mode::Exclude => {
                if key == "_id" {
                    id_excluded = true;
                } else {
                    excluded.push(key.clone());
                }
            }
            Mode::Include => included.push((key, None)),
            Mode::Computed => included.push((key, Some(value))),
        }
    }

    if included.is_empty() {
        // Pure exclusion mode.
        let mut paths: Vec<String> = Vec::with_capacity(excluded.len() + 1);
        if id_excluded {
            paths.push("'$._id'".to_string());
        }
        for key in &excluded {
            let path = parse_path(key)?;
            for segment in path.segments() {
                reject_positional(segment, key)?;
            }
            paths.push(format!("'{}'", path.to_json_path()));
        }
        return Ok(format!("json_remove(data, {})", paths.join(", ")));
    }
    if !excluded.is_empty() {
        return Err(TranslateError::invalid_argument(format!(
            "projection mixes inclusion and exclusion ('{}')",
            excluded[0]
        )));
    }

    // Inclusion mode: _id is carried unless excluded or explicitly listed.
    let mut tree = Tree::new();
    if !id_excluded && !object.contains_key("_id") {
        tree.insert(
            &[Segment::Field("_id".to_string())],
            "json_extract(data,'$._id')".to_string(),
        )?;
    }
    for (key, computed) in included {
        let path = parse_path(key)?;
        for segment in path.segments() {
            reject_positional(segment, key)?;
        }
        let expr = match computed {
            Some(value) => expression::compile_into(value, "data", params)?,
            None => format!("json_extract(data,'{}')", path.to_json_path()),
        };
        tree.insert(path.segments(), expr)?;
    }
    Ok(tree.render())
}

enum Mode {
    Include,
    Exclude,
    Computed,
}

fn mode_of(value: &Document) -> Mode {
    match value {
        Document::Bool(false) | Document::Number(Number::Int(0)) => Mode::Exclude,
        Document::Bool(true) | Document::Number(Number::Int(1)) => Mode::Include,
        Document::Number(Number::Double(d)) if *d == 0.0 => Mode::Exclude,
        Document::Number(Number::Double(d)) if *d == 1.0 => Mode::Include,
        _ => Mode::Computed,
    }
}

fn reject_positional(segment: &Segment, key: &str) -> Result<()> {
    if segment.is_positional() {
        return Err(TranslateError::invalid_path(format!(
            "positional token not allowed in projection path '{key}'"
        )));
    }
    Ok(())
}

/// Nested inclusion paths group by their leading segments, so `a.b` and
/// `a.c` share one constructor for `a`.
enum Node {
    Leaf(String),
    Branch(Tree),
}

struct Tree {
    entries: IndexMap<String, Node>,
}

impl Tree {
    fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    fn insert(&mut self, segments: &[Segment], expr: String) -> Result<()> {
        let head = segments[0].to_string();
        if segments.len() == 1 {
            if self.entries.contains_key(&head) {
                return Err(TranslateError::invalid_argument(format!(
                    "projection lists '{head}' twice"
                )));
            }
            self.entries.insert(head, Node::Leaf(expr));
            return Ok(());
        }
        let node = self
            .entries
            .entry(head.clone())
            .or_insert_with(|| Node::Branch(Self::new()));
        match node {
            Node::Branch(tree) => tree.insert(&segments[1..], expr),
            Node::Leaf(_) => Err(TranslateError::invalid_argument(format!(
                "projection path collides at '{head}'"
            ))),
        }
    }

    fn render(&self) -> String {
        let pairs: Vec<String> = self
            .entries
            .iter()
            .map(|(key, node)| match node {
                Node::Leaf(expr) => format!("'{key}', {expr}"),
                Node::Branch(tree) => format!("'{key}', {}", tree.render()),
            })
            .collect();
        format!("json_object({})", pairs.join(", "))
    }
}

// ============================================================================
// Tests
// ============================================================================
