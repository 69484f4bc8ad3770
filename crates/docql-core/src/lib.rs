//! # DocQL Core
//!
//! Query, update and aggregation translators for DocQL - a document
//! database engine that stores JSON documents in a relational store with a
//! JSON function library. This crate is the compiler half of that system:
//! it accepts parsed document-language inputs and emits parameterised SQL
//! fragments over a JSON column named `data`. It opens no connections,
//! executes nothing and holds no state between calls.
//!
//! ## Components
//!
//! - **Path & Safety** ([`path`], [`sql`]): field-path parsing, safe-name
//!   validation, literal encoding. Everything inlined into SQL text is
//!   verified; everything else flows through positional parameters.
//! - **Query** ([`query`]): filter documents to boolean predicates.
//! - **Update** ([`update`]): update documents to JSON-mutation
//!   expressions, with conflict detection and positional-operator planning.
//! - **Aggregation** ([`aggregation`]): stage pipelines to composed
//!   statements built from sub-selects.
//!
//! ## Translation Flow
//!
//! ```text
//! Document tree (filter | update | pipeline)
//!         ↓
//!    Translator
//!    ↙    ↓    ↘
//! Parse Validate Emit
//!         ↓
//! Translation { sql, params }
//!         ↓
//!    Host store (json_extract, json_set, json_each, ...)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use docql_core::{Document, QueryTranslator};
//! use serde_json::json;
//!
//! let filter = Document::from_json(&json!({"age": {"$gt": 18}}))?;
//! let t = QueryTranslator::translate_query(&filter)?;
//! assert_eq!(t.sql, "json_extract(data,'$.age') > ?");
//! assert_eq!(t.params.len(), 1);
//! # Ok::<(), docql_core::TranslateError>(())
//! ```
//!
//! Translators are pure functions of their inputs: no I/O, no locks, no
//! global caches. Invocations may run on any number of threads with no
//! coordination, and identical inputs yield byte-identical outputs.

pub mod aggregation;
pub mod document;
pub mod error;
pub mod path;
pub mod query;
pub mod sql;
pub mod update;

pub use aggregation::{translate_projection, translate_sort, PipelineTranslator};
pub use document::{Document, Number, Object};
pub use error::{Result, TranslateError};
pub use path::{parse_path, validate_name, FieldPath, Segment};
pub use query::QueryTranslator;
pub use sql::{encode_literal, SqlValue, Translation};
pub use update::{ArrayFilter, PositionalContext, UpdateTranslator};
