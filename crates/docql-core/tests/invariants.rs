//! Property tests for the quantified translator invariants.

use docql_core::{Document, QueryTranslator, UpdateTranslator};
use proptest::prelude::*;
use serde_json::{json, Value};

/// A safe field name.
fn field_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,6}"
}

/// A scalar the query language accepts.
fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,12}".prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ]
}

/// One field clause: implicit equality or a small operator object.
fn clause() -> impl Strategy<Value = Value> {
    prop_oneof![
        scalar(),
        scalar().prop_map(|v| json!({ "$gt": v })),
        prop::collection::vec(scalar(), 0..4).prop_map(|vs| json!({ "$in": vs })),
        any::<bool>().prop_map(|b| json!({ "$exists": b })),
        scalar().prop_map(|v| json!({ "$ne": v })),
    ]
}

fn filter() -> impl Strategy<Value = Value> {
    prop::collection::vec((field_name(), clause()), 0..5).prop_map(|fields| {
        let mut map = serde_json::Map::new();
        for (name, value) in fields {
            map.insert(name, value);
        }
        Value::Object(map)
    })
}

proptest! {
    /// Invariant: `?` placeholders and parameters agree in count for every
    /// valid filter.
    #[test]
    fn query_placeholders_match_params(filter in filter()) {
        let doc = Document::from_json(&filter).expect("valid document");
        let t = QueryTranslator::translate_query(&doc).expect("translates");
        prop_assert_eq!(t.placeholder_count(), t.params.len());
    }

    /// Invariant: translation is a pure function of its input.
    #[test]
    fn query_translation_is_deterministic(filter in filter()) {
        let doc = Document::from_json(&filter).expect("valid document");
        let first = QueryTranslator::translate_query(&doc).expect("translates");
        let second = QueryTranslator::translate_query(&doc).expect("translates");
        prop_assert_eq!(first, second);
    }

    /// Invariant: conflicting updates reject regardless of key order.
    #[test]
    fn update_conflicts_ignore_key_order(path in field_name(), n in any::<i64>()) {
        let forward = json!({ "$set": { path.clone(): n }, "$unset": { path.clone(): "" } });
        let reversed = json!({ "$unset": { path.clone(): "" }, "$set": { path.clone(): n } });
        for update in [forward, reversed] {
            let doc = Document::from_json(&update).expect("valid document");
            let err = UpdateTranslator::translate_update(&doc).expect_err("conflicts");
            prop_assert_eq!(err.error_code(), "CONFLICTING_UPDATE");
        }
    }

    /// Invariant: update placeholder accounting holds across operators.
    #[test]
    fn update_placeholders_match_params(
        path in field_name(),
        n in any::<i64>(),
        values in prop::collection::vec(scalar(), 0..4),
    ) {
        // The push path is longer than field_name() can generate, so the
        // two operators never collide.
        let update = json!({
            "$inc": { path.clone(): n },
            "$push": { "activity_log": { "$each": values } },
        });
        let doc = Document::from_json(&update).expect("valid document");
        let t = UpdateTranslator::translate_update(&doc).expect("translates");
        prop_assert_eq!(t.placeholder_count(), t.params.len());
    }
}

#[test]
fn empty_inputs_translate_to_identities() {
    let empty = Document::from_json(&json!({})).expect("valid document");
    let q = QueryTranslator::translate_query(&empty).expect("translates");
    assert_eq!((q.sql.as_str(), q.params.len()), ("1=1", 0));
    let u = UpdateTranslator::translate_update(&empty).expect("translates");
    assert_eq!((u.sql.as_str(), u.params.len()), ("data", 0));
}
