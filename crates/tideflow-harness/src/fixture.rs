#![forbid(unsafe_code)]

//! Scenario fixtures built from JSON.

use serde_json::Value as Json;
use tideflow_core::{List, Record, Scope, Value};

/// A plain (not yet attached) record from a JSON object. Non-object JSON
/// yields an empty record.
#[must_use]
pub fn record(json: Json) -> Record {
    match Value::from_json(json) {
        Value::Record(record) => record,
        _ => Record::new(),
    }
}

/// A plain list from a JSON array. Non-array JSON yields an empty list.
#[must_use]
pub fn list(json: Json) -> List {
    match Value::from_json(json) {
        Value::List(list) => list,
        _ => List::new(),
    }
}

/// A scope whose data is the given JSON object.
#[must_use]
pub fn scope(label: &str, data: Json) -> Scope {
    Scope::new(label, record(data))
}

/// Integer read of a scope key, `0` when missing or not numeric.
#[must_use]
pub fn int(scope: &Scope, key: &str) -> i64 {
    scope.get(key).as_i64().unwrap_or(0)
}
