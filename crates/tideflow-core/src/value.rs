#![forbid(unsafe_code)]

//! Dynamic values flowing through the engine.
//!
//! [`Value`] is the engine's structured state: scalars, keyed records, ordered
//! lists, and scope handles. Records and lists are shared handles, so cloning
//! a `Value` never deep-copies; two clones of a record are the *same* record.
//!
//! # Equality
//!
//! [`Value::same`] (also `PartialEq`) is the comparison used by write
//! short-circuiting and change detection:
//!
//! - records, lists, and scopes compare by handle identity;
//! - scalars compare by value, with `Int` and `Float` compared numerically;
//! - `NaN` never equals itself, so writing `NaN` always notifies.

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use serde_json::Value as Json;

use crate::container::{Container, List, Record};
use crate::scope::Scope;

/// A dynamically-typed engine value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Record(Record),
    List(List),
    Scope(Scope),
}

/// Exact numeric equality: the float must be integral, inside `i64` range,
/// and convert to exactly `int`.
fn int_equals_float(int: i64, float: f64) -> bool {
    const BOUND: f64 = 9_223_372_036_854_775_808.0; // 2^63
    float.fract() == 0.0 && (-BOUND..BOUND).contains(&float) && float as i64 == int
}

impl Value {
    /// Identity-for-structures, equality-for-scalars comparison.
    #[must_use]
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => int_equals_float(*a, *b),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a.ptr_eq(b),
            (Self::List(a), Self::List(b)) => a.ptr_eq(b),
            (Self::Scope(a), Self::Scope(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Whether this is a record, list, or scope.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Record(_) | Self::List(_) | Self::Scope(_))
    }

    /// Whether this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The container already attached to this value, if any. Never attaches.
    #[must_use]
    pub fn container(&self) -> Option<Rc<Container>> {
        match self {
            Self::Record(record) => record.container(),
            Self::List(list) => list.container(),
            _ => None,
        }
    }

    /// Short type label for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Record(_) => "record",
            Self::List(_) => "list",
            Self::Scope(_) => "scope",
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view. Floats with no fractional part convert.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_scope(&self) -> Option<&Scope> {
        match self {
            Self::Scope(scope) => Some(scope),
            _ => None,
        }
    }

    /// Build plain (not yet reactive) structures from JSON.
    #[must_use]
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Self::Str(s.into()),
            Json::Array(items) => {
                Self::List(List::from_vec(items.into_iter().map(Self::from_json).collect()))
            }
            Json::Object(map) => Self::Record(Record::from_entries(
                map.into_iter().map(|(k, v)| (k, Self::from_json(v))),
            )),
        }
    }

    /// Untracked JSON snapshot. Cycles and scopes become `null`; non-finite
    /// floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> Json {
        let mut path = AHashSet::new();
        self.to_json_inner(&mut path)
    }

    fn to_json_inner(&self, path: &mut AHashSet<usize>) -> Json {
        match self {
            Self::Null | Self::Scope(_) => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Self::Str(s) => Json::String(s.to_string()),
            Self::Record(record) => {
                let addr = record.addr();
                if !path.insert(addr) {
                    return Json::Null;
                }
                let map = record
                    .entries_untracked()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json_inner(path)))
                    .collect();
                path.remove(&addr);
                Json::Object(map)
            }
            Self::List(list) => {
                let addr = list.addr();
                if !path.insert(addr) {
                    return Json::Null;
                }
                let items = list
                    .items_untracked()
                    .iter()
                    .map(|v| v.to_json_inner(path))
                    .collect();
                path.remove(&addr);
                Json::Array(items)
            }
        }
    }

    /// Ordering used by [`List::sort`]: null, then booleans, numbers
    /// (numerically), strings (lexicographically), then structures, which
    /// keep their relative order.
    #[must_use]
    pub fn sort_order(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::Str(_) => 3,
                Value::Record(_) | Value::List(_) | Value::Scope(_) => 4,
            }
        }
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => rank(self).cmp(&rank(other)),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Record(_) => write!(f, "Record({})", self.to_json()),
            Self::List(_) => write!(f, "List({})", self.to_json()),
            Self::Scope(scope) => write!(f, "Scope({})", scope.label()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s.into())
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Self::List(list)
    }
}

impl From<Scope> for Value {
    fn from(scope: Scope) -> Self {
        Self::Scope(scope)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        Self::from_json(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_equality() {
        assert!(Value::from(1).same(&Value::from(1)));
        assert!(Value::from(1).same(&Value::Float(1.0)));
        assert!(!Value::from(1).same(&Value::from("1")));
        assert!(Value::from("a").same(&Value::from("a")));
        assert!(Value::Null.same(&Value::Null));
        assert!(!Value::Null.same(&Value::Bool(false)));
    }

    #[test]
    fn nan_is_never_same() {
        let nan = Value::Float(f64::NAN);
        assert!(!nan.same(&nan));
    }

    #[test]
    fn int_float_equality_is_exact() {
        assert!(Value::from(3).same(&Value::Float(3.0)));
        assert!(Value::Float(-3.0).same(&Value::from(-3)));
        assert!(!Value::from(3).same(&Value::Float(3.5)));
        assert!(!Value::from(9_007_199_254_740_993_i64).same(&Value::Float(9_007_199_254_740_992.0)));
        assert!(Value::from(i64::MIN).same(&Value::Float(i64::MIN as f64)));
        assert!(!Value::from(i64::MAX).same(&Value::Float(i64::MAX as f64)));
        assert!(!Value::from(0).same(&Value::Float(f64::INFINITY)));
    }

    #[test]
    fn structures_compare_by_identity() {
        let a = Record::new();
        let b = Record::new();
        assert!(Value::from(a.clone()).same(&Value::from(a.clone())));
        assert!(!Value::from(a).same(&Value::from(b)));

        let l = List::new();
        assert_eq!(Value::from(l.clone()), Value::from(l));
        assert_ne!(Value::from(List::new()), Value::from(List::new()));
    }

    #[test]
    fn json_round_trip_shape() {
        let source = json!({"a": 1, "b": [true, "x", 2.5], "c": {"d": null}});
        let value = Value::from_json(source.clone());
        assert!(value.as_record().is_some());
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn cyclic_snapshot_terminates() {
        let record = Record::new();
        record.set("me", Value::from(record.clone()));
        let json = Value::from(record).to_json();
        assert_eq!(json, json!({"me": null}));
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::from(Some(3)), Value::Int(3));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::Float(4.0).as_i64(), Some(4));
        assert_eq!(Value::Float(4.5).as_i64(), None);
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(true).type_name(), "bool");
    }

    #[test]
    fn sort_order_ranks_types() {
        let mut values = vec![
            Value::from("b"),
            Value::from(2),
            Value::Null,
            Value::from(1.5),
            Value::from("a"),
            Value::from(false),
        ];
        values.sort_by(Value::sort_order);
        let json: Vec<_> = values.iter().map(Value::to_json).collect();
        assert_eq!(
            json,
            vec![json!(null), json!(false), json!(1.5), json!(2), json!("a"), json!("b")]
        );
    }
}
