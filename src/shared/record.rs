//! Safe traversal over dynamically shaped JSON records.
//!
//! Remote records carry no schema guarantees: any intermediate object may be
//! missing, null, or of an unexpected type. Every accessor here walks the
//! path one segment at a time and yields `None` as soon as a step fails,
//! leaving it to the caller to decide whether absence is tolerable.

use serde_json::{Map, Value};

/// Raw JSON object returned by the Central Manager API
pub type RemoteRecord = Value;

pub trait RecordExt {
    /// Follow `path` through nested objects
    fn at(&self, path: &[&str]) -> Option<&Value>;

    fn str_at(&self, path: &[&str]) -> Option<&str> {
        self.at(path).and_then(Value::as_str)
    }

    fn bool_at(&self, path: &[&str]) -> Option<bool> {
        self.at(path).and_then(Value::as_bool)
    }

    fn i64_at(&self, path: &[&str]) -> Option<i64> {
        self.at(path).and_then(Value::as_i64)
    }

    fn array_at(&self, path: &[&str]) -> Option<&Vec<Value>> {
        self.at(path).and_then(Value::as_array)
    }

    fn object_at(&self, path: &[&str]) -> Option<&Map<String, Value>> {
        self.at(path).and_then(Value::as_object)
    }
}

impl RecordExt for Value {
    fn at(&self, path: &[&str]) -> Option<&Value> {
        let mut current = self;
        for segment in path {
            current = current.as_object()?.get(*segment)?;
        }
        // explicit nulls are treated as absent
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }
}

impl RecordExt for Map<String, Value> {
    fn at(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        self.get(*first)?.at(rest)
    }
}

/// Write `value` at `path`, creating intermediate objects as needed.
/// A non-object value sitting on the path is replaced.
pub fn set_path(target: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = target;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(map) = entry else {
            return;
        };
        current = map;
    }
    current.insert(last.to_string(), value);
}

/// Dotted form of a path, used in error messages
pub fn display_path(path: &[&str]) -> String {
    path.join(".")
}

/// Short JSON type name for diagnostics
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
