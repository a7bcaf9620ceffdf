//! Field-mapping tables between configuration attributes and wire payloads.
//!
//! Each resource kind declares one table. The same table drives both
//! directions: `build_request` turns a desired configuration into a request
//! body, `observe` turns a remote record back into attributes.

use crate::shared::record::{display_path, set_path, type_name, RecordExt};
use serde_json::{json, Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    String,
    Bool,
    Int,
}

impl Scalar {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            Scalar::String => value.is_string(),
            Scalar::Bool => value.is_boolean(),
            Scalar::Int => value.is_i64(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Scalar::String => "string",
            Scalar::Bool => "bool",
            Scalar::Int => "integer",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    /// Copy unchanged
    Direct(Scalar),
    /// JSON array of strings, order preserved
    StringList,
    /// `"true"`/`"false"` in configuration, a bool on the wire
    BoolString,
    /// Optional `{enabled}` object in configuration, a bare bool on the wire
    Toggle { default: bool },
    /// Optional `{enabled}` object in configuration, rendered as a single
    /// violation entry whose `alarm` and `block` flags carry the toggle
    Violation { name: &'static str, default: bool },
    /// Array of objects rebuilt element by element keeping only `keys`
    ObjectList { keys: &'static [&'static str] },
    /// Fixed wire value with no configuration counterpart
    Constant(Value),
}

/// How a field is refreshed from a remote record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadBack {
    Yes,
    /// The API never echoes the value; keep what was last known
    KeepPrior,
    /// Request-only field, another mapping owns the attribute
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldMapping {
    pub attr: &'static [&'static str],
    pub wire: &'static [&'static str],
    pub coercion: Coercion,
    pub read_back: ReadBack,
    /// Included in request bodies
    pub send: bool,
    /// Must be present in every successful response
    pub required_in_response: bool,
}

impl FieldMapping {
    pub fn new(attr: &'static [&'static str], wire: &'static [&'static str], coercion: Coercion) -> Self {
        Self {
            attr,
            wire,
            coercion,
            read_back: ReadBack::Yes,
            send: true,
            required_in_response: false,
        }
    }

    /// Same path on both sides
    pub fn same(path: &'static [&'static str], coercion: Coercion) -> Self {
        Self::new(path, path, coercion)
    }

    pub fn constant(wire: &'static [&'static str], value: Value) -> Self {
        Self {
            read_back: ReadBack::Skip,
            ..Self::new(&[], wire, Coercion::Constant(value))
        }
    }

    pub fn read_back(mut self, read_back: ReadBack) -> Self {
        self.read_back = read_back;
        self
    }

    /// Tracked in state only: never sent, never echoed back
    pub fn local_only(mut self) -> Self {
        self.send = false;
        self.read_back = ReadBack::KeepPrior;
        self
    }

    pub fn required_in_response(mut self) -> Self {
        self.required_in_response = true;
        self
    }
}

/// An otherwise successful response did not have the expected shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    pub path: String,
    pub reason: String,
}

impl MalformedRecord {
    fn wrong_type(path: &[&str], expected: &str, found: &Value) -> Self {
        Self {
            path: display_path(path),
            reason: format!("expected {}, found {}", expected, type_name(found)),
        }
    }

    pub fn missing(path: &[&str]) -> Self {
        Self {
            path: display_path(path),
            reason: "field is missing".to_string(),
        }
    }
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

fn toggle_value(desired: &Map<String, Value>, attr: &[&str], default: bool) -> bool {
    desired
        .at(attr)
        .and_then(|obj| obj.bool_at(&["enabled"]))
        .unwrap_or(default)
}

/// Render the request body for `desired`. Optional attributes that are
/// absent from the configuration are left out of the body.
pub fn build_request(mappings: &[FieldMapping], desired: &Map<String, Value>) -> Map<String, Value> {
    let mut body = Map::new();
    for mapping in mappings.iter().filter(|m| m.send) {
        let value = match &mapping.coercion {
            Coercion::Direct(_) | Coercion::StringList | Coercion::ObjectList { .. } => {
                desired.at(mapping.attr).cloned()
            }
            Coercion::BoolString => desired
                .str_at(mapping.attr)
                .map(|s| Value::Bool(s.eq_ignore_ascii_case("true"))),
            Coercion::Toggle { default } => {
                Some(Value::Bool(toggle_value(desired, mapping.attr, *default)))
            }
            Coercion::Violation { name, default } => {
                let enabled = toggle_value(desired, mapping.attr, *default);
                Some(json!([{ "name": name, "alarm": enabled, "block": enabled }]))
            }
            Coercion::Constant(value) => Some(value.clone()),
        };
        if let Some(value) = value {
            set_path(&mut body, mapping.wire, value);
        }
    }
    body
}

/// Rebuild attributes from `record`.
///
/// Absent optional fields leave the attribute unset. A field that is
/// present with the wrong shape fails the whole read, as does a missing
/// field marked `required_in_response`.
pub fn observe(
    mappings: &[FieldMapping],
    record: &Value,
    prior: Option<&Map<String, Value>>,
) -> Result<Map<String, Value>, MalformedRecord> {
    let mut attributes = Map::new();
    for mapping in mappings {
        match mapping.read_back {
            ReadBack::Skip => continue,
            ReadBack::KeepPrior => {
                if let Some(value) = prior.and_then(|p| p.at(mapping.attr)) {
                    set_path(&mut attributes, mapping.attr, value.clone());
                }
                continue;
            }
            ReadBack::Yes => {}
        }

        let Some(raw) = record.at(mapping.wire) else {
            if mapping.required_in_response {
                return Err(MalformedRecord::missing(mapping.wire));
            }
            continue;
        };

        if let Some(value) = read_field(mapping, raw)? {
            set_path(&mut attributes, mapping.attr, value);
        }
    }
    Ok(attributes)
}

fn read_field(mapping: &FieldMapping, raw: &Value) -> Result<Option<Value>, MalformedRecord> {
    let wire = mapping.wire;
    match &mapping.coercion {
        Coercion::Direct(scalar) => {
            if scalar.accepts(raw) {
                Ok(Some(raw.clone()))
            } else {
                Err(MalformedRecord::wrong_type(wire, scalar.label(), raw))
            }
        }
        Coercion::StringList => {
            let items = raw
                .as_array()
                .ok_or_else(|| MalformedRecord::wrong_type(wire, "array", raw))?;
            let strings = items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(|s| Value::String(s.to_string()))
                        .ok_or_else(|| MalformedRecord::wrong_type(wire, "array of strings", item))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(Value::Array(strings)))
        }
        Coercion::BoolString => match raw {
            Value::Bool(b) => Ok(Some(Value::String(b.to_string()))),
            _ => Err(MalformedRecord::wrong_type(wire, "bool", raw)),
        },
        Coercion::Toggle { .. } => match raw {
            Value::Bool(b) => Ok(Some(json!({ "enabled": b }))),
            _ => Err(MalformedRecord::wrong_type(wire, "bool", raw)),
        },
        Coercion::Violation { name, .. } => {
            let entries = raw
                .as_array()
                .ok_or_else(|| MalformedRecord::wrong_type(wire, "array", raw))?;
            let block = entries
                .iter()
                .find(|entry| entry.str_at(&["name"]) == Some(*name))
                .and_then(|entry| entry.bool_at(&["block"]));
            Ok(block.map(|b| json!({ "enabled": b })))
        }
        Coercion::ObjectList { keys } => {
            let items = raw
                .as_array()
                .ok_or_else(|| MalformedRecord::wrong_type(wire, "array", raw))?;
            let mut rebuilt = Vec::with_capacity(items.len());
            for item in items {
                let object = item
                    .as_object()
                    .ok_or_else(|| MalformedRecord::wrong_type(wire, "array of objects", item))?;
                let mut element = Map::new();
                for key in keys.iter() {
                    if let Some(value) = object.get(*key).filter(|v| !v.is_null()) {
                        element.insert(key.to_string(), value.clone());
                    }
                }
                rebuilt.push(Value::Object(element));
            }
            Ok(Some(Value::Array(rebuilt)))
        }
        Coercion::Constant(_) => Ok(None),
    }
}
