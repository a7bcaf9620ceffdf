//! Declarative attribute schemas and the validation run before any
//! remote call is made.

use crate::shared::record::type_name;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::fmt;

/// Names of policies, imports and other Central Manager objects
pub static OBJECT_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-a-zA-Z0-9._/:]+$").expect("Invalid object name regex"));

/// Report names additionally allow whitespace
pub static REPORT_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-a-zA-Z0-9._/:\s]+$").expect("Invalid report name regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
    /// Assigned by the server; never supplied by the caller
    Computed,
}

#[derive(Debug, Clone)]
pub enum AttrType {
    String,
    Bool,
    Int,
    StringList,
    Object(Vec<Attribute>),
    ObjectList(Vec<Attribute>),
}

impl AttrType {
    fn label(&self) -> &'static str {
        match self {
            AttrType::String => "string",
            AttrType::Bool => "bool",
            AttrType::Int => "number",
            AttrType::StringList => "list(string)",
            AttrType::Object(_) => "object",
            AttrType::ObjectList(_) => "list(object)",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Validator {
    Pattern(&'static Lazy<Regex>),
    OneOf(&'static [&'static str]),
    MaxLength(usize),
    MinInt(i64),
}

impl Validator {
    fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (Validator::Pattern(regex), Value::String(s)) => {
                if regex.is_match(s) {
                    Ok(())
                } else {
                    Err(format!("value '{}' must match {}", s, regex.as_str()))
                }
            }
            (Validator::OneOf(allowed), Value::String(s)) => {
                if allowed.contains(&s.as_str()) {
                    Ok(())
                } else {
                    Err(format!(
                        "value '{}' must be one of: {}",
                        s,
                        allowed.join(", ")
                    ))
                }
            }
            (Validator::MaxLength(max), Value::String(s)) => {
                if s.chars().count() <= *max {
                    Ok(())
                } else {
                    Err(format!("must be at most {} characters long", max))
                }
            }
            (Validator::MinInt(min), Value::Number(n)) => match n.as_i64() {
                Some(v) if v >= *min => Ok(()),
                _ => Err(format!("must be an integer of at least {}", min)),
            },
            _ => Ok(()),
        }
    }

    fn describe(&self) -> Value {
        match self {
            Validator::Pattern(regex) => json!({"pattern": regex.as_str()}),
            Validator::OneOf(allowed) => json!({"one_of": allowed}),
            Validator::MaxLength(max) => json!({"max_length": max}),
            Validator::MinInt(min) => json!({"min": min}),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: &'static str,
    pub ty: AttrType,
    pub presence: Presence,
    pub sensitive: bool,
    /// Changing the value requires destroying and recreating the resource
    pub force_new: bool,
    pub default: Option<Value>,
    pub validators: Vec<Validator>,
    pub description: &'static str,
}

impl Attribute {
    fn new(name: &'static str, ty: AttrType, presence: Presence) -> Self {
        Self {
            name,
            ty,
            presence,
            sensitive: false,
            force_new: false,
            default: None,
            validators: Vec::new(),
            description: "",
        }
    }

    pub fn required(name: &'static str, ty: AttrType) -> Self {
        Self::new(name, ty, Presence::Required)
    }

    pub fn optional(name: &'static str, ty: AttrType) -> Self {
        Self::new(name, ty, Presence::Optional)
    }

    pub fn computed(name: &'static str, ty: AttrType) -> Self {
        Self::new(name, ty, Presence::Computed)
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub attribute: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.attribute, self.message)
    }
}

fn child_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Check `attributes` against `schema`, collecting every violation
pub fn validate(schema: &[Attribute], attributes: &Map<String, Value>) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    validate_object(schema, attributes, "", &mut errors);
    errors
}

fn validate_object(
    schema: &[Attribute],
    attributes: &Map<String, Value>,
    prefix: &str,
    errors: &mut Vec<ValidationError>,
) {
    for key in attributes.keys() {
        if !schema.iter().any(|a| a.name == key.as_str()) {
            errors.push(ValidationError {
                attribute: child_path(prefix, key),
                message: "unsupported attribute".to_string(),
            });
        }
    }

    for attr in schema {
        let path = child_path(prefix, attr.name);
        let value = attributes.get(attr.name).filter(|v| !v.is_null());

        match (attr.presence, value) {
            (Presence::Computed, Some(_)) => errors.push(ValidationError {
                attribute: path,
                message: "computed attribute cannot be set in configuration".to_string(),
            }),
            (Presence::Required, None) => errors.push(ValidationError {
                attribute: path,
                message: "attribute is required".to_string(),
            }),
            (Presence::Required, Some(Value::String(s))) if s.is_empty() => {
                errors.push(ValidationError {
                    attribute: path,
                    message: "must not be empty".to_string(),
                })
            }
            (_, Some(value)) => validate_value(attr, value, &path, errors),
            (_, None) => {}
        }
    }
}

fn validate_value(attr: &Attribute, value: &Value, path: &str, errors: &mut Vec<ValidationError>) {
    let mismatch = |errors: &mut Vec<ValidationError>| {
        errors.push(ValidationError {
            attribute: path.to_string(),
            message: format!("expected {}, got {}", attr.ty.label(), type_name(value)),
        })
    };

    let run_validators = |value: &Value, path: &str, errors: &mut Vec<ValidationError>| {
        for validator in &attr.validators {
            if let Err(message) = validator.check(value) {
                errors.push(ValidationError {
                    attribute: path.to_string(),
                    message,
                });
            }
        }
    };

    match (&attr.ty, value) {
        (AttrType::String, Value::String(_)) | (AttrType::Bool, Value::Bool(_)) => {
            run_validators(value, path, errors)
        }
        (AttrType::Int, Value::Number(n)) if n.is_i64() => run_validators(value, path, errors),
        (AttrType::StringList, Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}[{}]", path, i);
                if item.is_string() {
                    run_validators(item, &item_path, errors);
                } else {
                    errors.push(ValidationError {
                        attribute: item_path,
                        message: format!("expected string, got {}", type_name(item)),
                    });
                }
            }
        }
        (AttrType::Object(nested), Value::Object(map)) => {
            validate_object(nested, map, path, errors)
        }
        (AttrType::ObjectList(nested), Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}[{}]", path, i);
                match item.as_object() {
                    Some(map) => validate_object(nested, map, &item_path, errors),
                    None => errors.push(ValidationError {
                        attribute: item_path,
                        message: format!("expected object, got {}", type_name(item)),
                    }),
                }
            }
        }
        _ => mismatch(errors),
    }
}

/// Fill absent optional attributes with their defaults, recursing into
/// nested objects that are present
pub fn apply_defaults(schema: &[Attribute], attributes: &mut Map<String, Value>) {
    for attr in schema {
        let absent = attributes.get(attr.name).map_or(true, Value::is_null);
        if absent {
            if let (Presence::Optional, Some(default)) = (attr.presence, &attr.default) {
                attributes.insert(attr.name.to_string(), default.clone());
            }
            continue;
        }
        match (&attr.ty, attributes.get_mut(attr.name)) {
            (AttrType::Object(nested), Some(Value::Object(map))) => apply_defaults(nested, map),
            (AttrType::ObjectList(nested), Some(Value::Array(items))) => {
                for item in items.iter_mut() {
                    if let Value::Object(map) = item {
                        apply_defaults(nested, map);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Top-level force-new attributes whose configured value differs from `prior`
pub fn replacement_triggers(
    schema: &[Attribute],
    prior: &Map<String, Value>,
    desired: &Map<String, Value>,
) -> Vec<&'static str> {
    schema
        .iter()
        .filter(|attr| attr.force_new)
        .filter(|attr| {
            let before = prior.get(attr.name).filter(|v| !v.is_null());
            let after = desired.get(attr.name).filter(|v| !v.is_null());
            after.is_some() && before != after
        })
        .map(|attr| attr.name)
        .collect()
}

/// Machine readable description of a schema
pub fn describe(schema: &[Attribute]) -> Value {
    let mut out = Map::new();
    for attr in schema {
        let mut entry = Map::new();
        entry.insert("type".to_string(), json!(attr.ty.label()));
        entry.insert(
            "presence".to_string(),
            json!(match attr.presence {
                Presence::Required => "required",
                Presence::Optional => "optional",
                Presence::Computed => "computed",
            }),
        );
        if attr.force_new {
            entry.insert("force_new".to_string(), json!(true));
        }
        if attr.sensitive {
            entry.insert("sensitive".to_string(), json!(true));
        }
        if let Some(default) = &attr.default {
            entry.insert("default".to_string(), default.clone());
        }
        if !attr.description.is_empty() {
            entry.insert("description".to_string(), json!(attr.description));
        }
        if !attr.validators.is_empty() {
            entry.insert(
                "validators".to_string(),
                Value::Array(attr.validators.iter().map(Validator::describe).collect()),
            );
        }
        if let AttrType::Object(nested) | AttrType::ObjectList(nested) = &attr.ty {
            entry.insert("attributes".to_string(), describe(nested));
        }
        out.insert(attr.name.to_string(), Value::Object(entry));
    }
    Value::Object(out)
}
