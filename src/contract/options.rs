// SPDX-License-Identifier: MIT

//! Option schema declaration and resolution
//!
//! Configurable tasks and transformers declare the option keys they accept
//! through an [`OptionsSchema`]; the engine resolves the raw option map from
//! the process description against that schema once at bind time. Resolution
//! failures are fatal before the first execution.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::contract::error::OptionsError;

/// Supported option value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// Accepts any value, including null
    Any,
}

impl FieldType {
    /// Check whether a JSON value matches this type
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declaration of a single option key
#[derive(Debug, Clone)]
struct OptionSpec {
    field_type: FieldType,
    required: bool,
    default: Option<Value>,
    allowed: Option<Vec<Value>>,
}

/// Declares the option keys a task or transformer accepts.
///
/// An empty schema means the unit is not configurable: raw options pass
/// through untouched. A non-empty schema rejects undeclared keys.
#[derive(Debug, Clone, Default)]
pub struct OptionsSchema {
    specs: HashMap<String, OptionSpec>,
}

impl OptionsSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required option of the given type
    pub fn required(mut self, name: &str, field_type: FieldType) -> Self {
        self.specs.insert(
            name.to_string(),
            OptionSpec {
                field_type,
                required: true,
                default: None,
                allowed: None,
            },
        );
        self
    }

    /// Declare an optional option with a default value
    pub fn optional(mut self, name: &str, field_type: FieldType, default: Value) -> Self {
        self.specs.insert(
            name.to_string(),
            OptionSpec {
                field_type,
                required: false,
                default: Some(default),
                allowed: None,
            },
        );
        self
    }

    /// Restrict a previously declared option to a set of allowed values
    pub fn allow(mut self, name: &str, values: Vec<Value>) -> Self {
        if let Some(spec) = self.specs.get_mut(name) {
            spec.allowed = Some(values);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Resolve a raw option map against this schema.
    ///
    /// Fills in defaults, checks required keys, types and allowed values,
    /// and rejects undeclared keys unless the schema is empty.
    pub fn resolve(&self, raw: &HashMap<String, Value>) -> Result<ResolvedOptions, OptionsError> {
        if self.specs.is_empty() {
            return Ok(ResolvedOptions {
                values: raw.clone(),
            });
        }

        for key in raw.keys() {
            if !self.specs.contains_key(key) {
                return Err(OptionsError::UnknownOption(key.clone()));
            }
        }

        let mut values = HashMap::new();
        for (name, spec) in &self.specs {
            match raw.get(name) {
                Some(value) => {
                    if !spec.field_type.matches(value) {
                        return Err(OptionsError::InvalidType {
                            option: name.clone(),
                            expected: spec.field_type.to_string(),
                            actual: json_type_name(value).to_string(),
                        });
                    }
                    if let Some(allowed) = &spec.allowed {
                        if !allowed.contains(value) {
                            return Err(OptionsError::DisallowedValue {
                                option: name.clone(),
                                value: value.clone(),
                            });
                        }
                    }
                    values.insert(name.clone(), value.clone());
                }
                None => {
                    if let Some(default) = &spec.default {
                        values.insert(name.clone(), default.clone());
                    } else if spec.required {
                        return Err(OptionsError::MissingOption(name.clone()));
                    }
                }
            }
        }

        Ok(ResolvedOptions { values })
    }
}

/// Resolved option values, ready for a `configure` call
#[derive(Debug, Clone, Default)]
pub struct ResolvedOptions {
    values: HashMap<String, Value>,
}

impl ResolvedOptions {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
