//! Typed State Schema
//!
//! Field definitions for the structured state a bot or skill tracks across
//! turns, and the validate / merge / normalize cycle applied to it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// Structured state values keyed by field name
pub type StateMap = Map<String, Value>;

/// JSON type of a field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl FieldType {
    /// Whether a non-null value has this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Any => true,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        };
        f.write_str(name)
    }
}

/// Definition of one state field or callback parameter
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name
    pub name: String,

    /// JSON type
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Human-readable description (shown to the model)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Whether this field is required
    #[serde(default)]
    pub required: bool,

    /// Default value if not provided
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: String::new(),
            required: false,
            default: None,
            choices: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    /// Check a single value against this field's type and choices
    pub fn check(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            if self.required && self.default.is_none() {
                return Err(AgentError::Validation(format!(
                    "field '{}' is required and cannot be null",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.field_type.accepts(value) {
            return Err(AgentError::Validation(format!(
                "field '{}' expects {}, got {}",
                self.name, self.field_type, value
            )));
        }

        if let Some(choices) = &self.choices {
            if !choices.contains(value) {
                return Err(AgentError::Validation(format!(
                    "field '{}' must be one of {}, got {}",
                    self.name,
                    Value::Array(choices.clone()),
                    value
                )));
            }
        }

        Ok(())
    }
}

/// Ordered set of field definitions
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StateSchema {
    fields: Vec<FieldSpec>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any earlier definition with the same name
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.retain(|f| f.name != spec.name);
        self.fields.push(spec);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Values of every field that declares a default
    pub fn defaults(&self) -> StateMap {
        self.fields
            .iter()
            .filter_map(|f| f.default.clone().map(|d| (f.name.clone(), d)))
            .collect()
    }

    /// Reject unknown fields, type mismatches and values outside `choices`
    pub fn validate(&self, updates: &StateMap) -> Result<()> {
        for (name, value) in updates {
            let spec = self.get(name).ok_or_else(|| {
                AgentError::Validation(format!("unknown field '{}'", name))
            })?;
            spec.check(value)?;
        }
        Ok(())
    }

    /// Keep declared, non-null values; fill the rest from defaults.
    /// Fields with neither are left out rather than materialized as null.
    pub fn normalize(&self, values: &StateMap) -> StateMap {
        let mut normalized = StateMap::new();
        for field in &self.fields {
            match values.get(&field.name) {
                Some(value) if !value.is_null() => {
                    normalized.insert(field.name.clone(), value.clone());
                }
                _ => {
                    if let Some(default) = &field.default {
                        normalized.insert(field.name.clone(), default.clone());
                    }
                }
            }
        }
        normalized
    }

    /// Every declared field present, absent ones as `null`, so the prompt
    /// always shows a complete object
    pub fn render_state(&self, values: &StateMap) -> StateMap {
        self.fields
            .iter()
            .map(|f| {
                let value = values.get(&f.name).cloned().unwrap_or(Value::Null);
                (f.name.clone(), value)
            })
            .collect()
    }

    /// Field definitions as a JSON array for the prompt
    pub fn describe(&self) -> Value {
        serde_json::to_value(&self.fields).unwrap_or(Value::Null)
    }
}

/// A schema together with its current values
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateStore {
    schema: StateSchema,
    values: StateMap,
}

impl StateStore {
    /// Start from the schema's defaults
    pub fn new(schema: StateSchema) -> Self {
        let values = schema.normalize(&StateMap::new());
        Self { schema, values }
    }

    pub fn schema(&self) -> &StateSchema {
        &self.schema
    }

    pub fn values(&self) -> &StateMap {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Validate `updates` against the schema and the current values.
    ///
    /// A null for a declared field that is currently unset means "still
    /// unset" and is dropped, so echoing the rendered state back is
    /// accepted. A null that would clear a required field is still rejected.
    pub fn prepare(&self, updates: &StateMap) -> Result<StateMap> {
        let pending: StateMap = updates
            .iter()
            .filter(|(name, value)| {
                !(value.is_null()
                    && self.schema.get(name.as_str()).is_some()
                    && !self.values.contains_key(name.as_str()))
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        self.schema.validate(&pending)?;
        Ok(pending)
    }

    /// Validate, merge over the current values, normalize and commit.
    /// On error the current values are untouched.
    pub fn update(&mut self, updates: &StateMap) -> Result<()> {
        let pending = self.prepare(updates)?;

        let mut merged = self.values.clone();
        for (name, value) in &pending {
            merged.insert(name.clone(), value.clone());
        }

        self.values = self.schema.normalize(&merged);
        Ok(())
    }

    /// Replace all values, e.g. when restoring a snapshot
    pub fn replace(&mut self, values: &StateMap) -> Result<()> {
        self.schema.validate(values)?;
        self.values = self.schema.normalize(values);
        Ok(())
    }

    /// Complete object with nulls for unset fields
    pub fn rendered(&self) -> StateMap {
        self.schema.render_state(&self.values)
    }
}

/// Convert a JSON value into a state map, rejecting non-objects
pub fn as_state_map(value: Value) -> Result<StateMap> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AgentError::Parse(format!(
            "state payload must be a JSON object, got {}",
            other
        ))),
    }
}
