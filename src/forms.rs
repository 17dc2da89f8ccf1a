//! Deposit forms resolved from configuration
//!
//! A [`FormRegistry`] is built once at startup and shared by reference; its
//! definitions are immutable and carry pre-compiled field patterns.

use crate::config::{FieldConfig, FormConfig};
use crate::error::{Result, WorkflowError};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One resolved form field
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub label: String,
    pub required: bool,
    pub pattern: Option<Regex>,
    pub default: Option<Value>,
    pub multiple: bool,
    pub help: Option<String>,
}

impl FieldDefinition {
    fn from_config(config: &FieldConfig) -> std::result::Result<Self, String> {
        let pattern = config
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| format!("field '{}' has invalid pattern: {}", config.name, e))?;

        Ok(Self {
            name: config.name.clone(),
            label: config.label.clone().unwrap_or_else(|| config.name.clone()),
            required: config.required,
            pattern,
            default: config.default.clone(),
            multiple: config.multiple,
            help: config.help.clone(),
        })
    }

    fn check(&self, value: Option<&Value>, errors: &mut Vec<String>) {
        let value = match value {
            Some(v) if !is_blank(v) => v,
            _ => {
                if self.required {
                    errors.push(format!("{} is required", self.label));
                }
                return;
            }
        };

        let items: Vec<&Value> = match value {
            Value::Array(items) if self.multiple => items.iter().collect(),
            Value::Array(_) => {
                errors.push(format!("{} accepts a single value", self.label));
                return;
            }
            other => vec![other],
        };

        let Some(ref pattern) = self.pattern else {
            return;
        };
        for item in items {
            let text = match item {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    errors.push(format!("{} must be text", self.label));
                    continue;
                }
            };
            if !pattern.is_match(&text) {
                errors.push(match self.help {
                    Some(ref help) => format!("{} has invalid value '{}': {}", self.label, text, help),
                    None => format!("{} has invalid value '{}'", self.label, text),
                });
            }
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// An immutable deposit form
#[derive(Debug, Clone)]
pub struct FormDefinition {
    pub name: String,
    pub title: String,
    pub fields: Vec<FieldDefinition>,
}

impl FormDefinition {
    pub fn from_config(name: &str, config: &FormConfig) -> Result<Self> {
        let mut fields = Vec::new();
        let mut errors = Vec::new();
        for field in &config.fields {
            match FieldDefinition::from_config(field) {
                Ok(field) => fields.push(field),
                Err(e) => errors.push(format!("form '{}': {}", name, e)),
            }
        }
        if !errors.is_empty() {
            return Err(WorkflowError::Validation { errors });
        }

        Ok(Self {
            name: name.to_string(),
            title: config.title.clone().unwrap_or_else(|| name.to_string()),
            fields,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Values a fresh draft of this form starts with
    pub fn initial_values(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter_map(|f| f.default.clone().map(|v| (f.name.clone(), v)))
            .collect()
    }

    /// Check one field's value before it is stored in a draft
    pub fn check_field(&self, name: &str, value: &Value) -> Result<()> {
        let field = self.field(name).ok_or_else(|| {
            WorkflowError::validation(format!("form '{}' has no field '{}'", self.name, name))
        })?;

        let mut errors = Vec::new();
        field.check(Some(value), &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::Validation { errors })
        }
    }

    /// Check submitted values; every problem is reported at once
    pub fn validate(&self, values: &Map<String, Value>) -> Result<()> {
        let mut errors = Vec::new();
        for field in &self.fields {
            field.check(values.get(&field.name), &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::Validation { errors })
        }
    }
}

/// Forms by name
#[derive(Debug, Clone, Default)]
pub struct FormRegistry {
    forms: HashMap<String, FormDefinition>,
}

impl FormRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(forms: &HashMap<String, FormConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (name, config) in forms {
            registry.register(FormDefinition::from_config(name, config)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, form: FormDefinition) {
        self.forms.insert(form.name.clone(), form);
    }

    pub fn get(&self, name: &str) -> Option<&FormDefinition> {
        self.forms.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.forms.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}
