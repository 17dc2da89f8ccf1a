//! Form and exporter configuration

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One field of a deposit form
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FieldConfig {
    /// Key the value is stored under in the draft
    pub name: String,

    /// Label shown to depositors
    pub label: Option<String>,

    /// Reject submissions that leave this field empty
    #[serde(default)]
    pub required: bool,

    /// Regex every submitted value must match
    pub pattern: Option<String>,

    /// Initial value when no prefill exists
    pub default: Option<Value>,

    /// Field accepts a list of values
    #[serde(default)]
    pub multiple: bool,

    /// Help text
    pub help: Option<String>,
}

impl FieldConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            required: false,
            pattern: None,
            default: None,
            multiple: false,
            help: None,
        }
    }
}

/// A deposit form
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FormConfig {
    pub title: Option<String>,

    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

impl FormConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for field in &self.fields {
            if field.name.is_empty() {
                errors.push("field with empty name".to_string());
            }
            if !seen.insert(field.name.as_str()) {
                errors.push(format!("duplicate field '{}'", field.name));
            }
            if let Some(ref pattern) = field.pattern {
                if let Err(e) = regex::Regex::new(pattern) {
                    errors.push(format!("field '{}' has invalid pattern: {}", field.name, e));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// A template-driven metadata exporter
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExporterConfig {
    /// minijinja template rendered with `record`, `recid` and `collection`
    pub template: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_config_parse() {
        let toml = r#"
            title = "Article"

            [[fields]]
            name = "title"
            required = true

            [[fields]]
            name = "doi"
            pattern = '^10\.\d{4,}/\S+$'

            [[fields]]
            name = "keywords"
            multiple = true
            default = ["physics"]
        "#;
        let form: FormConfig = toml::from_str(toml).unwrap();
        assert_eq!(form.fields.len(), 3);
        assert!(form.fields[0].required);
        assert!(form.fields[2].multiple);
        assert_eq!(form.fields[2].default, Some(serde_json::json!(["physics"])));
        assert!(form.validate().is_ok());
    }

    #[test]
    fn test_form_config_validation() {
        let mut bad_pattern = FieldConfig::new("doi");
        bad_pattern.pattern = Some("(".into());

        let form = FormConfig {
            title: None,
            fields: vec![FieldConfig::new("title"), FieldConfig::new("title"), bad_pattern],
        };
        let errors = form.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("duplicate"));
        assert!(errors[1].contains("invalid pattern"));
    }
}
