//! Metadata export
//!
//! An export unit merges every draft of an instance into one record and
//! hands it to a [`MetadataExporter`] selected by format name. Exporters
//! are resolved once into an [`ExporterRegistry`]; `json` is always
//! available.

mod json;
mod template;

pub use json::JsonExporter;
pub use template::TemplateExporter;

use crate::config::ExporterConfig;
use crate::error::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything an exporter sees about the record it serializes
#[derive(Debug, Clone, Serialize)]
pub struct ExportContext<'a> {
    pub record: &'a Map<String, Value>,
    pub recid: i64,
    pub collection: &'a str,
}

/// Serializes a merged record into an exchange format
pub trait MetadataExporter: Send + Sync {
    /// Format name tasks refer to
    fn format(&self) -> &str;

    fn export(&self, ctx: &ExportContext<'_>) -> Result<String>;
}

/// Exporters by format name
#[derive(Clone)]
pub struct ExporterRegistry {
    exporters: HashMap<String, Arc<dyn MetadataExporter>>,
}

impl Default for ExporterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            exporters: HashMap::new(),
        };
        registry.register(Arc::new(JsonExporter));
        registry
    }
}

impl ExporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in `json` plus one template exporter per configured format
    pub fn from_config(exporters: &HashMap<String, ExporterConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (format, config) in exporters {
            registry.register(Arc::new(TemplateExporter::new(format, &config.template)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, exporter: Arc<dyn MetadataExporter>) {
        self.exporters
            .insert(exporter.format().to_string(), exporter);
    }

    pub fn get(&self, format: &str) -> Option<Arc<dyn MetadataExporter>> {
        self.exporters.get(format).cloned()
    }

    pub fn formats(&self) -> Vec<&str> {
        let mut formats: Vec<_> = self.exporters.keys().map(String::as_str).collect();
        formats.sort();
        formats
    }
}

impl std::fmt::Debug for ExporterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExporterRegistry")
            .field("formats", &self.formats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;

    #[test]
    fn test_registry_always_has_json() {
        let registry = ExporterRegistry::new();
        assert_eq!(registry.formats(), vec!["json"]);
        assert!(registry.get("marcxml").is_none());
    }

    #[test]
    fn test_registry_from_config() {
        let mut config = HashMap::new();
        config.insert(
            "marcxml".to_string(),
            ExporterConfig {
                template: "<record>{{ recid }}</record>".into(),
            },
        );
        let registry = ExporterRegistry::from_config(&config).unwrap();
        assert_eq!(registry.formats(), vec!["json", "marcxml"]);

        let record = Map::new();
        let ctx = ExportContext {
            record: &record,
            recid: 12,
            collection: "ARTICLES",
        };
        let out = registry.get("marcxml").unwrap().export(&ctx).unwrap();
        assert_eq!(out, "<record>12</record>");
    }

    #[test]
    fn test_registry_rejects_broken_template() {
        let mut config = HashMap::new();
        config.insert(
            "broken".to_string(),
            ExporterConfig {
                template: "{% if %}".into(),
            },
        );
        assert!(matches!(
            ExporterRegistry::from_config(&config),
            Err(WorkflowError::Template(_))
        ));
    }
}
