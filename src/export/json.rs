use super::{ExportContext, MetadataExporter};
use crate::error::Result;
use serde_json::Value;

/// Pretty-printed JSON record with `recid` and `collection` filled in
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonExporter;

impl MetadataExporter for JsonExporter {
    fn format(&self) -> &str {
        "json"
    }

    fn export(&self, ctx: &ExportContext<'_>) -> Result<String> {
        let mut record = ctx.record.clone();
        record.insert("recid".into(), Value::from(ctx.recid));
        record.insert("collection".into(), Value::from(ctx.collection));
        Ok(serde_json::to_string_pretty(&record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_export() {
        let record = json!({"title": "On drafts", "recid": 1})
            .as_object()
            .cloned()
            .unwrap();
        let ctx = ExportContext {
            record: &record,
            recid: 42,
            collection: "ARTICLES",
        };

        let out: Value = serde_json::from_str(&JsonExporter.export(&ctx).unwrap()).unwrap();
        assert_eq!(
            out,
            json!({"title": "On drafts", "recid": 42, "collection": "ARTICLES"})
        );
    }
}
