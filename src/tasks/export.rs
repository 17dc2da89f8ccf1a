use super::extra_object;
use crate::draft::transforms;
use crate::error::{Result, WorkflowError};
use crate::export::ExportContext;
use crate::store::WorkflowObject;
use crate::workflow::{EngineHandle, Task};
use serde_json::{Value, json};

/// Merges every draft into one record and exports it.
///
/// The record id comes from the record itself, an earlier export of this
/// instance, or a fresh reservation, in that order. The artifact lands in
/// the object's `export` field and in the instance's `export` extra data.
#[derive(Debug, Clone)]
pub struct Export {
    name: String,
    format: String,
}

impl Export {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            name: "export".to_string(),
            format: format.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Task for Export {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, obj: &mut WorkflowObject, eng: &mut EngineHandle<'_>) -> Result<()> {
        let exporter = eng
            .services()
            .exporters
            .get(&self.format)
            .ok_or_else(|| WorkflowError::not_found(format!("exporter '{}'", self.format)))?;

        let (record, known_recid) = eng.extra_data(|data| {
            let record = transforms::record_values(data)?;
            Ok((record, data.get("recid").and_then(Value::as_i64)))
        })?;

        let recid = match record
            .get("recid")
            .and_then(Value::as_i64)
            .or_else(|| obj.get("recid").and_then(Value::as_i64))
            .or(known_recid)
        {
            Some(recid) => recid,
            None => eng.store().reserve_record_id(eng.id())?,
        };

        let artifact = exporter.export(&ExportContext {
            record: &record,
            recid,
            collection: eng.collection(),
        })?;

        obj.set("recid", recid);
        if let Some(title) = record.get("title") {
            obj.set("title", title.clone());
        }
        obj.set("export_format", self.format.as_str());
        obj.set("export", artifact.as_str());

        eng.set_extra_data(|data| {
            let data = extra_object(data)?;
            data.insert("recid".into(), json!(recid));
            data.insert(
                "export".into(),
                json!({ "format": &self.format, "artifact": &artifact }),
            );
            Ok(())
        })?;

        tracing::info!(
            workflow = %eng.id(),
            recid,
            format = %self.format,
            collection = eng.collection(),
            "Exported record"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::{self, Draft};
    use crate::export::{ExporterRegistry, TemplateExporter};
    use crate::store::{StateStore, WorkflowStatus};
    use crate::workflow::{ChainRegistry, Position, TaskChain, TaskUnit, WorkflowEngine};
    use std::sync::Arc;

    fn engine(format: &str) -> WorkflowEngine {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let mut chains = ChainRegistry::new();
        chains.register(
            TaskChain::new("article", vec![TaskUnit::leaf(Export::new(format))])
                .with_collection("ARTICLES"),
        );
        let mut exporters = ExporterRegistry::new();
        exporters.register(Arc::new(
            TemplateExporter::new("dc", "<dc:title>{{ record.title }}</dc:title>").unwrap(),
        ));
        WorkflowEngine::new(store, Arc::new(chains)).with_exporters(Arc::new(exporters))
    }

    fn seed_drafts(store: &StateStore, id: uuid::Uuid) {
        let values = |v: Value| v.as_object().cloned().unwrap();
        draft::add_draft(
            store,
            id,
            &Position::new(vec![1]),
            &Draft::new("basic", values(json!({"title": "Old", "year": 2013}))),
        )
        .unwrap();
        draft::add_draft(
            store,
            id,
            &Position::new(vec![3]),
            &Draft::new("details", values(json!({"title": "New"}))),
        )
        .unwrap();
    }

    #[test]
    fn test_export_merges_drafts_and_reserves_recid() {
        let engine = engine("json");
        let store = engine.store();
        let id = store.create("article", "1").unwrap();
        seed_drafts(store, id);

        let outcome = engine.resume(id, Default::default()).unwrap();
        assert_eq!(outcome.status, WorkflowStatus::Finished);

        let object = store.latest_object(id).unwrap();
        let recid = object.get("recid").and_then(Value::as_i64).unwrap();
        assert_eq!(object.get_str("title"), Some("New"));

        let exported: Value = serde_json::from_str(object.get_str("export").unwrap()).unwrap();
        assert_eq!(
            exported,
            json!({"title": "New", "year": 2013, "recid": recid, "collection": "ARTICLES"})
        );

        let instance = store.load(id).unwrap();
        assert_eq!(instance.extra("recid"), Some(&json!(recid)));
        assert_eq!(instance.extra("export").unwrap()["format"], json!("json"));
    }

    #[test]
    fn test_export_reuses_recid_on_rerun() {
        let engine = engine("dc");
        let store = engine.store();
        let id = store.create("article", "1").unwrap();
        seed_drafts(store, id);

        engine.resume(id, Default::default()).unwrap();
        let first = store.load(id).unwrap().extra("recid").cloned();

        let mut instance = store.load(id).unwrap();
        instance.status = WorkflowStatus::Halted;
        store.save(&mut instance).unwrap();
        engine.resume(id, crate::workflow::StartPoint::Beginning).unwrap();

        assert_eq!(store.load(id).unwrap().extra("recid").cloned(), first);
        assert_eq!(
            store.latest_object(id).unwrap().get_str("export"),
            Some("<dc:title>New</dc:title>")
        );
    }

    #[test]
    fn test_unknown_format_fails_the_unit() {
        let engine = engine("marcxml");
        let err = engine.start("article", "1", vec![], None).unwrap_err();
        assert!(err.to_string().contains("exporter 'marcxml' not found"));
    }
}
