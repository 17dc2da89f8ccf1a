//! Deposit facade - what a web layer or the CLI calls
//!
//! Wraps the engine and the draft protocol behind owner/chain oriented
//! operations. Writes that may lose a lock race are retried with the
//! configured [`RetryPolicy`].

use crate::config::DepositConfig;
use crate::draft::{self, Draft, DraftStatus, DraftTarget, transforms};
use crate::error::{Result, WorkflowError};
use crate::export::ExporterRegistry;
use crate::forms::FormRegistry;
use crate::store::{
    InstanceFilter, RetryPolicy, StateStore, WorkflowInstance, WorkflowObject, with_retry,
};
use crate::workflow::{ChainRegistry, Position, RunOutcome, StartPoint, WorkflowEngine};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct Deposits {
    engine: WorkflowEngine,
    retry: RetryPolicy,
}

impl Deposits {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self {
            engine,
            retry: RetryPolicy::default(),
        }
    }

    /// Resolve chains, forms and exporters from configuration over `store`
    pub fn from_config(config: &DepositConfig, store: Arc<StateStore>) -> Result<Self> {
        let chains = ChainRegistry::from_config(&config.chains)?;
        let forms = FormRegistry::from_config(&config.forms)?;
        let exporters = ExporterRegistry::from_config(&config.exporters)?;

        let engine = WorkflowEngine::new(store, Arc::new(chains))
            .with_forms(Arc::new(forms))
            .with_exporters(Arc::new(exporters))
            .with_max_steps(config.defaults.max_steps_per_run);

        Ok(Self::new(engine).with_retry(config.retry_policy()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn store(&self) -> &StateStore {
        self.engine.store()
    }

    /// Start a fresh instance of `name`
    pub fn start(&self, name: &str, owner_id: &str, initial: Vec<Value>) -> Result<RunOutcome> {
        self.engine.start(name, owner_id, initial, None)
    }

    pub fn resume(&self, id: Uuid, start: StartPoint) -> Result<RunOutcome> {
        self.engine.resume(id, start)
    }

    /// Continue `id` when given and known, otherwise start a new instance
    pub fn run(&self, name: &str, owner_id: &str, id: Option<Uuid>) -> Result<RunOutcome> {
        self.engine.start(name, owner_id, Vec::new(), id)
    }

    /// The owner's unfinished instance of `name`, or a freshly started one
    pub fn latest_or_new(&self, name: &str, owner_id: &str) -> Result<RunOutcome> {
        match self.store().most_recent(owner_id, name) {
            Ok(instance) => Ok(RunOutcome {
                id: instance.id,
                name: instance.name,
                status: instance.status,
                position: instance.position,
                message: instance.message,
                steps_executed: 0,
            }),
            Err(e) if e.is_not_found() => self.start(name, owner_id, Vec::new()),
            Err(e) => Err(e),
        }
    }

    pub fn status(&self, id: Uuid) -> Result<WorkflowInstance> {
        self.store().load(id)
    }

    pub fn list(&self, filter: &InstanceFilter) -> Result<Vec<WorkflowInstance>> {
        self.store().list(filter)
    }

    /// One extra-data key, or the whole payload when `key` is `None`
    pub fn extra_data(&self, id: Uuid, key: Option<&str>) -> Result<Option<Value>> {
        draft::get_extra_data(self.store(), id, |data| {
            Ok(match key {
                Some(key) => data.get(key).cloned(),
                None => Some(data.clone()),
            })
        })
    }

    /// Extra-data value for `key`, falling back to the latest object's data
    pub fn data(&self, id: Uuid, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.extra_data(id, Some(key))? {
            return Ok(Some(value));
        }
        match self.store().latest_object(id) {
            Ok(object) => Ok(object.get(key).cloned()),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn latest_object(&self, id: Uuid) -> Result<WorkflowObject> {
        self.store().latest_object(id)
    }

    pub fn objects(&self, id: Uuid) -> Result<Vec<WorkflowObject>> {
        self.engine.objects(id)
    }

    /// Merge submitted values into the latest draft and mark it finished.
    ///
    /// The merged values are validated against the draft's form first; on
    /// any problem nothing is written. The instance is not resumed.
    pub fn submit(&self, id: Uuid, values: &Map<String, Value>) -> Result<Position> {
        let forms = self.engine.services().forms.clone();

        let position = with_retry(&self.retry, || {
            self.store().apply(id, |data| {
                let (position, current) = transforms::latest_draft(data)?
                    .ok_or_else(|| WorkflowError::not_found(format!("draft of workflow {id}")))?;

                if let Some(form) = forms.get(&current.kind) {
                    let mut merged = current.values.clone();
                    merged.extend(values.clone());
                    form.validate(&merged)?;
                }

                let target = DraftTarget::At(position.clone());
                transforms::merge_draft_values(data, &target, values)?;
                transforms::set_draft_status(data, &target, DraftStatus::Finished)?;
                Ok(position)
            })
        })?;

        tracing::info!(workflow = %id, position = %position, fields = values.len(), "Submitted draft");
        Ok(position)
    }

    /// Check a value for one field of the latest draft's form without storing it.
    ///
    /// Drafts of forms that are not registered accept any value.
    pub fn check_field(&self, id: Uuid, field: &str, value: &Value) -> Result<()> {
        draft::get_extra_data(self.store(), id, |data| self.check_latest(id, data, field, value))
    }

    fn check_latest(&self, id: Uuid, data: &Value, field: &str, value: &Value) -> Result<()> {
        let (_, current) = transforms::latest_draft(data)?
            .ok_or_else(|| WorkflowError::not_found(format!("draft of workflow {id}")))?;
        match self.engine.services().forms.get(&current.kind) {
            Some(form) => form.check_field(field, value),
            None => Ok(()),
        }
    }

    /// Set one field of the latest draft, after checking it against the form
    pub fn set_field(&self, id: Uuid, field: &str, value: Value) -> Result<()> {
        with_retry(&self.retry, || {
            self.store().apply(id, |data| {
                self.check_latest(id, data, field, &value)?;
                transforms::set_draft_field(data, &DraftTarget::Latest, field, value.clone())
            })
        })
    }

    /// Append to a multi-value field of the latest draft; the appended item is
    /// checked against the form
    pub fn append_field(&self, id: Uuid, field: &str, value: Value) -> Result<()> {
        with_retry(&self.retry, || {
            self.store().apply(id, |data| {
                self.check_latest(id, data, field, &value)?;
                transforms::append_draft_list_field(data, field, value.clone())
            })
        })
    }

    /// Latest draft of each of the owner's unfinished instances of `name`,
    /// newest instance first. Instances without a draft are skipped.
    pub fn drafts(&self, owner_id: &str, name: &str) -> Result<Vec<(Uuid, Position, Draft)>> {
        let filter = InstanceFilter::owner(owner_id).with_name(name);
        let mut drafts = Vec::new();
        for instance in self.store().list(&filter)? {
            if let Some((position, latest)) = transforms::latest_draft(&instance.extra_data)? {
                drafts.push((instance.id, position, latest));
            }
        }
        Ok(drafts)
    }

    /// Number of unfinished instances per chain for one owner
    pub fn draft_counts(&self, owner_id: &str) -> Result<HashMap<String, usize>> {
        let mut counts = HashMap::new();
        for instance in self.store().list(&InstanceFilter::owner(owner_id))? {
            *counts.entry(instance.name).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// All draft values of an instance merged into one record
    pub fn record(&self, id: Uuid) -> Result<Map<String, Value>> {
        draft::get_extra_data(self.store(), id, transforms::record_values)
    }

    /// Cache values for the owner's next rendered form; `None` clears
    pub fn prefill(&self, owner_id: &str, values: Option<&Map<String, Value>>) -> Result<()> {
        self.store().set_prefill(owner_id, values)
    }

    /// Stage values on an instance before (or between) runs
    pub fn preingest(&self, id: Uuid, values: &Map<String, Value>, append: bool) -> Result<()> {
        with_retry(&self.retry, || draft::preingest(self.store(), id, values, append))
    }

    pub fn delete(&self, id: Uuid) -> Result<()> {
        self.store().delete(id)
    }
}
