//! Execution engine - walks a task chain against a persisted instance

use super::chain::{ChainRegistry, TaskChain};
use super::position::Position;
use crate::error::{Result, WorkflowError};
use crate::export::ExporterRegistry;
use crate::forms::FormRegistry;
use crate::jobs::JobQueue;
use crate::store::{StateStore, WorkflowInstance, WorkflowObject, WorkflowStatus};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_MAX_STEPS: usize = 10_000;

/// Where `resume` repositions a stopped instance before running again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPoint {
    /// First leaf of the chain
    Beginning,
    /// Leaf before the stored position
    Previous,
    /// Leaf after the stored position
    Next,
    /// The stored position itself (re-runs a halted or failed unit)
    #[default]
    Same,
}

impl FromStr for StartPoint {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "beginning" => Ok(Self::Beginning),
            "previous" | "prev" => Ok(Self::Previous),
            "next" | "continue_next" => Ok(Self::Next),
            "same" | "continue" | "restart_task" => Ok(Self::Same),
            _ => Err(WorkflowError::validation(format!("invalid start point: {s}"))),
        }
    }
}

impl fmt::Display for StartPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Beginning => "beginning",
            Self::Previous => "previous",
            Self::Next => "next",
            Self::Same => "same",
        })
    }
}

/// Summary of one engine run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub position: Position,
    pub message: Option<String>,
    /// Task units executed by this run
    pub steps_executed: usize,
}

impl RunOutcome {
    fn new(instance: &WorkflowInstance, steps_executed: usize) -> Self {
        Self {
            id: instance.id,
            name: instance.name.clone(),
            status: instance.status,
            position: instance.position.clone(),
            message: instance.message.clone(),
            steps_executed,
        }
    }
}

/// Collaborators tasks reach through the engine handle
#[derive(Clone)]
pub struct EngineServices {
    pub forms: Arc<FormRegistry>,
    pub exporters: Arc<ExporterRegistry>,
    pub jobs: Arc<dyn JobQueue>,
}

/// Control signal a task leaves for the engine
#[derive(Debug, Clone, PartialEq)]
enum Signal {
    Continue,
    Halt(String),
    Jump(isize),
    Rejected(String),
}

/// What a running task sees of the engine
pub struct EngineHandle<'a> {
    store: &'a StateStore,
    services: &'a EngineServices,
    chain: &'a TaskChain,
    instance: &'a WorkflowInstance,
    position: Position,
    signal: Signal,
}

impl<'a> EngineHandle<'a> {
    pub fn id(&self) -> Uuid {
        self.instance.id
    }

    /// Chain name of the running instance
    pub fn name(&self) -> &str {
        &self.instance.name
    }

    pub fn owner_id(&self) -> &str {
        &self.instance.owner_id
    }

    /// Position of the unit being executed
    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn collection(&self) -> &str {
        self.chain.collection()
    }

    pub fn store(&self) -> &StateStore {
        self.store
    }

    pub fn services(&self) -> &EngineServices {
        self.services
    }

    /// Stop after this unit; the instance is persisted halted at this position
    pub fn halt(&mut self, reason: impl Into<String>) {
        self.signal = Signal::Halt(reason.into());
    }

    /// Continue `n` siblings after this unit instead of the next one
    pub fn jump_forward(&mut self, n: usize) -> Result<()> {
        self.jump(n, 1)
    }

    /// Continue `n` siblings before this unit, stopping at the first sibling
    pub fn jump_backward(&mut self, n: usize) -> Result<()> {
        self.jump(n, -1)
    }

    fn jump(&mut self, n: usize, direction: isize) -> Result<()> {
        if n == 0 {
            let message = "jump by zero steps".to_string();
            self.signal = Signal::Rejected(message.clone());
            return Err(WorkflowError::validation(message));
        }
        let delta = isize::try_from(n).unwrap_or(isize::MAX) * direction;
        self.signal = Signal::Jump(delta);
        Ok(())
    }

    pub fn set_extra_data<T, F>(&self, transform: F) -> Result<T>
    where
        F: FnOnce(&mut Value) -> Result<T>,
    {
        self.store.apply(self.instance.id, transform)
    }

    pub fn extra_data<T, F>(&self, query: F) -> Result<T>
    where
        F: FnOnce(&Value) -> Result<T>,
    {
        self.store.query(self.instance.id, query)
    }

    /// Persist a child copy of `obj`
    pub fn fork_object(&self, obj: &WorkflowObject) -> Result<WorkflowObject> {
        self.store.add_object(self.instance.id, Some(obj.id), &obj.data)
    }
}

/// Runs chains from a [`ChainRegistry`] against instances in a [`StateStore`]
pub struct WorkflowEngine {
    store: Arc<StateStore>,
    chains: Arc<ChainRegistry>,
    services: EngineServices,
    max_steps: usize,
}

impl WorkflowEngine {
    /// Engine with no forms, the built-in exporters, and the store as job queue
    pub fn new(store: Arc<StateStore>, chains: Arc<ChainRegistry>) -> Self {
        let services = EngineServices {
            forms: Arc::new(FormRegistry::new()),
            exporters: Arc::new(ExporterRegistry::new()),
            jobs: store.clone(),
        };
        Self {
            store,
            chains,
            services,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_forms(mut self, forms: Arc<FormRegistry>) -> Self {
        self.services.forms = forms;
        self
    }

    pub fn with_exporters(mut self, exporters: Arc<ExporterRegistry>) -> Self {
        self.services.exporters = exporters;
        self
    }

    pub fn with_job_queue(mut self, jobs: Arc<dyn JobQueue>) -> Self {
        self.services.jobs = jobs;
        self
    }

    /// Units one run may execute before the run is failed
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn chains(&self) -> &ChainRegistry {
        &self.chains
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    /// Run `name` for `owner_id`.
    ///
    /// With an `id` that already exists the stored instance continues from
    /// its stored position (a finished one is returned untouched); otherwise
    /// a new instance is created, under `id` when given. Each initial payload
    /// becomes a root object of a new instance.
    pub fn start(
        &self,
        name: &str,
        owner_id: &str,
        initial_objects: Vec<Value>,
        id: Option<Uuid>,
    ) -> Result<RunOutcome> {
        let chain = self.chains.get(name)?;

        let existing = match id {
            Some(id) => self.store.find(id)?,
            None => None,
        };

        let (instance, object) = match existing {
            Some(instance) => {
                if instance.name != name {
                    return Err(WorkflowError::validation(format!(
                        "workflow {} runs chain '{}', not '{}'",
                        instance.id, instance.name, name
                    )));
                }
                if instance.status.is_terminal() {
                    tracing::debug!(workflow = %instance.id, "Workflow already finished");
                    return Ok(RunOutcome::new(&instance, 0));
                }
                if !initial_objects.is_empty() {
                    tracing::warn!(
                        workflow = %instance.id,
                        count = initial_objects.len(),
                        "Ignoring initial objects for an existing workflow"
                    );
                }
                let object = self.working_object(instance.id, Vec::new())?;
                (instance, object)
            }
            None => {
                let instance = match id {
                    Some(id) => self.store.create_with_id(id, name, owner_id)?,
                    None => {
                        let id = self.store.create(name, owner_id)?;
                        self.store.load(id)?
                    }
                };
                let object = self.working_object(instance.id, initial_objects)?;
                (instance, object)
            }
        };

        let position = instance.position.clone();
        self.execute(instance, &chain, object, position)
    }

    /// Re-enter the run loop of a stored instance.
    ///
    /// A `new` instance runs from its stored position whatever `start` says;
    /// a `finished` one is returned untouched.
    pub fn resume(&self, id: Uuid, start: StartPoint) -> Result<RunOutcome> {
        let instance = self.store.load(id)?;
        if instance.status.is_terminal() {
            tracing::debug!(workflow = %id, "Workflow already finished");
            return Ok(RunOutcome::new(&instance, 0));
        }

        let chain = self.chains.get(&instance.name)?;
        let stored = instance.position.clone();
        let position = if instance.status == WorkflowStatus::New {
            stored
        } else {
            match start {
                StartPoint::Same => stored,
                StartPoint::Next => stored.shifted(1),
                StartPoint::Beginning => Position::start(),
                StartPoint::Previous => chain
                    .prev_leaf(&stored)
                    .unwrap_or_else(Position::start),
            }
        };

        tracing::info!(
            workflow = %id,
            chain = %instance.name,
            from = %instance.position,
            to = %position,
            start = %start,
            "Resuming workflow"
        );

        let object = self.working_object(id, Vec::new())?;
        self.execute(instance, &chain, object, position)
    }

    /// Objects of an instance in creation order, re-read on every call
    pub fn objects(&self, id: Uuid) -> Result<Vec<WorkflowObject>> {
        self.store.objects(id)
    }

    /// The object a run mutates: a child of the first root object.
    ///
    /// Reuses the most recent working object when the instance has one.
    fn working_object(&self, id: Uuid, initial: Vec<Value>) -> Result<WorkflowObject> {
        let objects = self.store.objects(id)?;
        if !objects.is_empty() {
            return self.store.latest_object(id);
        }

        let mut roots = Vec::new();
        if initial.is_empty() {
            roots.push(self.store.add_object(id, None, &Value::Null)?);
        } else {
            for payload in &initial {
                roots.push(self.store.add_object(id, None, payload)?);
            }
        }

        let first = &roots[0];
        self.store.add_object(id, Some(first.id), &first.data)
    }

    fn execute(
        &self,
        mut instance: WorkflowInstance,
        chain: &TaskChain,
        mut object: WorkflowObject,
        start: Position,
    ) -> Result<RunOutcome> {
        instance.status = WorkflowStatus::Running;
        instance.message = None;
        instance.position = start;
        self.store.checkpoint(&mut instance, Some(&object))?;

        let mut steps = 0;
        loop {
            let Some((position, task)) = chain.resolve_task(&instance.position) else {
                instance.status = WorkflowStatus::Finished;
                self.store.checkpoint(&mut instance, Some(&object))?;
                tracing::info!(workflow = %instance.id, chain = chain.name(), steps, "Workflow finished");
                break;
            };
            instance.position = position.clone();

            if steps >= self.max_steps {
                let message = format!("step limit of {} exceeded", self.max_steps);
                return Err(self.fail(&mut instance, &object, task.name(), message));
            }

            tracing::debug!(workflow = %instance.id, task = task.name(), position = %position, "Running task");

            let mut handle = EngineHandle {
                store: &self.store,
                services: &self.services,
                chain,
                instance: &instance,
                position: position.clone(),
                signal: Signal::Continue,
            };
            let result = task.run(&mut object, &mut handle);
            let signal = handle.signal;
            steps += 1;

            if let Err(e) = result {
                return Err(self.fail(&mut instance, &object, task.name(), e.to_string()));
            }

            match signal {
                Signal::Continue => instance.position = position.shifted(1),
                Signal::Jump(delta) => instance.position = position.shifted(delta),
                Signal::Halt(reason) => {
                    instance.status = WorkflowStatus::Halted;
                    tracing::info!(
                        workflow = %instance.id,
                        task = task.name(),
                        position = %position,
                        reason = %reason,
                        "Workflow halted"
                    );
                    instance.message = Some(reason);
                    self.store.checkpoint(&mut instance, Some(&object))?;
                    break;
                }
                Signal::Rejected(message) => {
                    return Err(self.fail(&mut instance, &object, task.name(), message));
                }
            }

            self.store.checkpoint(&mut instance, Some(&object))?;
        }

        Ok(RunOutcome::new(&instance, steps))
    }

    /// Persist the error state at the failing unit and build the error
    fn fail(
        &self,
        instance: &mut WorkflowInstance,
        object: &WorkflowObject,
        task: &str,
        message: String,
    ) -> WorkflowError {
        tracing::error!(
            workflow = %instance.id,
            task,
            position = %instance.position,
            error = %message,
            "Task failed"
        );

        instance.status = WorkflowStatus::Error;
        instance.message = Some(message.clone());
        if let Err(e) = self.store.checkpoint(instance, Some(object)) {
            tracing::error!(workflow = %instance.id, error = %e, "Failed to persist error state");
        }

        WorkflowError::Task {
            task: task.to_string(),
            position: instance.position.to_string(),
            message,
        }
    }
}
