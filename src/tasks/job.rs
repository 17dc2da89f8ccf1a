use super::extra_object;
use crate::error::{Result, WorkflowError};
use crate::jobs::JobRequest;
use crate::store::WorkflowObject;
use crate::workflow::{EngineHandle, Task};
use serde_json::{Map, Value, json};

const JOBS_KEY: &str = "jobs";

/// Queues a background job and records its handle.
///
/// Handles are kept under `extra_data["jobs"][job]`; a job already recorded
/// there is not queued again when the unit re-runs.
#[derive(Debug, Clone)]
pub struct SubmitJob {
    name: String,
    job: String,
    attach_export: bool,
}

impl SubmitJob {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            name: "submit_job".to_string(),
            job: job.into(),
            attach_export: false,
        }
    }

    /// Send the exported artifact along in the job payload
    pub fn attach_export(mut self, attach: bool) -> Self {
        self.attach_export = attach;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Task for SubmitJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, obj: &mut WorkflowObject, eng: &mut EngineHandle<'_>) -> Result<()> {
        let queued = eng.extra_data(|data| {
            Ok(data
                .get(JOBS_KEY)
                .and_then(|jobs| jobs.get(&self.job))
                .and_then(Value::as_i64))
        })?;
        if let Some(handle) = queued {
            tracing::debug!(workflow = %eng.id(), job = %self.job, handle, "Job already queued");
            obj.set("task_id", handle);
            return Ok(());
        }

        let mut payload = json!({
            "recid": obj.get("recid").cloned().unwrap_or(Value::Null),
            "collection": eng.collection(),
        });
        if self.attach_export {
            let artifact = obj.get("export").cloned().ok_or_else(|| {
                WorkflowError::not_found(format!("exported artifact for job '{}'", self.job))
            })?;
            payload["export"] = artifact;
        }

        let request = JobRequest::new(eng.id(), self.job.clone()).with_payload(payload);
        let handle = eng.services().jobs.submit(&request)?;
        obj.set("task_id", handle.0);

        eng.set_extra_data(|data| {
            let data = extra_object(data)?;
            let jobs = data
                .entry(JOBS_KEY)
                .or_insert_with(|| Value::Object(Map::new()));
            match jobs.as_object_mut() {
                Some(jobs) => {
                    jobs.insert(self.job.clone(), json!(handle.0));
                    Ok(())
                }
                None => Err(WorkflowError::validation("extra data 'jobs' must be a JSON object")),
            }
        })
    }
}
