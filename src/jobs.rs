//! Background job submission
//!
//! Tasks hand post-processing (record upload, indexing, collection refresh)
//! to a queue and record the returned handle; nothing here waits for a job
//! to run.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A job to enqueue on behalf of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub workflow_id: Uuid,
    /// Job kind, e.g. `upload`, `index`, `collections`
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

impl JobRequest {
    pub fn new(workflow_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            workflow_id,
            name: name.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Identifier returned by a queue for a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub i64);

/// A queued job as stored
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: i64,
    pub workflow_id: Uuid,
    pub name: String,
    pub payload: Value,
    pub status: String,
    pub created_at: String,
}

/// Anything that accepts background jobs
pub trait JobQueue: Send + Sync {
    fn submit(&self, request: &JobRequest) -> Result<JobHandle>;
}
