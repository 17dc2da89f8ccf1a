//! Persisted workflow records

use crate::error::WorkflowError;
use crate::workflow::Position;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, never run
    New,
    /// Engine loop is executing task units
    Running,
    /// A task halted the engine; waiting for a resume
    Halted,
    /// Fell off the end of the chain
    Finished,
    /// A task unit failed; resumable once the cause is fixed
    Error,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Running => "running",
            Self::Halted => "halted",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }

    /// Finished instances are never executed again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "running" => Ok(Self::Running),
            "halted" => Ok(Self::Halted),
            "finished" => Ok(Self::Finished),
            "error" => Ok(Self::Error),
            _ => Err(WorkflowError::validation(format!(
                "invalid workflow status: {s}"
            ))),
        }
    }
}

/// One execution of a task chain
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    /// Name of the chain this instance runs
    pub name: String,
    pub owner_id: String,
    pub status: WorkflowStatus,
    /// Unit to execute next (or the unit that halted/failed)
    pub position: Position,
    /// Instance-scoped payload shared by all tasks; always a JSON object
    pub extra_data: Value,
    /// Bumped by every write; `save` refuses stale copies
    pub version: i64,
    /// Last halt reason or error message
    pub message: Option<String>,
    pub created_at: String,
    pub modified_at: String,
}

impl WorkflowInstance {
    /// Look up a top-level key of the extra data
    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extra_data.get(key)
    }
}

/// One unit of data flowing through a chain
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowObject {
    pub id: i64,
    pub workflow_id: Uuid,
    pub parent_id: Option<i64>,
    /// Per-object working state; always a JSON object
    pub data: Value,
    pub created_at: String,
    pub modified_at: String,
}

impl WorkflowObject {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data_mut().insert(key.into(), value.into());
    }

    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        if !self.data.is_object() {
            self.data = Value::Object(Map::new());
        }
        match &mut self.data {
            Value::Object(map) => map,
            _ => unreachable!("data was just replaced with an object"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        for status in [
            WorkflowStatus::New,
            WorkflowStatus::Running,
            WorkflowStatus::Halted,
            WorkflowStatus::Finished,
            WorkflowStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<WorkflowStatus>().unwrap(), status);
        }
        assert!("paused".parse::<WorkflowStatus>().is_err());
        assert!(WorkflowStatus::Finished.is_terminal());
        assert!(!WorkflowStatus::Error.is_terminal());
    }

    #[test]
    fn test_object_data_access() {
        let mut obj = WorkflowObject {
            id: 1,
            workflow_id: Uuid::new_v4(),
            parent_id: None,
            data: Value::Null,
            created_at: String::new(),
            modified_at: String::new(),
        };

        obj.set("user_id", "42");
        obj.set("recid", 7);

        assert_eq!(obj.get_str("user_id"), Some("42"));
        assert_eq!(obj.get("recid"), Some(&json!(7)));
        assert!(obj.get("missing").is_none());
    }
}
