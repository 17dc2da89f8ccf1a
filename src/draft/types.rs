//! Draft records staged inside a workflow's extra data

use crate::error::WorkflowError;
use crate::workflow::Position;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Whether the external input for a draft has been submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Unfinished,
    Finished,
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unfinished => f.write_str("unfinished"),
            Self::Finished => f.write_str("finished"),
        }
    }
}

impl FromStr for DraftStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unfinished" => Ok(Self::Unfinished),
            "finished" => Ok(Self::Finished),
            _ => Err(WorkflowError::validation(format!("invalid draft status: {s}"))),
        }
    }
}

/// One checkpoint of externally supplied input, e.g. a form submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    /// Form that produced the draft
    pub kind: String,

    /// Field name to value
    #[serde(default)]
    pub values: Map<String, Value>,

    pub status: DraftStatus,

    /// RFC 3339, refreshed on every field change
    pub timestamp: String,
}

impl Draft {
    /// New unfinished draft of `kind`
    pub fn new(kind: impl Into<String>, values: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            values,
            status: DraftStatus::Unfinished,
            timestamp: timestamp(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == DraftStatus::Finished
    }

    pub fn touch(&mut self) {
        self.timestamp = timestamp();
    }
}

/// Which draft an update addresses
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DraftTarget {
    /// The draft at the maximal position
    #[default]
    Latest,
    At(Position),
}

impl From<Position> for DraftTarget {
    fn from(position: Position) -> Self {
        Self::At(position)
    }
}

impl From<Option<Position>> for DraftTarget {
    fn from(position: Option<Position>) -> Self {
        position.map_or(Self::Latest, Self::At)
    }
}

pub(crate) fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
