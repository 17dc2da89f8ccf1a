//! Resumable deposit workflows
//!
//! A chain of tasks runs against a persisted workflow instance. Tasks may
//! halt the run to wait for a form submission; the instance keeps its
//! position and extra data in SQLite so a later `resume` picks up exactly
//! where it stopped.

pub mod cli;
pub mod config;
pub mod deposit;
pub mod draft;
pub mod error;
pub mod export;
pub mod forms;
pub mod jobs;
pub mod logging;
pub mod store;
pub mod tasks;
pub mod workflow;

pub use deposit::Deposits;
pub use error::{Result, WorkflowError};
pub use store::{StateStore, WorkflowInstance, WorkflowObject, WorkflowStatus};
pub use workflow::{Position, RunOutcome, StartPoint, WorkflowEngine};
